// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Key and mask encode, the inverse of [`super::decode`].
//!
//! Both directions walk the same structure. Which attributes get
//! written is always decided by the key; the values written
//! come from `output`, which is the key itself or its mask.

use super::Result;
use super::ct::encode_ct;
use super::key::FlowKey;
use super::key::VlanHead;
use super::nlattr::AttrWriter;
use super::nlattr::NestHandle;
use super::nlattr::nla_total_size;
use super::nsh::encode_nsh;
use super::nsh::nsh_key_attr_size;
use super::tunnel::encode_tunnel;
use super::tunnel::tun_key_attr_size;
use crate::api::DP_MAX_PORTS;
use crate::api::ETHER_TYPE_802_2;
use crate::api::ETHER_TYPE_ARP;
use crate::api::ETHER_TYPE_IPV4;
use crate::api::ETHER_TYPE_IPV6;
use crate::api::ETHER_TYPE_NSH;
use crate::api::ETHER_TYPE_RARP;
use crate::api::FlowAttr;
use crate::api::FragType;
use crate::api::IP_PROTO_ICMP;
use crate::api::IP_PROTO_ICMPV6;
use crate::api::IP_PROTO_SCTP;
use crate::api::IP_PROTO_TCP;
use crate::api::IP_PROTO_UDP;
use crate::api::KeyAttr;
use crate::api::MacProto;
use crate::api::NDISC_NEIGHBOUR_ADVERTISEMENT;
use crate::api::NDISC_NEIGHBOUR_SOLICITATION;
use crate::api::TUN_OPTS_MAX;
use crate::api::TunnelMode;
use crate::api::eth_p_mpls;
use crate::api::eth_type_vlan;
use crate::api::wire::Be16;
use crate::api::wire::KeyArp;
use crate::api::wire::KeyEthernet;
use crate::api::wire::KeyIcmp;
use crate::api::wire::KeyIpv4;
use crate::api::wire::KeyIpv6;
use crate::api::wire::KeyNd;
use crate::api::wire::KeyPorts;
use alloc::vec::Vec;
use zerocopy::IntoBytes;

/// Encode `key` as a key attribute stream.
pub fn encode_key(key: &FlowKey) -> Result<Vec<u8>> {
    let mut w = AttrWriter::new();
    put_key(&mut w, key, key, false);
    w.into_bytes()
}

/// Encode `mask` as the mask attribute stream for `key`.
pub fn encode_mask(key: &FlowKey, mask: &FlowKey) -> Result<Vec<u8>> {
    let mut w = AttrWriter::new();
    put_key(&mut w, key, mask, true);
    w.into_bytes()
}

/// Write `output` as a key or mask stream nested in a flow attribute
/// of type `attr`.
pub fn put_key_nested(
    w: &mut AttrWriter,
    attr: FlowAttr,
    swkey: &FlowKey,
    output: &FlowKey,
    is_mask: bool,
) {
    let nest = w.begin_nested(attr);
    put_key(w, swkey, output, is_mask);
    w.end_nested(nest);
}

/// Write the key attributes of `output`, choosing which to write from
/// `swkey`.
pub fn put_key(
    w: &mut AttrWriter,
    swkey: &FlowKey,
    output: &FlowKey,
    is_mask: bool,
) {
    w.put_u32(KeyAttr::RecircId, output.recirc_id.get());
    w.put_u32(KeyAttr::DpHash, output.dp_hash.get());
    w.put_u32(KeyAttr::Priority, output.phy.priority.get());

    if swkey.tun_proto != 0 || is_mask {
        let len = usize::from(swkey.tun_opts_len.get()).min(TUN_OPTS_MAX);
        let opts = &output.tun_opts[TUN_OPTS_MAX - len..];
        encode_tunnel(
            w,
            &output.tun_key,
            opts,
            swkey.tun_proto,
            TunnelMode::empty(),
        );
    }

    if swkey.phy.in_port.get() == DP_MAX_PORTS {
        if is_mask && output.phy.in_port.get() == u16::MAX {
            w.put_u32(KeyAttr::InPort, u32::MAX);
        }
    } else {
        let upper: u32 = if is_mask { 0xffff } else { 0 };
        let port = (upper << 16) | u32::from(output.phy.in_port.get());
        w.put_u32(KeyAttr::InPort, port);
    }

    w.put_u32(KeyAttr::SkbMark, output.phy.skb_mark.get());

    encode_ct(w, swkey, output);

    let mut nests = Encaps::default();
    if put_link_layer(w, swkey, output, is_mask, &mut nests) {
        put_network(w, swkey, output, is_mask);
        put_transport(w, swkey, output);
    }
    nests.close(w);
}

/// The ENCAP nests opened for VLAN levels, outermost first.
#[derive(Default)]
struct Encaps {
    outer: Option<NestHandle>,
    inner: Option<NestHandle>,
}

impl Encaps {
    fn close(self, w: &mut AttrWriter) {
        if let Some(inner) = self.inner {
            w.end_nested(inner);
        }
        if let Some(outer) = self.outer {
            w.end_nested(outer);
        }
    }
}

fn put_vlan(w: &mut AttrWriter, vh: &VlanHead, is_mask: bool) {
    let tpid = if is_mask { u16::MAX } else { vh.tpid.get() };
    w.put_be16(KeyAttr::Ethertype, tpid);
    w.put_be16(KeyAttr::Vlan, vh.tci.get());
}

/// Write the framing and ethertype. Returns false if nothing past the
/// link layer is known: a truncated tag, an 802.2 frame, or a third
/// tag.
fn put_link_layer(
    w: &mut AttrWriter,
    swkey: &FlowKey,
    output: &FlowKey,
    is_mask: bool,
    nests: &mut Encaps,
) -> bool {
    let ty = swkey.eth.ty.get();

    if swkey.mac_proto() == MacProto::Ethernet {
        let eth = KeyEthernet { src: output.eth.src, dst: output.eth.dst };
        w.put_record(KeyAttr::Ethernet, &eth);

        if swkey.eth.vlan.tci.get() != 0 || eth_type_vlan(ty) {
            put_vlan(w, &output.eth.vlan, is_mask);
            nests.outer = Some(w.begin_nested(KeyAttr::Encap));
            if swkey.eth.vlan.tci.get() == 0 {
                return false;
            }

            if swkey.eth.cvlan.tci.get() != 0 || eth_type_vlan(ty) {
                put_vlan(w, &output.eth.cvlan, is_mask);
                nests.inner = Some(w.begin_nested(KeyAttr::Encap));
                if swkey.eth.cvlan.tci.get() == 0 {
                    return false;
                }
            }
        }

        // An 802.2 frame has no ethertype attribute in the key. The
        // mask still says whether the type was matched.
        if ty == ETHER_TYPE_802_2 {
            if is_mask && output.eth.ty.get() != 0 {
                w.put_be16(KeyAttr::Ethertype, output.eth.ty.get());
            }
            return false;
        }
    }

    w.put_be16(KeyAttr::Ethertype, output.eth.ty.get());

    // A third tag: nothing behind it was decoded.
    !eth_type_vlan(ty)
}

fn put_network(
    w: &mut AttrWriter,
    swkey: &FlowKey,
    output: &FlowKey,
    is_mask: bool,
) {
    match swkey.eth.ty.get() {
        ETHER_TYPE_IPV4 => {
            let ip = KeyIpv4 {
                src: output.ipv4.src,
                dst: output.ipv4.dst,
                proto: output.ip.proto,
                tos: output.ip.tos,
                ttl: output.ip.ttl,
                frag: output.ip.frag,
            };
            w.put_record(KeyAttr::Ipv4, &ip);
        }

        ETHER_TYPE_IPV6 => {
            let ip = KeyIpv6 {
                src: output.ipv6.src,
                dst: output.ipv6.dst,
                label: output.ipv6.label,
                proto: output.ip.proto,
                tclass: output.ip.tos,
                hlimit: output.ip.ttl,
                frag: output.ip.frag,
            };
            w.put_record(KeyAttr::Ipv6, &ip);
        }

        ETHER_TYPE_NSH => encode_nsh(w, &output.nsh, is_mask),

        ETHER_TYPE_ARP | ETHER_TYPE_RARP => {
            let arp = KeyArp {
                sip: output.ipv4.src,
                tip: output.ipv4.dst,
                op: Be16::new(u16::from(output.ip.proto)),
                sha: output.ipv4.arp_sha,
                tha: output.ipv4.arp_tha,
                pad: [0; 2],
            };
            w.put_record(KeyAttr::Arp, &arp);
        }

        ty if eth_p_mpls(ty) => {
            let count = output.mpls.num_labels_mask.count_ones() as usize;
            let labels = &output.mpls.lse[..count.min(output.mpls.lse.len())];
            w.put(KeyAttr::Mpls, labels.as_bytes());
        }

        _ => {}
    }
}

fn put_transport(w: &mut AttrWriter, swkey: &FlowKey, output: &FlowKey) {
    let ty = swkey.eth.ty.get();
    let is_ip = ty == ETHER_TYPE_IPV4 || ty == ETHER_TYPE_IPV6;
    if !is_ip || swkey.ip.frag == FragType::Later as u8 {
        return;
    }

    let ports = KeyPorts { src: output.tp.src, dst: output.tp.dst };
    // ICMP type and code live in the low byte of the port fields.
    let icmp = KeyIcmp {
        ty: output.tp.src.get() as u8,
        code: output.tp.dst.get() as u8,
    };

    match swkey.ip.proto {
        IP_PROTO_TCP => {
            w.put_record(KeyAttr::Tcp, &ports);
            w.put_be16(KeyAttr::TcpFlags, output.tp.flags.get());
        }
        IP_PROTO_UDP => w.put_record(KeyAttr::Udp, &ports),
        IP_PROTO_SCTP => w.put_record(KeyAttr::Sctp, &ports),
        IP_PROTO_ICMP if ty == ETHER_TYPE_IPV4 => {
            w.put_record(KeyAttr::Icmp, &icmp)
        }
        IP_PROTO_ICMPV6 if ty == ETHER_TYPE_IPV6 => {
            w.put_record(KeyAttr::Icmpv6, &icmp);

            let nd_ty = swkey.tp.src.get();
            if nd_ty == u16::from(NDISC_NEIGHBOUR_SOLICITATION)
                || nd_ty == u16::from(NDISC_NEIGHBOUR_ADVERTISEMENT)
            {
                let nd = KeyNd {
                    target: output.ipv6.nd_target,
                    sll: output.ipv6.nd_sll,
                    tll: output.ipv6.nd_tll,
                };
                w.put_record(KeyAttr::Nd, &nd);
            }
        }
        _ => {}
    }
}

/// The worst-case encoded size of a key stream.
pub const fn key_attr_size() -> usize {
    nla_total_size(4)                  // Priority
        + nla_total_size(0)            // Tunnel
        + tun_key_attr_size()
        + nla_total_size(4)            // InPort
        + nla_total_size(4)            // SkbMark
        + nla_total_size(4)            // DpHash
        + nla_total_size(4)            // RecircId
        + nla_total_size(4)            // CtState
        + nla_total_size(2)            // CtZone
        + nla_total_size(4)            // CtMark
        + nla_total_size(16)           // CtLabels
        + nla_total_size(40)           // CtOrigTupleIpv6
        + nla_total_size(0)            // Nsh
        + nsh_key_attr_size()
        + nla_total_size(12)           // Ethernet
        + nla_total_size(2)            // Ethertype
        + nla_total_size(4)            // Vlan
        + nla_total_size(0)            // Encap
        + nla_total_size(2)            // inner Ethertype
        + nla_total_size(40)           // Ipv6
        + nla_total_size(2)            // Icmpv6
        + nla_total_size(28)           // Nd
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ETHER_TYPE_MPLS_UC;
    use crate::api::ETHER_TYPE_QINQ;
    use crate::api::ETHER_TYPE_VLAN;
    use crate::api::MacAddr;
    use crate::api::TunnelAttr;
    use crate::api::VLAN_CFI_MASK;
    use crate::engine::CtAvailable;
    use crate::engine::Log;
    use crate::engine::decode::decode_exact;
    use crate::engine::key::FlowMatch;
    use crate::engine::nlattr::AttrIter;

    const SRC: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 1]);
    const DST: MacAddr = MacAddr::from_const([2, 0, 0, 0, 0, 2]);

    fn decode(buf: &[u8]) -> FlowMatch {
        decode_exact(buf, &CtAvailable, &Log::quiet()).unwrap()
    }

    /// Encoding a decoded key and decoding it again must give the same
    /// key, and a second encode the same bytes.
    fn roundtrip(buf: &[u8]) -> FlowKey {
        let first = decode(buf);
        let enc = encode_key(&first.key).unwrap();
        let second = decode(&enc);
        assert_eq!(first.key, second.key);
        assert_eq!(enc, encode_key(&second.key).unwrap());
        second.key
    }

    fn types(buf: &[u8]) -> Vec<u16> {
        AttrIter::new(buf).map(|a| a.ty()).collect()
    }

    #[test]
    fn ipv4_tcp() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::InPort, 1);
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(
            KeyAttr::Ipv4,
            &KeyIpv4 {
                src: [10, 0, 0, 1],
                dst: [10, 0, 0, 2],
                proto: IP_PROTO_TCP,
                tos: 0,
                ttl: 64,
                frag: 0,
            },
        );
        w.put_record(
            KeyAttr::Tcp,
            &KeyPorts { src: Be16::new(1234), dst: Be16::new(80) },
        );

        let key = roundtrip(w.as_bytes());
        let enc = encode_key(&key).unwrap();
        let tys = types(&enc);
        assert!(tys.contains(&(KeyAttr::TcpFlags as u16)));
        assert!(tys.contains(&(KeyAttr::InPort as u16)));
        assert!(!tys.contains(&(KeyAttr::Tunnel as u16)));
    }

    #[test]
    fn ethernet_802_2() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let key = roundtrip(w.as_bytes());
        assert_eq!(key.eth.ty.get(), ETHER_TYPE_802_2);

        let enc = encode_key(&key).unwrap();
        assert!(!types(&enc).contains(&(KeyAttr::Ethertype as u16)));
        // A key without a port writes none, but its exact mask does.
        assert!(!types(&enc).contains(&(KeyAttr::InPort as u16)));

        let mut mask = FlowKey::new();
        mask.phy.in_port = crate::api::wire::Ne16::new(u16::MAX);
        mask.eth.ty = Be16::new(u16::MAX);
        let enc = encode_mask(&key, &mask).unwrap();
        let attrs: Vec<_> = AttrIter::new(&enc).collect();
        let port = attrs.iter().find(|a| a.ty() == KeyAttr::InPort as u16);
        assert_eq!(port.unwrap().read_u32(), Ok(u32::MAX));
        let ty = attrs.iter().find(|a| a.ty() == KeyAttr::Ethertype as u16);
        assert_eq!(ty.unwrap().read_be16(), Ok(u16::MAX));
    }

    #[test]
    fn double_tagged() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_QINQ);
        w.put_be16(KeyAttr::Vlan, VLAN_CFI_MASK | 100);
        let outer = w.begin_nested(KeyAttr::Encap);
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_VLAN);
        w.put_be16(KeyAttr::Vlan, VLAN_CFI_MASK | 200);
        let inner = w.begin_nested(KeyAttr::Encap);
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_ARP);
        let arp = KeyArp { op: Be16::new(1), ..Default::default() };
        w.put_record(KeyAttr::Arp, &arp);
        w.end_nested(inner);
        w.end_nested(outer);

        let key = roundtrip(w.as_bytes());
        assert_eq!(key.eth.vlan.tpid.get(), ETHER_TYPE_QINQ);
        assert_eq!(key.eth.cvlan.tci.get(), VLAN_CFI_MASK | 200);
        assert_eq!(key.eth.ty.get(), ETHER_TYPE_ARP);
        assert_eq!(key.ip.proto, 1);

        let enc = encode_key(&key).unwrap();
        let encap = AttrIter::new(&enc)
            .find(|a| a.ty() == KeyAttr::Encap as u16)
            .unwrap();
        let inner: Vec<_> = encap.nested().map(|a| a.ty()).collect();
        assert_eq!(
            inner,
            vec![
                KeyAttr::Ethertype as u16,
                KeyAttr::Vlan as u16,
                KeyAttr::Encap as u16,
            ]
        );
    }

    #[test]
    fn later_fragment() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV6);
        w.put_record(
            KeyAttr::Ipv6,
            &KeyIpv6 {
                proto: IP_PROTO_UDP,
                hlimit: 8,
                frag: FragType::Later as u8,
                ..Default::default()
            },
        );
        let key = roundtrip(w.as_bytes());
        let enc = encode_key(&key).unwrap();
        assert!(!types(&enc).contains(&(KeyAttr::Udp as u16)));
    }

    #[test]
    fn mpls_and_neighbor_discovery() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_MPLS_UC);
        w.put(KeyAttr::Mpls, &[0, 1, 0x11, 0x40]);
        let key = roundtrip(w.as_bytes());
        assert_eq!(key.mpls.num_labels_mask, 1);

        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV6);
        w.put_record(
            KeyAttr::Ipv6,
            &KeyIpv6 {
                proto: IP_PROTO_ICMPV6,
                hlimit: 255,
                ..Default::default()
            },
        );
        w.put_record(
            KeyAttr::Icmpv6,
            &KeyIcmp { ty: NDISC_NEIGHBOUR_ADVERTISEMENT, code: 0 },
        );
        w.put_record(
            KeyAttr::Nd,
            &KeyNd { target: [0xfe; 16], sll: [0; 6], tll: [2; 6] },
        );
        let key = roundtrip(w.as_bytes());
        assert_eq!(key.ipv6.nd_tll, [2; 6]);
    }

    #[test]
    fn tunnel_and_layer3() {
        let mut w = AttrWriter::new();
        let tun = w.begin_nested(KeyAttr::Tunnel);
        w.put_be64(TunnelAttr::Id, 0x1de);
        w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 1]);
        w.put_u8(TunnelAttr::Ttl, 64);
        w.put(TunnelAttr::GeneveOpts, &[0x01, 0x29, 0x00, 0x01, 1, 2, 3, 4]);
        w.end_nested(tun);
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(
            KeyAttr::Ipv4,
            &KeyIpv4 { proto: 47, ttl: 1, ..Default::default() },
        );

        let fm = decode(w.as_bytes());
        let key = roundtrip(w.as_bytes());
        assert_eq!(key.mac_proto(), MacProto::None);
        assert_eq!(key.tun_opts_bytes(), &[0x01, 0x29, 0x00, 0x01, 1, 2, 3, 4]);

        // The mask keeps the option length of the key it belongs to.
        let mask = fm.mask.unwrap();
        let enc = encode_mask(&fm.key, &mask.key).unwrap();
        let tun = AttrIter::new(&enc)
            .find(|a| a.ty() == KeyAttr::Tunnel as u16)
            .unwrap();
        let opts = tun
            .nested()
            .find(|a| a.ty() == TunnelAttr::GeneveOpts as u16)
            .unwrap();
        assert_eq!(opts.data(), &[0xff; 8]);
    }

    #[test]
    fn size_bound() {
        let mut key = FlowKey::new();
        key.tun_proto = crate::api::TUN_PROTO_INET6;
        key.tun_opts_len = crate::api::wire::Ne16::new(TUN_OPTS_MAX as u16);
        key.phy.in_port = crate::api::wire::Ne16::new(1);
        key.eth.ty = Be16::new(ETHER_TYPE_IPV6);
        key.ip.proto = IP_PROTO_ICMPV6;
        key.tp.src = Be16::new(u16::from(NDISC_NEIGHBOUR_SOLICITATION));
        assert!(encode_key(&key).unwrap().len() <= key_attr_size());
    }
}
