// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match decode.
//!
//! A key stream and an optional mask stream are decoded by the same
//! code, once per side. The key pass runs first; several mask checks
//! consult what the key pass wrote.

use super::Log;
use super::NetContext;
use super::Result;
use super::ct::decode_ct;
use super::key::FlowKey;
use super::key::FlowMatch;
use super::key::MatchBuilder;
use super::nlattr::Attr;
use super::nlattr::AttrSet;
use super::nlattr::ParsedAttrs;
use super::nsh::NshForm;
use super::nsh::decode_nsh;
use super::schema::KEY_SCHEMA;
use super::schema::exact_mask;
use super::tunnel::decode_tunnel;
use super::validate::validate_match;
use super::vlan::decode_vlans;
use crate::api::DP_MAX_PORTS;
use crate::api::ETH_P_802_3_MIN;
use crate::api::ETHER_TYPE_802_2;
use crate::api::FlowError;
use crate::api::FragType;
use crate::api::KeyAttr;
use crate::api::MPLS_LABEL_DEPTH;
use crate::api::MacProto;
use crate::api::wire::Be16;
use crate::api::wire::KeyArp;
use crate::api::wire::KeyEthernet;
use crate::api::wire::KeyIcmp;
use crate::api::wire::KeyIpv4;
use crate::api::wire::KeyIpv6;
use crate::api::wire::KeyMpls;
use crate::api::wire::KeyNd;
use crate::api::wire::KeyPorts;
use crate::api::wire::Ne16;
use crate::api::wire::Ne32;
use crate::nlerr;
use alloc::vec::Vec;
use zerocopy::FromBytes;

/// Decode a key stream into an exact match: the mask covers exactly
/// the fields the key stream names.
pub fn decode_exact(
    key: &[u8],
    net: &dyn NetContext,
    log: &Log,
) -> Result<FlowMatch> {
    decode(key, MaskSource::Exact, net, log)
}

/// Decode a key stream and a mask stream into a wildcarded match. With
/// no mask stream the match is exact, as for [`decode_exact`].
pub fn decode_match(
    key: &[u8],
    mask: Option<&[u8]>,
    net: &dyn NetContext,
    log: &Log,
) -> Result<FlowMatch> {
    let source = match mask {
        Some(mask) => MaskSource::Stream(mask),
        None => MaskSource::Exact,
    };
    decode(key, source, net, log)
}

/// Decode a key stream without building a mask at all.
pub fn decode_key(
    key: &[u8],
    net: &dyn NetContext,
    log: &Log,
) -> Result<FlowMatch> {
    decode(key, MaskSource::Omitted, net, log)
}

enum MaskSource<'a> {
    Omitted,
    Exact,
    Stream(&'a [u8]),
}

fn decode(
    key: &[u8],
    mask: MaskSource<'_>,
    net: &dyn NetContext,
    log: &Log,
) -> Result<FlowMatch> {
    let mut m = MatchBuilder::new();

    let mut key_attrs = ParsedAttrs::parse(key, &KEY_SCHEMA, false, log)?;
    decode_vlans(&mut key_attrs, &mut m, false, log)?;
    let key_present = key_attrs.present();
    decode_fields(&key_attrs, &mut m, false, net, log)?;

    let synthesized: Vec<u8>;
    let mask_buf = match mask {
        MaskSource::Omitted => None,
        MaskSource::Stream(buf) => Some(buf),
        MaskSource::Exact => {
            synthesized = exact_mask(key, &KEY_SCHEMA);
            // Zero tunnel fields are omitted from a key stream, but an
            // exact match still matches on them.
            if m.key.tun_proto != 0 {
                fill!(m, tun_key, 0xff, true);
            }
            Some(synthesized.as_slice())
        }
    };

    let mut mask_present = AttrSet::EMPTY;
    if let Some(buf) = mask_buf {
        let mut mask_attrs = ParsedAttrs::parse(buf, &KEY_SCHEMA, true, log)?;

        // The TCI is always matched exactly.
        put!(m, eth.vlan.tci, Be16::new(u16::MAX), true);
        put!(m, eth.cvlan.tci, Be16::new(u16::MAX), true);

        decode_vlans(&mut mask_attrs, &mut m, true, log)?;
        mask_present = mask_attrs.present();
        decode_fields(&mask_attrs, &mut m, true, net, log)?;
    }

    let has_mask = mask_buf.is_some();
    validate_match(&m, has_mask, key_present, mask_present, log)?;
    Ok(m.into_match(has_mask))
}

/// Decode only the metadata of a key stream: the parts of a key that
/// do not come from packet contents.
///
/// Connection tracking fields are left cleared and the ingress port
/// defaults to [`DP_MAX_PORTS`].
pub fn decode_flow_metadata(
    key: &[u8],
    net: &dyn NetContext,
    log: &Log,
) -> Result<FlowKey> {
    let attrs = ParsedAttrs::parse(key, &KEY_SCHEMA, false, log)?;
    let mut m = MatchBuilder::new();
    let mut left = attrs.present();
    decode_metadata(&attrs, &mut left, &mut m, false, net, log)?;
    Ok(m.key)
}

/// Hand out the attribute of type `ty` if it has not been consumed yet,
/// marking it consumed.
fn take<'a>(
    attrs: &ParsedAttrs<'a>,
    left: &mut AttrSet,
    ty: KeyAttr,
) -> Option<Attr<'a>> {
    if !left.contains(ty) {
        return None;
    }
    left.remove(ty);
    attrs.get(ty)
}

fn decode_metadata(
    attrs: &ParsedAttrs<'_>,
    left: &mut AttrSet,
    m: &mut MatchBuilder,
    is_mask: bool,
    net: &dyn NetContext,
    log: &Log,
) -> Result<()> {
    if let Some(a) = take(attrs, left, KeyAttr::DpHash) {
        put!(m, dp_hash, Ne32::new(a.read_u32()?), is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::RecircId) {
        put!(m, recirc_id, Ne32::new(a.read_u32()?), is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Priority) {
        put!(m, phy.priority, Ne32::new(a.read_u32()?), is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::InPort) {
        let port = a.read_u32()?;
        let port = if is_mask {
            // The ingress port is always matched exactly.
            u16::MAX
        } else {
            match u16::try_from(port) {
                Ok(port) if port < DP_MAX_PORTS => port,
                _ => {
                    return Err(log.fail(FlowError::invalid(format!(
                        "port {port} exceeds max allowable {DP_MAX_PORTS}"
                    ))));
                }
            }
        };
        put!(m, phy.in_port, Ne16::new(port), is_mask);
    } else if !is_mask {
        put!(m, phy.in_port, Ne16::new(DP_MAX_PORTS), false);
    }

    if let Some(a) = take(attrs, left, KeyAttr::SkbMark) {
        put!(m, phy.skb_mark, Ne32::new(a.read_u32()?), is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Tunnel) {
        decode_tunnel(a, m, is_mask, log)?;
    }

    decode_ct(attrs, left, m, is_mask, net, log)?;

    // A layer 3 packet names its ethertype as metadata and carries no
    // link-layer addresses.
    let mac_proto = if !left.contains(KeyAttr::Ethernet)
        && left.contains(KeyAttr::Ethertype)
    {
            MacProto::None
        } else {
            MacProto::Ethernet
        };

    let stored = if is_mask { 0xff } else { mac_proto as u8 };
    put!(m, mac_proto, stored, is_mask);

    if mac_proto == MacProto::None {
        decode_eth_type(attrs, left, m, is_mask, log)?;
    }

    Ok(())
}

fn decode_eth_type(
    attrs: &ParsedAttrs<'_>,
    left: &mut AttrSet,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    let Some(a) = take(attrs, left, KeyAttr::Ethertype) else {
        return Ok(());
    };

    let ty = if is_mask {
        // The ethertype is always matched exactly.
        u16::MAX
    } else {
        let ty = a.read_be16()?;
        if ty < ETH_P_802_3_MIN {
            return Err(log.fail(FlowError::invalid(format!(
                "ethertype {ty:#06x} is less than min {ETH_P_802_3_MIN:#06x}"
            ))));
        }
        ty
    };

    put!(m, eth.ty, Be16::new(ty), is_mask);
    Ok(())
}

/// Decode every field of one side. Fails if anything in `attrs` is left
/// unconsumed.
fn decode_fields(
    attrs: &ParsedAttrs<'_>,
    m: &mut MatchBuilder,
    is_mask: bool,
    net: &dyn NetContext,
    log: &Log,
) -> Result<()> {
    let mut left = attrs.present();
    let left = &mut left;

    decode_metadata(attrs, left, m, is_mask, net, log)?;

    if let Some(a) = take(attrs, left, KeyAttr::Ethernet) {
        let eth: KeyEthernet = a.read()?;
        put!(m, eth.src, eth.src, is_mask);
        put!(m, eth.dst, eth.dst, is_mask);

        // Tags are resolved before this point; one still present is a
        // third level.
        if left.contains(KeyAttr::Vlan) {
            let err = FlowError::invalid("VLAN attribute unexpected");
            return Err(log.fail(err));
        }

        if left.contains(KeyAttr::Ethertype) {
            decode_eth_type(attrs, left, m, is_mask, log)?;
        } else if !is_mask {
            put!(m, eth.ty, Be16::new(ETHER_TYPE_802_2), false);
        }
    } else if m.key.eth.ty.get() == 0 {
        return Err(log.fail(FlowError::invalid(
            "either an Ethernet header or an ethertype is required",
        )));
    }

    if left.contains(KeyAttr::Ipv4) && left.contains(KeyAttr::Ipv6) {
        return Err(log.fail(FlowError::unsupported(
            "both IPv4 and IPv6 fields are present",
        )));
    }

    if let Some(a) = take(attrs, left, KeyAttr::Ipv4) {
        let ip: KeyIpv4 = a.read()?;
        if !is_mask && ip.frag > FragType::MAX {
            return Err(log.fail(FlowError::invalid(format!(
                "IPv4 frag type {} is out of range max {}",
                ip.frag,
                FragType::MAX
            ))));
        }
        put!(m, ip.proto, ip.proto, is_mask);
        put!(m, ip.tos, ip.tos, is_mask);
        put!(m, ip.ttl, ip.ttl, is_mask);
        put!(m, ip.frag, ip.frag, is_mask);
        put!(m, ipv4.src, ip.src, is_mask);
        put!(m, ipv4.dst, ip.dst, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Ipv6) {
        let ip: KeyIpv6 = a.read()?;
        if !is_mask && ip.frag > FragType::MAX {
            return Err(log.fail(FlowError::invalid(format!(
                "IPv6 frag type {} is out of range max {}",
                ip.frag,
                FragType::MAX
            ))));
        }
        if !is_mask && ip.label.get() & 0xFFF0_0000 != 0 {
            return Err(log.fail(FlowError::invalid(format!(
                "IPv6 flow label {:#x} is out of range (max={:#x})",
                ip.label.get(),
                crate::api::IPV6_FLOW_LABEL_MASK
            ))));
        }
        put!(m, ipv6.label, ip.label, is_mask);
        put!(m, ip.proto, ip.proto, is_mask);
        put!(m, ip.tos, ip.tclass, is_mask);
        put!(m, ip.ttl, ip.hlimit, is_mask);
        put!(m, ip.frag, ip.frag, is_mask);
        put!(m, ipv6.src, ip.src, is_mask);
        put!(m, ipv6.dst, ip.dst, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Arp) {
        let arp: KeyArp = a.read()?;
        let op = arp.op.get();
        if !is_mask && op & 0xff00 != 0 {
            return Err(log.fail(FlowError::invalid(format!(
                "unknown ARP opcode {op}"
            ))));
        }
        put!(m, ipv4.src, arp.sip, is_mask);
        put!(m, ipv4.dst, arp.tip, is_mask);
        // The opcode is stored in the protocol byte; a key's high byte
        // is zero, a mask's is not kept.
        put!(m, ip.proto, op as u8, is_mask);
        put!(m, ipv4.arp_sha, arp.sha, is_mask);
        put!(m, ipv4.arp_tha, arp.tha, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Nsh) {
        let form = if is_mask { NshForm::Mask } else { NshForm::Key };
        decode_nsh(a, m, form, log)?;
    }

    if let Some(a) = take(attrs, left, KeyAttr::Mpls) {
        let rec = size_of::<KeyMpls>();
        let count = a.len() / rec;
        if count == 0 || count > MPLS_LABEL_DEPTH || a.len() % rec != 0 {
            return Err(log.fail(FlowError::invalid(format!(
                "MPLS attribute length {} is not 1 to {} labels",
                a.len(),
                MPLS_LABEL_DEPTH,
            ))));
        }

        let mut lse = m.get(is_mask).mpls.lse;
        for (slot, chunk) in lse.iter_mut().zip(a.data().chunks_exact(rec)) {
            let entry = KeyMpls::read_from_bytes(chunk).map_err(|_| {
                FlowError::invalid("truncated MPLS label stack entry")
            })?;
            *slot = entry.lse;
        }
        put!(m, mpls.lse, lse, is_mask);

        // At most three labels, so the mask fits in the low bits.
        put!(m, mpls.num_labels_mask, ((1u16 << count) - 1) as u8, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Tcp) {
        let ports: KeyPorts = a.read()?;
        put!(m, tp.src, ports.src, is_mask);
        put!(m, tp.dst, ports.dst, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::TcpFlags) {
        put!(m, tp.flags, Be16::new(a.read_be16()?), is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Udp) {
        let ports: KeyPorts = a.read()?;
        put!(m, tp.src, ports.src, is_mask);
        put!(m, tp.dst, ports.dst, is_mask);
    }

    if let Some(a) = take(attrs, left, KeyAttr::Sctp) {
        let ports: KeyPorts = a.read()?;
        put!(m, tp.src, ports.src, is_mask);
        put!(m, tp.dst, ports.dst, is_mask);
    }

    for ty in [KeyAttr::Icmp, KeyAttr::Icmpv6] {
        if let Some(a) = take(attrs, left, ty) {
            let icmp: KeyIcmp = a.read()?;
            put!(m, tp.src, Be16::new(u16::from(icmp.ty)), is_mask);
            put!(m, tp.dst, Be16::new(u16::from(icmp.code)), is_mask);
        }
    }

    if let Some(a) = take(attrs, left, KeyAttr::Nd) {
        let nd: KeyNd = a.read()?;
        put!(m, ipv6.nd_target, nd.target, is_mask);
        put!(m, ipv6.nd_sll, nd.sll, is_mask);
        put!(m, ipv6.nd_tll, nd.tll, is_mask);
    }

    if !left.is_empty() {
        nlerr!(log, "unconsumed key attributes"; "attrs" => ?left);
        return Err(log.fail(FlowError::invalid(format!(
            "unknown key attributes {:#x}",
            left.bits()
        ))));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ETHER_TYPE_IPV4;
    use crate::api::ETHER_TYPE_IPV6;
    use crate::api::IP_PROTO_TCP;
    use crate::api::MacAddr;
    use crate::api::TunnelAttr;
    use crate::api::wire::Be32;
    use crate::engine::CtAvailable;
    use crate::engine::NoCt;
    use crate::engine::nlattr::AttrWriter;

    const SRC: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 1]);
    const DST: MacAddr = MacAddr::from_const([0xa8, 0x40, 0x25, 0, 0, 2]);

    fn ipv4(frag: u8) -> KeyIpv4 {
        KeyIpv4 {
            src: [10, 0, 0, 1],
            dst: [10, 0, 0, 2],
            proto: IP_PROTO_TCP,
            tos: 0,
            ttl: 64,
            frag,
        }
    }

    fn tcp_stream(frag: u8) -> Vec<u8> {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::InPort, 3);
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(KeyAttr::Ipv4, &ipv4(frag));
        w.put_record(
            KeyAttr::Tcp,
            &KeyPorts { src: Be16::new(49152), dst: Be16::new(443) },
        );
        w.into_bytes().unwrap()
    }

    fn exact(buf: &[u8]) -> Result<FlowMatch> {
        decode_exact(buf, &CtAvailable, &Log::quiet())
    }

    #[test]
    fn ipv4_tcp() {
        let fm = exact(&tcp_stream(0)).unwrap();
        let key = &fm.key;
        assert_eq!(key.mac_proto(), MacProto::Ethernet);
        assert_eq!(key.eth.ty.get(), ETHER_TYPE_IPV4);
        assert_eq!(key.eth.src, SRC.bytes());
        assert_eq!(key.ip.proto, IP_PROTO_TCP);
        assert_eq!(key.ip.frag, FragType::None as u8);
        assert_eq!(key.tp.dst.get(), 443);
        assert_eq!(key.phy.in_port.get(), 3);

        let mask = fm.mask.unwrap();
        assert_eq!(mask.key.ip.proto, 0xff);
        assert_eq!(mask.key.tp.src.get(), 0xffff);
        assert_eq!(mask.key.eth.vlan.tci.get(), 0xffff);
        assert_eq!(mask.key.mac_proto, 0xff);
    }

    #[test]
    fn key_only() {
        let fm = decode_key(&tcp_stream(0), &NoCt, &Log::quiet()).unwrap();
        assert!(fm.mask.is_none());
        assert!(fm.range.contains(core::mem::offset_of!(FlowKey, tp.dst)));
    }

    #[test]
    fn missing_port_defaults() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let fm = exact(&w.into_bytes().unwrap()).unwrap();
        assert_eq!(fm.key.phy.in_port.get(), DP_MAX_PORTS);
        assert_eq!(fm.key.eth.ty.get(), ETHER_TYPE_802_2);
    }

    #[test]
    fn port_out_of_range() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::InPort, u32::from(DP_MAX_PORTS));
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let res = exact(&w.into_bytes().unwrap());
        assert!(matches!(res, Err(FlowError::Invalid(_))));
    }

    #[test]
    fn later_fragment_skips_l4() {
        // A later fragment with no transport fields at all.
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(KeyAttr::Ipv4, &ipv4(FragType::Later as u8));
        let fm = exact(&w.into_bytes().unwrap()).unwrap();
        assert_eq!(fm.key.ip.frag, FragType::Later as u8);

        // The same without the fragment marker requires TCP.
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(KeyAttr::Ipv4, &ipv4(0));
        assert!(matches!(
            exact(&w.into_bytes().unwrap()),
            Err(FlowError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn bad_frag_type() {
        assert!(matches!(exact(&tcp_stream(3)), Err(FlowError::Invalid(_))));
    }

    #[test]
    fn layer3_packet() {
        let mut w = AttrWriter::new();
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV6);
        w.put_record(
            KeyAttr::Ipv6,
            &KeyIpv6 {
                src: [0xfd; 16],
                dst: [0xfe; 16],
                label: Be32::new(0x12345),
                proto: 17,
                tclass: 0,
                hlimit: 255,
                frag: 0,
            },
        );
        w.put_record(
            KeyAttr::Udp,
            &KeyPorts { src: Be16::new(1), dst: Be16::new(2) },
        );
        let fm = exact(&w.into_bytes().unwrap()).unwrap();
        assert_eq!(fm.key.mac_proto(), MacProto::None);
        assert_eq!(fm.key.eth.ty.get(), ETHER_TYPE_IPV6);
        assert_eq!(fm.key.ipv6.label.get(), 0x12345);
        assert_eq!(fm.key.ip.ttl, 255);
    }

    #[test]
    fn no_framing() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::Priority, 1);
        let res = exact(&w.into_bytes().unwrap());
        assert!(matches!(res, Err(FlowError::Invalid(_))));
    }

    #[test]
    fn ipv4_and_ipv6() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, ETHER_TYPE_IPV4);
        w.put_record(KeyAttr::Ipv4, &ipv4(FragType::Later as u8));
        w.put_record(KeyAttr::Ipv6, &KeyIpv6::default());
        assert!(matches!(
            exact(&w.into_bytes().unwrap()),
            Err(FlowError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn mpls_labels() {
        let mut w = AttrWriter::new();
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        w.put_be16(KeyAttr::Ethertype, crate::api::ETHER_TYPE_MPLS_UC);
        w.put(KeyAttr::Mpls, &[0, 0, 0x11, 0x00, 0, 0, 0x21, 0xff]);
        let fm = exact(&w.into_bytes().unwrap()).unwrap();
        assert_eq!(fm.key.mpls.num_labels_mask, 0b11);
        assert_eq!(fm.key.mpls.lse[1].get(), 0x21ff);

        for bad in [&[][..], &[0; 6][..], &[0; 16][..]] {
            let mut w = AttrWriter::new();
            w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
            w.put_be16(KeyAttr::Ethertype, crate::api::ETHER_TYPE_MPLS_UC);
            w.put(KeyAttr::Mpls, bad);
            let res = exact(&w.into_bytes().unwrap());
            assert!(matches!(res, Err(FlowError::Invalid(_))));
        }
    }

    #[test]
    fn unsupported_ct_is_unknown() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::CtMark, 1);
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let buf = w.into_bytes().unwrap();

        assert!(exact(&buf).is_ok());
        assert!(matches!(
            decode_exact(&buf, &NoCt, &Log::quiet()),
            Err(FlowError::Invalid(_))
        ));
    }

    #[test]
    fn wildcard_mask() {
        let key = tcp_stream(0);
        let mut w = AttrWriter::new();
        w.put_be16(KeyAttr::Ethertype, u16::MAX);
        w.put_record(
            KeyAttr::Ipv4,
            &KeyIpv4 {
                src: [255, 255, 255, 0],
                ..KeyIpv4::default()
            },
        );
        let mask = w.into_bytes().unwrap();
        let fm = decode_match(&key, Some(&mask), &CtAvailable, &Log::quiet())
            .unwrap();
        let mask = fm.mask.unwrap();
        assert_eq!(mask.key.ipv4.src, [255, 255, 255, 0]);
        assert_eq!(mask.key.ipv4.dst, [0; 4]);
        assert_eq!(mask.key.tp.src.get(), 0);
        // Forced exact regardless of the mask stream.
        assert_eq!(mask.key.mac_proto, 0xff);
        assert_eq!(mask.key.eth.vlan.tci.get(), 0xffff);
    }

    #[test]
    fn mask_bits_inside_range() {
        let fm = exact(&tcp_stream(0)).unwrap();
        let mask = fm.mask.unwrap();
        let bytes = zerocopy::IntoBytes::as_bytes(&mask.key);
        for (i, b) in bytes.iter().enumerate() {
            if *b != 0 {
                assert!(mask.range.contains(i), "mask byte {i} outside range");
            }
        }
    }

    #[test]
    fn exact_tunnel_mask() {
        let mut w = AttrWriter::new();
        let tun = w.begin_nested(KeyAttr::Tunnel);
        w.put(TunnelAttr::Ipv4Dst, &[192, 168, 0, 1]);
        w.put_u8(TunnelAttr::Ttl, 64);
        w.end_nested(tun);
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let fm = exact(&w.into_bytes().unwrap()).unwrap();

        let mask = fm.mask.unwrap();
        // Fields the key omitted are still matched exactly.
        assert_eq!(mask.key.tun_key.ipv4_src, [0xff; 4]);
        assert_eq!(mask.key.tun_key.tun_id.get(), u64::MAX);
        assert_eq!(mask.key.tun_proto, 0xff);
    }

    #[test]
    fn flow_metadata() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::SkbMark, 9);
        w.put_u32(KeyAttr::CtMark, 4);
        w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(SRC, DST));
        let buf = w.into_bytes().unwrap();
        let key = decode_flow_metadata(&buf, &NoCt, &Log::quiet()).unwrap();
        assert_eq!(key.phy.skb_mark.get(), 9);
        assert_eq!(key.phy.in_port.get(), DP_MAX_PORTS);
        assert_eq!(key.ct.mark.get(), 0);
        // Packet fields are not touched.
        assert_eq!(key.eth.src, [0; 6]);
    }
}
