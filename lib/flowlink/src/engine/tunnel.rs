// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tunnel key decode and encode.

use super::Log;
use super::Result;
use super::key::FlowKey;
use super::key::MatchBuilder;
use super::key::TunKey;
use super::nlattr::Attr;
use super::nlattr::AttrWriter;
use super::nlattr::ParsedAttrs;
use super::schema::TUNNEL_SCHEMA;
use super::schema::VXLAN_EXT_SCHEMA;
use crate::api::FlowError;
use crate::api::GeneveOptIter;
use crate::api::KeyAttr;
use crate::api::TUN_OPTS_MAX;
use crate::api::TUN_PROTO_INET;
use crate::api::TUN_PROTO_INET6;
use crate::api::TunnelAttr;
use crate::api::TunnelFlags;
use crate::api::TunnelMode;
use crate::api::TunnelOpts;
use crate::api::VxlanExtAttr;
use crate::api::wire::Be16;
use crate::api::wire::Be64;
use crate::api::wire::ErspanMetadata;
use crate::api::wire::Ne16;
use crate::nlerr;

/// Decode a tunnel attribute into one side of `m`.
///
/// Returns the flag naming the option sub-format that was present, if
/// any. On the mask side this must run after the key side, since a
/// Geneve mask must cover exactly the key's options.
///
/// # Errors
///
/// Besides parse errors: more than one option block, options that are
/// too long or misaligned, a mask whose Geneve length differs from the
/// key's, or mixed IPv4 and IPv6 endpoints. A key must also name an
/// address family with a nonzero destination and a TTL, unless it is a
/// bridge mode placeholder carrying nothing but the tunnel id.
pub fn decode_tunnel(
    attr: Attr<'_>,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<TunnelFlags> {
    // Flag records have empty values, so a mask tunnel is parsed with
    // key semantics to keep them.
    let attrs = ParsedAttrs::parse(attr.data(), &TUNNEL_SCHEMA, false, log)?;
    let mut flags = TunnelFlags::empty();
    let mut opts_type = TunnelFlags::empty();
    let mut ttl = false;
    let mut ipv4 = false;
    let mut ipv6 = false;
    let mut bridge = false;

    for ty in attrs.present().iter() {
        let Some(a) = attrs.get(ty) else {
            continue;
        };
        let Ok(ty) = TunnelAttr::try_from(ty) else {
            continue;
        };

        match ty {
            TunnelAttr::Id => {
                put!(m, tun_key.tun_id, Be64::new(a.read_be64()?), is_mask);
                flags |= TunnelFlags::KEY;
            }

            TunnelAttr::Ipv4Src => {
                put!(m, tun_key.ipv4_src, a.read()?, is_mask);
                ipv4 = true;
            }

            TunnelAttr::Ipv4Dst => {
                put!(m, tun_key.ipv4_dst, a.read()?, is_mask);
                ipv4 = true;
            }

            TunnelAttr::Ipv6Src => {
                put!(m, tun_key.ipv6_src, a.read()?, is_mask);
                ipv6 = true;
            }

            TunnelAttr::Ipv6Dst => {
                put!(m, tun_key.ipv6_dst, a.read()?, is_mask);
                ipv6 = true;
            }

            TunnelAttr::Tos => put!(m, tun_key.tos, a.read_u8()?, is_mask),

            TunnelAttr::Ttl => {
                put!(m, tun_key.ttl, a.read_u8()?, is_mask);
                ttl = true;
            }

            TunnelAttr::DontFragment => flags |= TunnelFlags::DONT_FRAGMENT,
            TunnelAttr::Csum => flags |= TunnelFlags::CSUM,
            TunnelAttr::Oam => flags |= TunnelFlags::OAM,

            TunnelAttr::TpSrc => {
                put!(m, tun_key.tp_src, Be16::new(a.read_be16()?), is_mask)
            }

            TunnelAttr::TpDst => {
                put!(m, tun_key.tp_dst, Be16::new(a.read_be16()?), is_mask)
            }

            TunnelAttr::GeneveOpts
            | TunnelAttr::VxlanOpts
            | TunnelAttr::ErspanOpts => {
                if !opts_type.is_empty() {
                    return Err(log.fail(FlowError::invalid(
                        "multiple tunnel metadata blocks",
                    )));
                }

                opts_type = match ty {
                    TunnelAttr::GeneveOpts => {
                        geneve_opts(a, m, is_mask, log)?;
                        TunnelFlags::GENEVE_OPT
                    }
                    TunnelAttr::VxlanOpts => {
                        vxlan_opts(a, m, is_mask, log)?;
                        TunnelFlags::VXLAN_OPT
                    }
                    _ => {
                        erspan_opts(a, m, is_mask, log)?;
                        TunnelFlags::ERSPAN_OPT
                    }
                };
                flags |= opts_type;
            }

            TunnelAttr::Ipv4InfoBridge => {
                bridge = true;
                ipv4 = true;
            }

            TunnelAttr::Pad => {}
        }
    }

    put!(m, tun_key.flags, Ne16::new(flags.bits()), is_mask);
    if is_mask {
        put!(m, tun_proto, 0xff, true);
    } else {
        let proto = if ipv6 { TUN_PROTO_INET6 } else { TUN_PROTO_INET };
        put!(m, tun_proto, proto, false);
    }

    if ipv4 && ipv6 {
        return Err(log.fail(FlowError::unsupported(
            "mixed IPv4 and IPv6 tunnel attributes",
        )));
    }

    if !is_mask {
        check_tunnel_key(&m.key, ipv4, ipv6, ttl, bridge, log)?;
    }

    Ok(opts_type)
}

fn check_tunnel_key(
    key: &FlowKey,
    ipv4: bool,
    ipv6: bool,
    ttl: bool,
    bridge: bool,
    log: &Log,
) -> Result<()> {
    let tun = &key.tun_key;

    if !ipv4 && !ipv6 {
        return Err(log.fail(FlowError::invalid(
            "tunnel destination address not specified",
        )));
    }

    if ipv4 {
        if bridge {
            let extra = key.tun_flags().difference(TunnelFlags::KEY);
            if tun.ipv4_src != [0; 4]
                || tun.ipv4_dst != [0; 4]
                || tun.tp_src.get() != 0
                || tun.tp_dst.get() != 0
                || tun.ttl != 0
                || tun.tos != 0
                || !extra.is_empty()
            {
                return Err(log.fail(FlowError::invalid(
                    "bridge mode tunnel carries more than an id",
                )));
            }
        } else if tun.ipv4_dst == [0; 4] {
            return Err(log.fail(FlowError::invalid(
                "IPv4 tunnel destination is zero",
            )));
        }
    }

    if ipv6 && tun.ipv6_dst == [0; 16] {
        return Err(log.fail(FlowError::invalid(
            "IPv6 tunnel destination is zero",
        )));
    }

    if !ttl && !bridge {
        return Err(log.fail(FlowError::invalid("tunnel TTL not specified")));
    }

    Ok(())
}

fn geneve_opts(
    a: Attr<'_>,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    let len = a.len();

    if len > TUN_OPTS_MAX {
        return Err(log.fail(FlowError::invalid(format!(
            "geneve options length {len} exceeds {TUN_OPTS_MAX}"
        ))));
    }

    if len % 4 != 0 {
        return Err(log.fail(FlowError::invalid(format!(
            "geneve options length {len} is not a multiple of 4"
        ))));
    }

    // The option length itself is never wildcarded: a mask has to
    // cover exactly the options the key carries.
    if is_mask {
        let key_len = usize::from(m.key.tun_opts_len.get());
        if key_len != len {
            return Err(log.fail(FlowError::invalid(format!(
                "geneve option length {key_len} differs from mask length {len}"
            ))));
        }
        put!(m, tun_opts_len, Ne16::new(u16::MAX), true);
    } else {
        // Bounded by TUN_OPTS_MAX above.
        put!(m, tun_opts_len, Ne16::new(len as u16), false);
    }

    m.put_tun_opts(a.data(), is_mask);
    Ok(())
}

fn vxlan_opts(
    a: Attr<'_>,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    let ext = ParsedAttrs::parse(a.data(), &VXLAN_EXT_SCHEMA, false, log)?;
    let gbp = match ext.get(VxlanExtAttr::Gbp) {
        Some(gbp) => gbp.read_u32()?,
        None => 0,
    };

    let len = if is_mask { u16::MAX } else { size_of::<u32>() as u16 };
    put!(m, tun_opts_len, Ne16::new(len), is_mask);
    m.put_tun_opts(&gbp.to_ne_bytes(), is_mask);
    Ok(())
}

fn erspan_opts(
    a: Attr<'_>,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    let md_len = size_of::<ErspanMetadata>();
    if a.len() != md_len {
        return Err(log.fail(FlowError::invalid(format!(
            "erspan metadata length {} should be {md_len}",
            a.len()
        ))));
    }

    let len = if is_mask { u16::MAX } else { md_len as u16 };
    put!(m, tun_opts_len, Ne16::new(len), is_mask);
    m.put_tun_opts(a.data(), is_mask);
    Ok(())
}

/// Whether any Geneve option in `opts` is critical.
///
/// # Errors
///
/// An option whose header or declared body runs past the end.
pub fn geneve_crit_opt(opts: &[u8], log: &Log) -> Result<bool> {
    let mut crit = false;
    for opt in GeneveOptIter::new(opts) {
        let opt = opt.map_err(|e| log.fail(e))?;
        if opt.is_critical() {
            nlerr!(log, "critical geneve option";
                "class" => opt.class, "type" => opt.ty);
            crit = true;
        }
    }
    Ok(crit)
}

/// Write a nested tunnel attribute.
///
/// `opts` are the option bytes to write, interpreted per the flags in
/// `tun`; `proto` is the endpoint address family. In bridge mode only
/// the tunnel id and the bridge marker are written.
pub fn encode_tunnel(
    w: &mut AttrWriter,
    tun: &TunKey,
    opts: &[u8],
    proto: u8,
    mode: TunnelMode,
) {
    let nest = w.begin_nested(KeyAttr::Tunnel);
    encode_tunnel_attrs(w, tun, opts, proto, mode);
    w.end_nested(nest);
}

fn encode_tunnel_attrs(
    w: &mut AttrWriter,
    tun: &TunKey,
    opts: &[u8],
    proto: u8,
    mode: TunnelMode,
) {
    let flags = TunnelFlags::from_bits_retain(tun.flags.get());

    if flags.contains(TunnelFlags::KEY) {
        w.put_be64(TunnelAttr::Id, tun.tun_id.get());
    }

    if mode.contains(TunnelMode::BRIDGE) {
        w.put_flag(TunnelAttr::Ipv4InfoBridge);
        return;
    }

    match proto {
        TUN_PROTO_INET => {
            if tun.ipv4_src != [0; 4] {
                w.put(TunnelAttr::Ipv4Src, &tun.ipv4_src);
            }
            if tun.ipv4_dst != [0; 4] {
                w.put(TunnelAttr::Ipv4Dst, &tun.ipv4_dst);
            }
        }
        TUN_PROTO_INET6 => {
            if tun.ipv6_src != [0; 16] {
                w.put(TunnelAttr::Ipv6Src, &tun.ipv6_src);
            }
            if tun.ipv6_dst != [0; 16] {
                w.put(TunnelAttr::Ipv6Dst, &tun.ipv6_dst);
            }
        }
        _ => {}
    }

    if tun.tos != 0 {
        w.put_u8(TunnelAttr::Tos, tun.tos);
    }
    w.put_u8(TunnelAttr::Ttl, tun.ttl);

    if flags.contains(TunnelFlags::DONT_FRAGMENT) {
        w.put_flag(TunnelAttr::DontFragment);
    }
    if flags.contains(TunnelFlags::CSUM) {
        w.put_flag(TunnelAttr::Csum);
    }
    if tun.tp_src.get() != 0 {
        w.put_be16(TunnelAttr::TpSrc, tun.tp_src.get());
    }
    if tun.tp_dst.get() != 0 {
        w.put_be16(TunnelAttr::TpDst, tun.tp_dst.get());
    }
    if flags.contains(TunnelFlags::OAM) {
        w.put_flag(TunnelAttr::Oam);
    }

    if opts.is_empty() {
        return;
    }

    if flags.contains(TunnelFlags::GENEVE_OPT) {
        w.put(TunnelAttr::GeneveOpts, opts);
    } else if flags.contains(TunnelFlags::VXLAN_OPT) {
        let nest = w.begin_nested(TunnelAttr::VxlanOpts);
        if let Ok(gbp) = <[u8; 4]>::try_from(opts) {
            let gbp = u32::from_ne_bytes(gbp);
            if gbp != 0 {
                w.put_u32(VxlanExtAttr::Gbp, gbp);
            }
        }
        w.end_nested(nest);
    } else if flags.contains(TunnelFlags::ERSPAN_OPT) {
        w.put(TunnelAttr::ErspanOpts, opts);
    }
}

/// A decoded tunnel destination, as attached to a set tunnel action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelInfo {
    pub key: TunKey,
    /// Endpoint address family.
    pub proto: u8,
    pub opts: TunnelOpts,
    pub mode: TunnelMode,
}

impl TunnelInfo {
    /// Build the tunnel info for a key decoded from a set action.
    pub fn from_key(key: &FlowKey) -> Self {
        let mut mode = TunnelMode::TX;
        if key.tun_proto == TUN_PROTO_INET6 {
            mode |= TunnelMode::IPV6;
        } else if key.tun_key.ipv4_dst == [0; 4] {
            mode |= TunnelMode::BRIDGE;
        }

        Self {
            key: key.tun_key,
            proto: key.tun_proto,
            opts: key.tun_opts(),
            mode,
        }
    }

    pub fn flags(&self) -> TunnelFlags {
        TunnelFlags::from_bits_retain(self.key.flags.get())
    }

    /// Write this tunnel as a nested tunnel key attribute.
    pub fn encode(&self, w: &mut AttrWriter) {
        encode_tunnel(
            w,
            &self.key,
            &self.opts.to_bytes(),
            self.proto,
            self.mode,
        );
    }
}

/// The worst-case encoded size of a tunnel attribute's contents.
pub const fn tun_key_attr_size() -> usize {
    use super::nlattr::nla_total_size;

    nla_total_size(8)        // Id
        + nla_total_size(16) // Ipv4Src or Ipv6Src
        + nla_total_size(16) // Ipv4Dst or Ipv6Dst
        + nla_total_size(1)  // Tos
        + nla_total_size(1)  // Ttl
        + nla_total_size(0)  // DontFragment
        + nla_total_size(0)  // Csum
        + nla_total_size(0)  // Oam
        // Geneve options; VXLAN and ERSPAN are exclusive with it and
        // smaller.
        + nla_total_size(TUN_OPTS_MAX)
        + nla_total_size(2)  // TpSrc
        + nla_total_size(2) // TpDst
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::wire::Ne32;
    use crate::engine::nlattr::AttrIter;

    fn tunnel_attr(build: impl FnOnce(&mut AttrWriter)) -> alloc::vec::Vec<u8> {
        let mut w = AttrWriter::new();
        build(&mut w);
        w.into_bytes().unwrap()
    }

    fn decode(
        buf: &[u8],
        m: &mut MatchBuilder,
        is_mask: bool,
    ) -> Result<TunnelFlags> {
        let attr = Attr::new(KeyAttr::Tunnel as u16, buf);
        decode_tunnel(attr, m, is_mask, &Log::quiet())
    }

    #[test]
    fn ipv4_tunnel() {
        let buf = tunnel_attr(|w| {
            w.put_be64(TunnelAttr::Id, 0x1234);
            w.put(TunnelAttr::Ipv4Src, &[172, 16, 0, 1]);
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put_flag(TunnelAttr::DontFragment);
            w.put_be16(TunnelAttr::TpDst, 4789);
        });

        let mut m = MatchBuilder::new();
        let opts = decode(&buf, &mut m, false).unwrap();
        assert!(opts.is_empty());
        assert_eq!(m.key.tun_key.tun_id.get(), 0x1234);
        assert_eq!(m.key.tun_key.ipv4_dst, [172, 16, 0, 2]);
        assert_eq!(m.key.tun_proto, TUN_PROTO_INET);
        assert_eq!(
            m.key.tun_flags(),
            TunnelFlags::KEY | TunnelFlags::DONT_FRAGMENT
        );
    }

    #[test]
    fn missing_ttl() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
        });
        let mut m = MatchBuilder::new();
        assert!(matches!(
            decode(&buf, &mut m, false),
            Err(FlowError::Invalid(_))
        ));
    }

    #[test]
    fn zero_destination() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv6Dst, &[0; 16]);
            w.put_u8(TunnelAttr::Ttl, 64);
        });
        let mut m = MatchBuilder::new();
        assert!(matches!(
            decode(&buf, &mut m, false),
            Err(FlowError::Invalid(_))
        ));
    }

    #[test]
    fn mixed_families() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put(TunnelAttr::Ipv6Dst, &[0xfd; 16]);
            w.put_u8(TunnelAttr::Ttl, 64);
        });
        let mut m = MatchBuilder::new();
        assert!(matches!(
            decode(&buf, &mut m, false),
            Err(FlowError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn bridge_mode() {
        let buf = tunnel_attr(|w| {
            w.put_be64(TunnelAttr::Id, 7);
            w.put_flag(TunnelAttr::Ipv4InfoBridge);
        });
        let mut m = MatchBuilder::new();
        decode(&buf, &mut m, false).unwrap();
        assert_eq!(
            TunnelInfo::from_key(&m.key).mode,
            TunnelMode::TX | TunnelMode::BRIDGE
        );

        // Anything beyond the id is rejected.
        let buf = tunnel_attr(|w| {
            w.put_be64(TunnelAttr::Id, 7);
            w.put_flag(TunnelAttr::Ipv4InfoBridge);
            w.put_u8(TunnelAttr::Ttl, 64);
        });
        let mut m = MatchBuilder::new();
        assert!(decode(&buf, &mut m, false).is_err());
    }

    #[test]
    fn multiple_option_blocks() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put(TunnelAttr::GeneveOpts, &[0x01, 0x29, 0x00, 0x00]);
            let nest = w.begin_nested(TunnelAttr::VxlanOpts);
            w.put_u32(VxlanExtAttr::Gbp, 5);
            w.end_nested(nest);
        });
        let mut m = MatchBuilder::new();
        assert_eq!(
            decode(&buf, &mut m, false),
            Err(FlowError::invalid("multiple tunnel metadata blocks"))
        );
    }

    #[test]
    fn geneve_key_and_mask() {
        let opts = [0x01, 0x29, 0x80, 0x01, 0xde, 0xad, 0xbe, 0xef];
        let key = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put(TunnelAttr::GeneveOpts, &opts);
        });

        let mut m = MatchBuilder::new();
        let ty = decode(&key, &mut m, false).unwrap();
        assert_eq!(ty, TunnelFlags::GENEVE_OPT);
        assert_eq!(m.key.tun_opts(), TunnelOpts::Geneve(opts.to_vec()));
        let crit = geneve_crit_opt(m.key.tun_opts_bytes(), &Log::quiet());
        assert!(crit.unwrap());

        // A mask over fewer bytes than the key carries is rejected.
        let short = tunnel_attr(|w| {
            w.put(TunnelAttr::GeneveOpts, &[0xff; 4]);
        });
        assert!(decode(&short, &mut m, true).is_err());

        let mask = tunnel_attr(|w| {
            w.put(TunnelAttr::GeneveOpts, &[0xff; 8]);
        });
        decode(&mask, &mut m, true).unwrap();
        assert_eq!(m.mask.key.tun_opts_len.get(), u16::MAX);
        assert_eq!(m.mask.key.tun_proto, 0xff);
        assert_eq!(&m.mask.key.tun_opts[TUN_OPTS_MAX - 8..], &[0xff; 8]);
    }

    #[test]
    fn geneve_misaligned() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put(TunnelAttr::GeneveOpts, &[0x01, 0x29, 0x00]);
        });
        let mut m = MatchBuilder::new();
        assert!(matches!(
            decode(&buf, &mut m, false),
            Err(FlowError::Invalid(_))
        ));
    }

    #[test]
    fn vxlan_and_erspan() {
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            let nest = w.begin_nested(TunnelAttr::VxlanOpts);
            w.put_u32(VxlanExtAttr::Gbp, 0x77);
            w.end_nested(nest);
        });
        let mut m = MatchBuilder::new();
        decode(&buf, &mut m, false).unwrap();
        assert_eq!(m.key.tun_opts(), TunnelOpts::Vxlan { gbp: 0x77 });

        let md = ErspanMetadata {
            version: Ne32::new(1),
            body: [0, 0, 0, 9, 0, 0, 0, 0],
        };
        let buf = tunnel_attr(|w| {
            w.put(TunnelAttr::Ipv4Dst, &[172, 16, 0, 2]);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put_record(TunnelAttr::ErspanOpts, &md);
        });
        let mut m = MatchBuilder::new();
        decode(&buf, &mut m, false).unwrap();
        match m.key.tun_opts() {
            TunnelOpts::Erspan(got) => assert_eq!(got.index(), 9),
            other => panic!("unexpected options {other:?}"),
        }
    }

    #[test]
    fn encode_roundtrip() {
        let buf = tunnel_attr(|w| {
            w.put_be64(TunnelAttr::Id, 0x1234);
            w.put(TunnelAttr::Ipv6Src, &[0xfd; 16]);
            w.put(TunnelAttr::Ipv6Dst, &[0xfe; 16]);
            w.put_u8(TunnelAttr::Tos, 0x10);
            w.put_u8(TunnelAttr::Ttl, 64);
            w.put_flag(TunnelAttr::Csum);
            w.put_be16(TunnelAttr::TpSrc, 1000);
            w.put(TunnelAttr::GeneveOpts, &[0x01, 0x29, 0x00, 0x00]);
        });
        let mut m = MatchBuilder::new();
        decode(&buf, &mut m, false).unwrap();

        let info = TunnelInfo::from_key(&m.key);
        assert_eq!(info.mode, TunnelMode::TX | TunnelMode::IPV6);
        let mut w = AttrWriter::new();
        info.encode(&mut w);

        let mut again = MatchBuilder::new();
        let outer = AttrIter::new(w.as_bytes()).next().unwrap();
        decode(outer.data(), &mut again, false).unwrap();
        assert_eq!(again.key.tun_key, m.key.tun_key);
        assert_eq!(again.key.tun_opts_bytes(), m.key.tun_opts_bytes());
    }
}
