// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Action serialization, the inverse of [`super::compile`].
//!
//! A compiled buffer is trusted: nothing is validated again. The
//! records the compiler rewrote are turned back into the form a user
//! would have written, and everything else is copied through.

use super::Result;
use super::action_buf::ActionBuffer;
use super::nlattr::Attr;
use super::nlattr::AttrIter;
use super::nlattr::AttrWriter;
use super::nsh::put_nsh_value_half;
use crate::api::ActionAttr;
use crate::api::CheckPktLenAttr;
use crate::api::CloneAttr;
use crate::api::DecTtlAttr;
use crate::api::FlowError;
use crate::api::KeyAttr;
use crate::api::SampleAttr;
use crate::api::wire::CheckPktLenArg;
use crate::api::wire::SampleArg;
use alloc::vec::Vec;

/// Render a compiled action buffer as an action attribute stream.
pub fn serialize_actions(buf: &ActionBuffer) -> Result<Vec<u8>> {
    let mut w = AttrWriter::new();
    put_actions(&mut w, buf.as_bytes(), buf)?;
    w.into_bytes()
}

/// Append the user form of the compiled `actions`, a list held in
/// `buf`, to `w`.
pub fn put_actions(
    w: &mut AttrWriter,
    actions: &[u8],
    buf: &ActionBuffer,
) -> Result<()> {
    for a in AttrIter::new(actions) {
        match ActionAttr::try_from(a.ty()) {
            Ok(ActionAttr::SetToMasked) => put_set_to_masked(w, a)?,
            Ok(ActionAttr::Set) => put_set(w, a, buf)?,
            Ok(ActionAttr::Sample) => put_sample(w, a, buf)?,
            Ok(ActionAttr::Clone) => put_clone(w, a, buf)?,
            Ok(ActionAttr::CheckPktLen) => put_check_pkt_len(w, a, buf)?,
            Ok(ActionAttr::DecTtl) => put_dec_ttl(w, a, buf)?,
            _ => w.put(a.ty(), a.data()),
        }
    }

    Ok(())
}

fn only_child<'a>(a: Attr<'a>) -> Result<Attr<'a>> {
    a.nested().next().ok_or_else(|| {
        FlowError::invalid(format!("empty compiled action {}", a.ty()))
    })
}

/// The data following the first record in `a`, which the compiler
/// uses for the block's argument.
fn after_first<'a>(a: Attr<'a>) -> (Option<Attr<'a>>, &'a [u8]) {
    let mut iter = a.nested();
    let first = iter.next();
    let rest = &a.data()[a.len() - iter.remaining()..];
    (first, rest)
}

fn put_set_to_masked(w: &mut AttrWriter, a: Attr<'_>) -> Result<()> {
    let inner = only_child(a)?;

    if inner.ty() == u16::from(KeyAttr::Nsh) {
        let nest = w.begin_nested(ActionAttr::Set);
        put_nsh_value_half(w, inner);
        w.end_nested(nest);
        return Ok(());
    }

    let nest = w.begin_nested(ActionAttr::Set);
    w.put(inner.ty(), &inner.data()[..inner.len() / 2]);
    w.end_nested(nest);
    Ok(())
}

fn put_set(w: &mut AttrWriter, a: Attr<'_>, buf: &ActionBuffer) -> Result<()> {
    let inner = only_child(a)?;
    if inner.ty() != u16::from(KeyAttr::TunnelInfo) {
        w.put(a.ty(), a.data());
        return Ok(());
    }

    let idx = inner.read_u32()?;
    let dst = buf.tunnel(idx).ok_or_else(|| {
        FlowError::invalid(format!("no tunnel destination {idx}"))
    })?;

    let nest = w.begin_nested(ActionAttr::Set);
    dst.info().encode(w);
    w.end_nested(nest);
    Ok(())
}

fn put_sample(
    w: &mut AttrWriter,
    a: Attr<'_>,
    buf: &ActionBuffer,
) -> Result<()> {
    let (arg, actions) = after_first(a);
    let arg: SampleArg = match arg {
        Some(arg) => arg.read()?,
        None => return Err(FlowError::invalid("sample without argument")),
    };

    let nest = w.begin_nested(ActionAttr::Sample);
    w.put_u32(SampleAttr::Probability, arg.probability.get());
    let acts = w.begin_nested(SampleAttr::Actions);
    put_actions(w, actions, buf)?;
    w.end_nested(acts);
    w.end_nested(nest);
    Ok(())
}

fn put_clone(
    w: &mut AttrWriter,
    a: Attr<'_>,
    buf: &ActionBuffer,
) -> Result<()> {
    // The exec record is internal; only the actions go out.
    let (exec, actions) = after_first(a);
    if exec.map(|e| e.ty()) != Some(u16::from(CloneAttr::Exec)) {
        return Err(FlowError::invalid("clone without exec record"));
    }

    let nest = w.begin_nested(ActionAttr::Clone);
    put_actions(w, actions, buf)?;
    w.end_nested(nest);
    Ok(())
}

fn put_check_pkt_len(
    w: &mut AttrWriter,
    a: Attr<'_>,
    buf: &ActionBuffer,
) -> Result<()> {
    let mut arg = None;
    let mut le = None;
    let mut gt = None;

    for sub in a.nested() {
        match CheckPktLenAttr::try_from(sub.ty()) {
            Ok(CheckPktLenAttr::Arg) => {
                arg = Some(sub.read::<CheckPktLenArg>()?);
            }
            Ok(CheckPktLenAttr::ActionsIfLessEqual) => le = Some(sub),
            Ok(CheckPktLenAttr::ActionsIfGreater) => gt = Some(sub),
            _ => {}
        }
    }

    let (Some(arg), Some(le), Some(gt)) = (arg, le, gt) else {
        return Err(FlowError::invalid("incomplete compiled check_pkt_len"));
    };

    let nest = w.begin_nested(ActionAttr::CheckPktLen);
    w.put_u16(CheckPktLenAttr::PktLen, arg.pkt_len.get());

    let branch = w.begin_nested(CheckPktLenAttr::ActionsIfLessEqual);
    put_actions(w, le.data(), buf)?;
    w.end_nested(branch);

    let branch = w.begin_nested(CheckPktLenAttr::ActionsIfGreater);
    put_actions(w, gt.data(), buf)?;
    w.end_nested(branch);

    w.end_nested(nest);
    Ok(())
}

fn put_dec_ttl(
    w: &mut AttrWriter,
    a: Attr<'_>,
    buf: &ActionBuffer,
) -> Result<()> {
    let nest = w.begin_nested(ActionAttr::DecTtl);
    for sub in a.nested() {
        if sub.ty() != u16::from(DecTtlAttr::Action) {
            continue;
        }

        let acts = w.begin_nested(DecTtlAttr::Action);
        put_actions(w, sub.data(), buf)?;
        w.end_nested(acts);
    }
    w.end_nested(nest);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ETHER_TYPE_IPV4;
    use crate::api::ETHER_TYPE_NSH;
    use crate::api::MacProto;
    use crate::api::NshAttr;
    use crate::api::TUN_P_IPV4;
    use crate::api::TunnelAttr;
    use crate::api::wire::Be16;
    use crate::api::wire::Be32;
    use crate::api::wire::KeyIpv4;
    use crate::api::wire::NSH_M_TYPE1;
    use crate::api::wire::NshBase;
    use crate::api::wire::NshMd1;
    use crate::engine::DecodeCfg;
    use crate::engine::Log;
    use crate::engine::compile::compile_actions;
    use crate::engine::key::FlowKey;
    use crate::engine::key::MatchBuilder;
    use crate::engine::tunnel::decode_tunnel;
    use zerocopy::IntoBytes;

    fn actions(build: impl FnOnce(&mut AttrWriter)) -> Vec<u8> {
        let mut w = AttrWriter::new();
        build(&mut w);
        w.into_bytes().unwrap()
    }

    fn ipv4_key() -> FlowKey {
        let mut key = FlowKey::new();
        key.mac_proto = MacProto::Ethernet as u8;
        key.eth.ty = Be16::new(ETHER_TYPE_IPV4);
        key
    }

    fn roundtrip(stream: &[u8], key: &FlowKey) -> Vec<u8> {
        let buf = compile_actions(stream, key, &DecodeCfg::default()).unwrap();
        serialize_actions(&buf).unwrap()
    }

    #[test]
    fn set_priority_and_output() {
        let stream = actions(|w| {
            let nest = w.begin_nested(ActionAttr::Set);
            w.put_u32(KeyAttr::Priority, 7);
            w.end_nested(nest);
            w.put_u32(ActionAttr::Output, 3);
        });

        assert_eq!(roundtrip(&stream, &FlowKey::new()), stream);
    }

    #[test]
    fn nested_blocks() {
        let ipv4 = KeyIpv4 { ttl: 3, ..Default::default() };
        let stream = actions(|w| {
            let nest = w.begin_nested(ActionAttr::Sample);
            w.put_u32(SampleAttr::Probability, 1000);
            let acts = w.begin_nested(SampleAttr::Actions);
            let set = w.begin_nested(ActionAttr::Set);
            w.put_record(KeyAttr::Ipv4, &ipv4);
            w.end_nested(set);
            w.put_u32(ActionAttr::Output, 1);
            w.end_nested(acts);
            w.end_nested(nest);

            let nest = w.begin_nested(ActionAttr::Clone);
            w.put_u32(ActionAttr::Output, 2);
            w.end_nested(nest);

            let nest = w.begin_nested(ActionAttr::CheckPktLen);
            w.put_u16(CheckPktLenAttr::PktLen, 1400);
            let le = w.begin_nested(CheckPktLenAttr::ActionsIfLessEqual);
            w.put_u32(ActionAttr::Output, 3);
            w.end_nested(le);
            let gt = w.begin_nested(CheckPktLenAttr::ActionsIfGreater);
            w.put_u32(ActionAttr::Output, 4);
            w.end_nested(gt);
            w.end_nested(nest);

            let nest = w.begin_nested(ActionAttr::DecTtl);
            let acts = w.begin_nested(DecTtlAttr::Action);
            w.put_u32(ActionAttr::Output, 5);
            w.end_nested(acts);
            w.end_nested(nest);
        });

        assert_eq!(roundtrip(&stream, &ipv4_key()), stream);
    }

    #[test]
    fn masked_sets_pass_through() {
        let val = KeyIpv4 { tos: 0x04, ..Default::default() };
        let mask = KeyIpv4 { tos: 0xfc, ..Default::default() };
        let stream = actions(|w| {
            let nest = w.begin_nested(ActionAttr::SetMasked);
            w.put(KeyAttr::Ipv4, &[val.as_bytes(), mask.as_bytes()].concat());
            w.end_nested(nest);
        });

        assert_eq!(roundtrip(&stream, &ipv4_key()), stream);
    }

    #[test]
    fn nsh_set() {
        let mut key = FlowKey::new();
        key.eth.ty = Be16::new(ETHER_TYPE_NSH);

        let base = NshBase {
            mdtype: NSH_M_TYPE1,
            np: TUN_P_IPV4,
            ttl: 8,
            path_hdr: Be32::new(0x0000_1001),
            ..Default::default()
        };
        let md1 = NshMd1 { context: [Be32::new(9); 4] };
        let stream = actions(|w| {
            let set = w.begin_nested(ActionAttr::Set);
            let nest = w.begin_nested(KeyAttr::Nsh);
            w.put_record(NshAttr::Base, &base);
            w.put_record(NshAttr::Md1, &md1);
            w.end_nested(nest);
            w.end_nested(set);
        });

        assert_eq!(roundtrip(&stream, &key), stream);
    }

    #[test]
    fn tunnel_set_expands_side_table() {
        let stream = actions(|w| {
            let set = w.begin_nested(ActionAttr::Set);
            let tun = w.begin_nested(KeyAttr::Tunnel);
            w.put_be64(TunnelAttr::Id, 77);
            w.put(TunnelAttr::Ipv4Dst, &[10, 0, 0, 9]);
            w.put_u8(TunnelAttr::Ttl, 32);
            w.end_nested(tun);
            w.end_nested(set);
        });

        let out = roundtrip(&stream, &ipv4_key());
        let set = AttrIter::new(&out).next().unwrap();
        assert_eq!(set.ty(), u16::from(ActionAttr::Set));
        let tun = set.nested().next().unwrap();
        assert_eq!(tun.ty(), u16::from(KeyAttr::Tunnel));

        let mut m = MatchBuilder::new();
        decode_tunnel(tun, &mut m, false, &Log::quiet()).unwrap();
        assert_eq!(m.key.tun_key.tun_id.get(), 77);
        assert_eq!(m.key.tun_key.ipv4_dst, [10, 0, 0, 9]);
        assert_eq!(m.key.tun_key.ttl, 32);
    }
}
