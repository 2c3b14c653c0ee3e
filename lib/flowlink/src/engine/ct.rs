// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Connection tracking key fields.

use super::Log;
use super::NetContext;
use super::Result;
use super::key::FlowKey;
use super::key::MatchBuilder;
use super::nlattr::AttrSet;
use super::nlattr::AttrWriter;
use super::nlattr::ParsedAttrs;
use crate::api::CT_SUPPORTED_MASK;
use crate::api::ETHER_TYPE_IPV4;
use crate::api::ETHER_TYPE_IPV6;
use crate::api::FlowError;
use crate::api::KeyAttr;
use crate::api::wire::KeyCtTupleIpv4;
use crate::api::wire::KeyCtTupleIpv6;
use crate::api::wire::Ne16;
use crate::api::wire::Ne32;

/// The connection tracking summary fields: state, zone, mark and
/// labels. Each is only consumed when `net` supports it.
pub(crate) const CT_SUMMARY: [KeyAttr; 4] = [
    KeyAttr::CtState,
    KeyAttr::CtZone,
    KeyAttr::CtMark,
    KeyAttr::CtLabels,
];

/// Decode the connection tracking fields still in `left`, removing
/// each one consumed.
pub(crate) fn decode_ct(
    attrs: &ParsedAttrs<'_>,
    left: &mut AttrSet,
    m: &mut MatchBuilder,
    is_mask: bool,
    net: &dyn NetContext,
    log: &Log,
) -> Result<()> {
    for ty in CT_SUMMARY {
        if !left.contains(ty) || !net.ct_supports(ty) {
            continue;
        }
        let Some(a) = attrs.get(ty) else {
            continue;
        };

        match ty {
            KeyAttr::CtState => {
                let state = a.read_u32()?;
                if state & !CT_SUPPORTED_MASK != 0 {
                    return Err(log.fail(FlowError::invalid(format!(
                        "ct_state flags {state:#010x} unsupported"
                    ))));
                }
                // Every supported bit fits in the low byte.
                put!(m, ct.state, state as u8, is_mask);
            }
            KeyAttr::CtZone => {
                put!(m, ct.zone, Ne16::new(a.read_u16()?), is_mask)
            }
            KeyAttr::CtMark => {
                put!(m, ct.mark, Ne32::new(a.read_u32()?), is_mask)
            }
            _ => put!(m, ct.labels, a.read()?, is_mask),
        }

        left.remove(ty);
    }

    if left.contains(KeyAttr::CtOrigTupleIpv4) {
        if let Some(a) = attrs.get(KeyAttr::CtOrigTupleIpv4) {
            let tuple: KeyCtTupleIpv4 = a.read()?;
            put!(m, ipv4.ct_orig_src, tuple.src, is_mask);
            put!(m, ipv4.ct_orig_dst, tuple.dst, is_mask);
            put!(m, ct.orig_tp_src, tuple.src_port, is_mask);
            put!(m, ct.orig_tp_dst, tuple.dst_port, is_mask);
            put!(m, ct.orig_proto, tuple.proto, is_mask);
        }
        left.remove(KeyAttr::CtOrigTupleIpv4);
    }

    if left.contains(KeyAttr::CtOrigTupleIpv6) {
        if let Some(a) = attrs.get(KeyAttr::CtOrigTupleIpv6) {
            let tuple: KeyCtTupleIpv6 = a.read()?;
            put!(m, ipv6.ct_orig_src, tuple.src, is_mask);
            put!(m, ipv6.ct_orig_dst, tuple.dst, is_mask);
            put!(m, ct.orig_tp_src, tuple.src_port, is_mask);
            put!(m, ct.orig_tp_dst, tuple.dst_port, is_mask);
            put!(m, ct.orig_proto, tuple.proto, is_mask);
        }
        left.remove(KeyAttr::CtOrigTupleIpv6);
    }

    Ok(())
}

/// Clear every connection tracking field of `key`.
pub fn clear_ct(key: &mut FlowKey) {
    key.ct = zerocopy::FromZeros::new_zeroed();
    key.ipv4.ct_orig_src = [0; 4];
    key.ipv4.ct_orig_dst = [0; 4];
    key.ipv6.ct_orig_src = [0; 16];
    key.ipv6.ct_orig_dst = [0; 16];
}

/// Write the connection tracking fields of `output`. Whether an
/// original direction tuple is written, and which one, is decided by
/// `key`.
pub fn encode_ct(w: &mut AttrWriter, key: &FlowKey, output: &FlowKey) {
    w.put_u32(KeyAttr::CtState, u32::from(output.ct.state));
    w.put_u16(KeyAttr::CtZone, output.ct.zone.get());
    w.put_u32(KeyAttr::CtMark, output.ct.mark.get());
    w.put(KeyAttr::CtLabels, &output.ct.labels);

    if key.ct.orig_proto == 0 {
        return;
    }

    match key.eth.ty.get() {
        ETHER_TYPE_IPV4 => {
            let tuple = KeyCtTupleIpv4 {
                src: output.ipv4.ct_orig_src,
                dst: output.ipv4.ct_orig_dst,
                src_port: output.ct.orig_tp_src,
                dst_port: output.ct.orig_tp_dst,
                proto: output.ct.orig_proto,
                pad: [0; 3],
            };
            w.put_record(KeyAttr::CtOrigTupleIpv4, &tuple);
        }
        ETHER_TYPE_IPV6 => {
            let tuple = KeyCtTupleIpv6 {
                src: output.ipv6.ct_orig_src,
                dst: output.ipv6.ct_orig_dst,
                src_port: output.ct.orig_tp_src,
                dst_port: output.ct.orig_tp_dst,
                proto: output.ct.orig_proto,
                pad: [0; 3],
            };
            w.put_record(KeyAttr::CtOrigTupleIpv6, &tuple);
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::CtState;
    use crate::api::wire::Be16;
    use crate::engine::CtAvailable;
    use crate::engine::NoCt;
    use crate::engine::schema::KEY_SCHEMA;
    use alloc::vec::Vec;

    fn ct_stream() -> Vec<u8> {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::CtState, (CtState::TRACKED | CtState::NEW).bits());
        w.put_u16(KeyAttr::CtZone, 5);
        w.put_u32(KeyAttr::CtMark, 0xabcd);
        w.put(KeyAttr::CtLabels, &[7; 16]);
        w.put_record(
            KeyAttr::CtOrigTupleIpv4,
            &KeyCtTupleIpv4 {
                src: [10, 0, 0, 1],
                dst: [10, 0, 0, 2],
                src_port: Be16::new(1000),
                dst_port: Be16::new(80),
                proto: 6,
                pad: [0; 3],
            },
        );
        w.into_bytes().unwrap()
    }

    #[test]
    fn decode_with_ct() {
        let log = Log::quiet();
        let buf = ct_stream();
        let attrs = ParsedAttrs::parse(&buf, &KEY_SCHEMA, false, &log).unwrap();
        let mut left = attrs.present();
        let mut m = MatchBuilder::new();

        decode_ct(&attrs, &mut left, &mut m, false, &CtAvailable, &log)
            .unwrap();
        assert!(left.is_empty());
        assert_eq!(m.key.ct.state, 0x21);
        assert_eq!(m.key.ct.zone.get(), 5);
        assert_eq!(m.key.ct.mark.get(), 0xabcd);
        assert_eq!(m.key.ct.labels, [7; 16]);
        assert_eq!(m.key.ipv4.ct_orig_dst, [10, 0, 0, 2]);
        assert_eq!(m.key.ct.orig_proto, 6);

        clear_ct(&mut m.key);
        assert_eq!(m.key.ct.state, 0);
        assert_eq!(m.key.ipv4.ct_orig_dst, [0; 4]);
    }

    #[test]
    fn unsupported_fields_left() {
        let log = Log::quiet();
        let buf = ct_stream();
        let attrs = ParsedAttrs::parse(&buf, &KEY_SCHEMA, false, &log).unwrap();
        let mut left = attrs.present();
        let mut m = MatchBuilder::new();

        decode_ct(&attrs, &mut left, &mut m, false, &NoCt, &log).unwrap();
        for ty in CT_SUMMARY {
            assert!(left.contains(ty));
        }
        // The tuples are not gated on the context.
        assert!(!left.contains(KeyAttr::CtOrigTupleIpv4));
    }

    #[test]
    fn bad_state() {
        let log = Log::quiet();
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::CtState, 0x100);
        let buf = w.into_bytes().unwrap();
        let attrs = ParsedAttrs::parse(&buf, &KEY_SCHEMA, false, &log).unwrap();
        let mut left = attrs.present();
        let mut m = MatchBuilder::new();

        assert!(matches!(
            decode_ct(&attrs, &mut left, &mut m, false, &CtAvailable, &log),
            Err(FlowError::Invalid(_))
        ));
    }
}
