// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print matches and action programs in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both flowadm and integration tests.

use crate::api::ActionAttr;
use crate::api::CheckPktLenAttr;
use crate::api::DecTtlAttr;
use crate::api::KeyAttr;
use crate::api::NshAttr;
use crate::api::SampleAttr;
use crate::api::TunnelAttr;
use crate::engine::encode::encode_key;
use crate::engine::encode::encode_mask;
use crate::engine::key::FlowMatch;
use crate::engine::nlattr::Attr;
use crate::engine::nlattr::AttrIter;
use crate::engine::schema::KEY_SCHEMA;
use crate::engine::schema::Schema;
use itertools::Itertools;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use tabwriter::TabWriter;

/// Print a [`FlowMatch`].
pub fn print_match(m: &FlowMatch) -> std::io::Result<()> {
    print_match_into(&mut std::io::stdout(), m)
}

/// Print a [`FlowMatch`] into a given writer.
///
/// Each row is one attribute of the encoded key, next to the same
/// attribute of the encoded mask. Attributes the mask stream leaves
/// out are wildcarded.
pub fn print_match_into(
    writer: &mut impl Write,
    m: &FlowMatch,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    let key = encode_key(&m.key).map_err(std::io::Error::other)?;
    let mask = m
        .mask
        .as_ref()
        .map(|mask| encode_mask(&m.key, &mask.key))
        .transpose()
        .map_err(std::io::Error::other)?;

    writeln!(t, "Match (key range {:?})", m.range)?;
    write_hrb(&mut t)?;
    writeln!(t, "FIELD\tKEY\tMASK")?;
    write_match_rows(&mut t, &KEY_SCHEMA, &key, mask.as_deref(), 0)?;
    t.flush()
}

fn write_match_rows(
    t: &mut impl Write,
    schema: &'static Schema,
    key: &[u8],
    mask: Option<&[u8]>,
    depth: usize,
) -> std::io::Result<()> {
    for a in AttrIter::new(key) {
        let name = attr_name(schema, a.ty());
        let m = mask.map(|mask| find(mask, a.ty()));

        match schema.nested(a.ty()) {
            Some(inner) => {
                writeln!(t, "{:depth$}{name}\t\t", "", depth = depth * 2)?;
                let inner_mask = m.map(|m| m.map_or(&[][..], |m| m.data()));
                write_match_rows(t, inner, a.data(), inner_mask, depth + 1)?;
            }

            None => {
                let mask = match m {
                    None => "exact".to_string(),
                    Some(None) => "*".to_string(),
                    Some(Some(m)) => hex(m.data()),
                };
                writeln!(
                    t,
                    "{:depth$}{name}\t{}\t{mask}",
                    "",
                    hex(a.data()),
                    depth = depth * 2,
                )?;
            }
        }
    }

    Ok(())
}

fn find(stream: &[u8], ty: u16) -> Option<Attr<'_>> {
    AttrIter::new(stream).find(|a| a.ty() == ty)
}

/// Print an action stream in its user form, as produced by
/// [`crate::engine::serialize::serialize_actions`].
pub fn print_actions(actions: &[u8]) -> std::io::Result<()> {
    print_actions_into(&mut std::io::stdout(), actions)
}

/// Print an action stream into a given writer.
pub fn print_actions_into(
    writer: &mut impl Write,
    actions: &[u8],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Actions")?;
    write_hrb(&mut t)?;
    writeln!(t, "ACTION\tARGUMENT")?;
    write_action_rows(&mut t, actions, 0)?;
    t.flush()
}

fn write_action_rows(
    t: &mut impl Write,
    actions: &[u8],
    depth: usize,
) -> std::io::Result<()> {
    let pad = depth * 2;

    for a in AttrIter::new(actions) {
        let Ok(action) = ActionAttr::try_from(a.ty()) else {
            writeln!(t, "{:pad$}{}\t{}", "", a.ty(), hex(a.data()))?;
            continue;
        };

        match action {
            ActionAttr::Output | ActionAttr::Recirc | ActionAttr::Meter => {
                let val = a.read_u32().map_or_else(|_| hex(a.data()), |v| {
                    v.to_string()
                });
                writeln!(t, "{:pad$}{action}\t{val}", "")?;
            }

            ActionAttr::Set
            | ActionAttr::SetMasked
            | ActionAttr::SetToMasked => {
                for inner in a.nested() {
                    let name = attr_name(&KEY_SCHEMA, inner.ty());
                    writeln!(t, "{:pad$}{action}\t{name}", "")?;
                    match KEY_SCHEMA.nested(inner.ty()) {
                        Some(schema) => {
                            write_match_rows(
                                t,
                                schema,
                                inner.data(),
                                None,
                                depth + 1,
                            )?;
                        }
                        None => {
                            writeln!(
                                t,
                                "{:pad$}  {name}\t{}",
                                "",
                                hex(inner.data())
                            )?;
                        }
                    }
                }
            }

            ActionAttr::Sample => {
                for sub in a.nested() {
                    match SampleAttr::try_from(sub.ty()) {
                        Ok(SampleAttr::Probability) => {
                            let p = sub.read_u32().unwrap_or_default();
                            writeln!(
                                t,
                                "{:pad$}{action}\tprobability={p:#010x}",
                                "",
                            )?;
                        }
                        Ok(SampleAttr::Actions) => {
                            write_action_rows(t, sub.data(), depth + 1)?;
                        }
                        _ => {}
                    }
                }
            }

            ActionAttr::Clone => {
                writeln!(t, "{:pad$}{action}\t", "")?;
                write_action_rows(t, a.data(), depth + 1)?;
            }

            ActionAttr::CheckPktLen => {
                for sub in a.nested() {
                    match CheckPktLenAttr::try_from(sub.ty()) {
                        Ok(CheckPktLenAttr::PktLen) => {
                            let len = sub.read_u16().unwrap_or_default();
                            writeln!(
                                t,
                                "{:pad$}{action}\tpkt_len={len}",
                                "",
                            )?;
                        }
                        Ok(
                            branch @ (CheckPktLenAttr::ActionsIfLessEqual
                            | CheckPktLenAttr::ActionsIfGreater),
                        ) => {
                            writeln!(t, "{:pad$}  {branch}\t", "")?;
                            write_action_rows(t, sub.data(), depth + 2)?;
                        }
                        _ => {}
                    }
                }
            }

            ActionAttr::DecTtl => {
                writeln!(t, "{:pad$}{action}\t", "")?;
                for sub in a.nested() {
                    if sub.ty() == u16::from(DecTtlAttr::Action) {
                        write_action_rows(t, sub.data(), depth + 1)?;
                    }
                }
            }

            _ => {
                writeln!(t, "{:pad$}{action}\t{}", "", hex(a.data()))?;
            }
        }
    }

    Ok(())
}

/// The name of attribute `ty` in `schema`, or its number when the
/// table has no name for it.
fn attr_name(schema: &Schema, ty: u16) -> String {
    let name = match schema.name() {
        "key" => KeyAttr::try_from(ty).ok().map(|a| a.to_string()),
        "tunnel" => TunnelAttr::try_from(ty).ok().map(|a| a.to_string()),
        "nsh" => NshAttr::try_from(ty).ok().map(|a| a.to_string()),
        _ => None,
    };
    name.unwrap_or_else(|| ty.to_string())
}

fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "-".to_string();
    }
    format!("{:02x}", bytes.iter().format(""))
}

/// Print horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::wire::KeyEthernet;
    use crate::engine::CtAvailable;
    use crate::engine::Log;
    use crate::engine::decode::decode_exact;
    use crate::engine::nlattr::AttrWriter;
    use std::vec::Vec;

    #[test]
    fn match_table() {
        let mut w = AttrWriter::new();
        w.put_u32(KeyAttr::InPort, 3);
        let eth = KeyEthernet { src: [2, 0, 0, 0, 0, 1], dst: [0xff; 6] };
        w.put_record(KeyAttr::Ethernet, &eth);
        w.put_be16(KeyAttr::Ethertype, 0x88cc);
        let key = w.into_bytes().unwrap();

        let m = decode_exact(&key, &CtAvailable, &Log::quiet()).unwrap();
        let mut out = Vec::new();
        print_match_into(&mut out, &m).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("InPort"));
        assert!(out.contains("020000000001ffffffffffff"));
        assert!(out.contains("88cc"));
    }

    #[test]
    fn action_tree() {
        let mut w = AttrWriter::new();
        let nest = w.begin_nested(ActionAttr::Clone);
        w.put_u32(ActionAttr::Output, 7);
        w.end_nested(nest);
        w.put_flag(ActionAttr::PopVlan);

        let mut out = Vec::new();
        print_actions_into(&mut out, &w.into_bytes().unwrap()).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();

        assert!(lines[3].starts_with("Clone"));
        assert!(lines[4].starts_with("  Output"));
        assert!(lines[4].trim_end().ends_with('7'));
        assert!(lines[5].starts_with("PopVlan"));
    }
}
