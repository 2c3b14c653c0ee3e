// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! VLAN tag levels.
//!
//! A tagged key carries the tag's TPID as its ethertype, the TCI as
//! a VLAN attribute, and everything behind the tag in an ENCAP stream.
//! Resolving a level moves the tag into the key and splices the ENCAP
//! stream into the outer table, so that the rest of the decode sees a
//! single flat set of attributes. At most two levels are resolved: the
//! service tag and the customer tag.

use super::Log;
use super::Result;
use super::key::MatchBuilder;
use super::nlattr::ParsedAttrs;
use super::schema::KEY_SCHEMA;
use crate::api::FlowError;
use crate::api::KeyAttr;
use crate::api::VLAN_CFI_MASK;
use crate::api::eth_type_vlan;
use crate::api::wire::Be16;

fn level_name(inner: bool) -> &'static str {
    if inner { "C-VLAN" } else { "VLAN" }
}

/// Resolve up to two VLAN levels from `attrs` into one side of `m`.
///
/// The mask pass must run after the key pass: whether a mask level
/// applies depends on the key's TCI at that level.
pub fn decode_vlans<'a>(
    attrs: &mut ParsedAttrs<'a>,
    m: &mut MatchBuilder,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    decode_level(attrs, m, false, is_mask, log)?;

    if m.key.eth.vlan.tci.get() & VLAN_CFI_MASK != 0 {
        decode_level(attrs, m, true, is_mask, log)?;
    }

    Ok(())
}

fn decode_level<'a>(
    attrs: &mut ParsedAttrs<'a>,
    m: &mut MatchBuilder,
    inner: bool,
    is_mask: bool,
    log: &Log,
) -> Result<()> {
    let is_vlan = if is_mask {
        check_mask_level(attrs, m, inner, log)?
    } else {
        check_key_level(attrs, inner, log)?
    };

    if !is_vlan {
        return Ok(());
    }

    let tci = read_be16(attrs, KeyAttr::Vlan)?;
    let tpid = read_be16(attrs, KeyAttr::Ethertype)?;

    if inner {
        put!(m, eth.cvlan.tpid, Be16::new(tpid), is_mask);
        put!(m, eth.cvlan.tci, Be16::new(tci), is_mask);
    } else {
        put!(m, eth.vlan.tpid, Be16::new(tpid), is_mask);
        put!(m, eth.vlan.tci, Be16::new(tci), is_mask);
    }

    let encap = attrs.get(KeyAttr::Encap).map(|a| a.data()).unwrap_or(&[]);
    attrs.clear(KeyAttr::Encap);
    attrs.clear(KeyAttr::Vlan);
    attrs.clear(KeyAttr::Ethertype);

    attrs.parse_into(encap, &KEY_SCHEMA, is_mask, log)
}

fn read_be16(attrs: &ParsedAttrs<'_>, ty: KeyAttr) -> Result<u16> {
    match attrs.get(ty) {
        Some(a) => a.read_be16(),
        None => Ok(0),
    }
}

/// Whether the key attributes describe a tag at this level, and if so
/// whether the tag is well formed.
fn check_key_level(
    attrs: &ParsedAttrs<'_>,
    inner: bool,
    log: &Log,
) -> Result<bool> {
    let tagged = attrs.contains(KeyAttr::Ethernet)
        && match attrs.get(KeyAttr::Ethertype) {
            Some(a) => eth_type_vlan(a.read_be16()?),
            None => false,
        };

    if !tagged {
        return Ok(false);
    }

    let name = level_name(inner);

    if !attrs.contains(KeyAttr::Vlan) || !attrs.contains(KeyAttr::Encap) {
        let err = FlowError::invalid(format!("invalid {name} frame"));
        return Err(log.fail(err));
    }

    let tci = read_be16(attrs, KeyAttr::Vlan)?;
    if tci & VLAN_CFI_MASK == 0 {
        if tci != 0 {
            return Err(log.fail(FlowError::invalid(format!(
                "{name} TCI {tci:#06x} does not have the CFI bit set"
            ))));
        }

        // A truncated tag: TCI zero with nothing behind it.
        let encap_len = attrs.get(KeyAttr::Encap).map(|a| a.len()).unwrap_or(0);
        if encap_len != 0 {
            return Err(log.fail(FlowError::invalid(format!(
                "truncated {name} header has a non-empty encap attribute"
            ))));
        }
    }

    Ok(true)
}

fn check_mask_level(
    attrs: &ParsedAttrs<'_>,
    m: &MatchBuilder,
    inner: bool,
    log: &Log,
) -> Result<bool> {
    if !attrs.contains(KeyAttr::Encap) {
        return Ok(false);
    }

    let name = level_name(inner);
    let key_tci = if inner { m.key.eth.cvlan.tci } else { m.key.eth.vlan.tci };

    if key_tci.get() & VLAN_CFI_MASK == 0 {
        return Err(log.fail(FlowError::invalid(format!(
            "encap mask attribute is set for a non-{name} frame"
        ))));
    }

    let tpid = read_be16(attrs, KeyAttr::Ethertype)?;
    if tpid != u16::MAX {
        return Err(log.fail(FlowError::invalid(format!(
            "{name} TPID mask {tpid:#06x} is not an exact match"
        ))));
    }

    let tci = read_be16(attrs, KeyAttr::Vlan)?;
    if tci & VLAN_CFI_MASK == 0 {
        return Err(log.fail(FlowError::invalid(format!(
            "{name} TCI mask does not match the CFI bit exactly"
        ))));
    }

    Ok(true)
}
