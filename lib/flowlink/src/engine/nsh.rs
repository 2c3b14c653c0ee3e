// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Network Service Header attributes.
//!
//! An NSH attribute nests a base record and at most one metadata
//! record: MD type 1 (four context words) or MD type 2 (variable
//! length, accepted only when pushing a header).

use super::Log;
use super::Result;
use super::key::MatchBuilder;
use super::key::NshKey;
use super::nlattr::Attr;
use super::nlattr::AttrWriter;
use super::nlattr::ParsedAttrs;
use super::nlattr::nla_total_size;
use super::schema::NSH_SCHEMA;
use crate::api::FlowError;
use crate::api::KeyAttr;
use crate::api::NshAttr;
use crate::api::wire::NSH_CTX_HDRS_MAX_LEN;
use crate::api::wire::NSH_M_TYPE1;
use crate::api::wire::NSH_M_TYPE2;
use crate::api::wire::NshBase;
use crate::api::wire::NshMd1;
use alloc::vec::Vec;
use zerocopy::IntoBytes;

/// How an NSH attribute is being used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NshForm {
    /// A match key.
    Key,
    /// A match mask.
    Mask,
    /// The header to prepend in a push action.
    Push,
}

/// Decode an NSH attribute into one side of `m`.
pub fn decode_nsh(
    attr: Attr<'_>,
    m: &mut MatchBuilder,
    form: NshForm,
    log: &Log,
) -> Result<()> {
    let is_mask = form == NshForm::Mask;
    let attrs = ParsedAttrs::parse(attr.data(), &NSH_SCHEMA, false, log)?;

    if attrs.contains(NshAttr::Unspec) {
        return Err(log.fail(FlowError::invalid("unknown nsh attribute 0")));
    }

    let mut mdtype = 0;

    if let Some(a) = attrs.get(NshAttr::Base) {
        let base: NshBase = a.read()?;
        mdtype = base.mdtype;
        put!(m, nsh.flags, base.flags, is_mask);
        put!(m, nsh.ttl, base.ttl, is_mask);
        put!(m, nsh.mdtype, base.mdtype, is_mask);
        put!(m, nsh.np, base.np, is_mask);
        put!(m, nsh.path_hdr, base.path_hdr, is_mask);
    }

    let has_md1 = attrs.contains(NshAttr::Md1);
    if let Some(a) = attrs.get(NshAttr::Md1) {
        let md1: NshMd1 = a.read()?;
        put!(m, nsh.context, md1.context, is_mask);
    }

    let has_md2 = attrs.contains(NshAttr::Md2);
    if let Some(a) = attrs.get(NshAttr::Md2) {
        if form != NshForm::Push {
            return Err(log.fail(FlowError::unsupported(
                "nsh metadata type 2 is only supported by push_nsh",
            )));
        }

        if a.is_empty() || a.len() > NSH_CTX_HDRS_MAX_LEN {
            return Err(log.fail(FlowError::invalid(format!(
                "invalid nsh metadata length {} for type {mdtype}",
                a.len()
            ))));
        }
    }

    if has_md1 && has_md2 {
        return Err(log.fail(FlowError::invalid(
            "nsh metadata types 1 and 2 are exclusive",
        )));
    }

    if !is_mask {
        if (has_md1 && mdtype != NSH_M_TYPE1)
            || (has_md2 && mdtype != NSH_M_TYPE2)
        {
            return Err(log.fail(FlowError::invalid(format!(
                "nsh metadata does not match type {mdtype}"
            ))));
        }

        if form == NshForm::Push
            && (!attrs.contains(NshAttr::Base) || (!has_md1 && !has_md2))
        {
            return Err(log.fail(FlowError::invalid(
                "push_nsh is missing base or metadata attributes",
            )));
        }
    }

    Ok(())
}

/// Check an NSH attribute without keeping what it decodes to.
pub fn validate_nsh(attr: Attr<'_>, form: NshForm, log: &Log) -> Result<()> {
    let mut scratch = MatchBuilder::new();
    decode_nsh(attr, &mut scratch, form, log)
}

/// Check the NSH attribute of a masked set action.
///
/// Each sub-record carries its value followed by its mask. The value
/// halves must form a valid NSH mask, and no value bit may be set
/// outside the mask.
pub fn validate_masked_nsh(attr: Attr<'_>, log: &Log) -> Result<()> {
    let mut values = AttrWriter::new();

    for sub in attr.nested() {
        let (val, mask) = split_masked(sub, log)?;
        if val.iter().zip(mask).any(|(v, m)| v & !m != 0) {
            return Err(log.fail(FlowError::invalid(format!(
                "masked nsh attribute {} sets bits outside its mask",
                sub.ty()
            ))));
        }
        values.put(sub.ty(), val);
    }

    let stream = values.into_bytes().map_err(|e| log.fail(e))?;
    validate_nsh(Attr::new(attr.ty(), &stream), NshForm::Mask, log)
}

fn split_masked<'a>(sub: Attr<'a>, log: &Log) -> Result<(&'a [u8], &'a [u8])> {
    if sub.len() % 2 != 0 {
        return Err(log.fail(FlowError::MalformedAttr {
            table: NSH_SCHEMA.name().into(),
            ty: sub.ty(),
            len: sub.len(),
            expected: sub.len() + 1,
        }));
    }

    Ok(sub.data().split_at(sub.len() / 2))
}

/// Write the masked form of an unmasked NSH set: every sub-record
/// followed by an all-ones mask of the same size.
pub fn put_nsh_exact_masked(w: &mut AttrWriter, attr: Attr<'_>) {
    let nest = w.begin_nested(KeyAttr::Nsh);
    for sub in attr.nested() {
        let mut both = Vec::with_capacity(sub.len() * 2);
        both.extend_from_slice(sub.data());
        both.resize(sub.len() * 2, 0xff);
        w.put(sub.ty(), &both);
    }
    w.end_nested(nest);
}

/// Write the value half of a masked NSH attribute.
pub fn put_nsh_value_half(w: &mut AttrWriter, attr: Attr<'_>) {
    let nest = w.begin_nested(KeyAttr::Nsh);
    for sub in attr.nested() {
        w.put(sub.ty(), &sub.data()[..sub.len() / 2]);
    }
    w.end_nested(nest);
}

/// Write the NSH fields of a key or mask.
pub fn encode_nsh(w: &mut AttrWriter, nsh: &NshKey, is_mask: bool) {
    let nest = w.begin_nested(KeyAttr::Nsh);

    let base = NshBase {
        flags: nsh.flags,
        ttl: nsh.ttl,
        mdtype: nsh.mdtype,
        np: nsh.np,
        path_hdr: nsh.path_hdr,
    };
    w.put(NshAttr::Base, base.as_bytes());

    if is_mask || nsh.mdtype == NSH_M_TYPE1 {
        w.put_record(NshAttr::Md1, &NshMd1 { context: nsh.context });
    }

    w.end_nested(nest);
}

/// The worst-case encoded size of an NSH attribute's contents.
pub const fn nsh_key_attr_size() -> usize {
    // Base, plus the larger of the two metadata types.
    nla_total_size(size_of::<NshBase>())
        + nla_total_size(NSH_CTX_HDRS_MAX_LEN)
}
