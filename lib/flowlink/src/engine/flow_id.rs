// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow identifiers.
//!
//! A control plane names a flow either by a unique flow identifier
//! (UFID) of its choosing or, failing that, by the flow's unmasked key.

use super::Log;
use super::encode::put_key_nested;
use super::key::FlowKey;
use super::key::FlowMask;
use super::nlattr::Attr;
use super::nlattr::AttrWriter;
use crate::api::FlowAttr;
use crate::api::MAX_UFID_LENGTH;
use crate::api::UfidFlags;
use crate::nlerr;
use alloc::boxed::Box;
use core::fmt;

/// A unique flow identifier: 1 to [`MAX_UFID_LENGTH`] opaque bytes.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Ufid(heapless::Vec<u8, MAX_UFID_LENGTH>);

impl Ufid {
    /// Build a UFID from `bytes`, which must be 1 to
    /// [`MAX_UFID_LENGTH`] bytes long.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        heapless::Vec::from_slice(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Ufid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Ufid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ufid({self})")
    }
}

/// How a flow is identified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlowId {
    Ufid(Ufid),
    /// No UFID was given; the flow is named by its key before masking.
    UnmaskedKey(Box<FlowKey>),
}

impl FlowId {
    pub fn is_ufid(&self) -> bool {
        matches!(self, FlowId::Ufid(_))
    }
}

/// Extract the UFID from a [`FlowAttr::Ufid`] attribute.
///
/// An absent attribute or one of the wrong size yields `None`; the
/// latter is logged.
pub fn get_ufid(attr: Option<Attr<'_>>, log: &Log) -> Option<Ufid> {
    let attr = attr?;
    let ufid = Ufid::new(attr.data());
    if ufid.is_none() {
        nlerr!(log, "ufid size out of range";
            "len" => attr.len(), "max" => MAX_UFID_LENGTH);
    }
    ufid
}

/// Identify a flow by its UFID if a valid one was given, else by its
/// unmasked key.
pub fn get_identifier(
    ufid: Option<Attr<'_>>,
    key: &FlowKey,
    log: &Log,
) -> FlowId {
    match get_ufid(ufid, log) {
        Some(ufid) => FlowId::Ufid(ufid),
        None => FlowId::UnmaskedKey(Box::new(*key)),
    }
}

/// The flags of a [`FlowAttr::UfidFlags`] attribute, empty when the
/// attribute is absent.
pub fn ufid_flags(attr: Option<Attr<'_>>) -> UfidFlags {
    attr.and_then(|a| a.read_u32().ok())
        .map(UfidFlags::from_bits_retain)
        .unwrap_or_default()
}

/// Write a flow's identifier: the UFID as is, or the unmasked key
/// nested in a [`FlowAttr::Key`] attribute.
pub fn encode_identifier(w: &mut AttrWriter, id: &FlowId) {
    match id {
        FlowId::Ufid(ufid) => w.put(FlowAttr::Ufid, ufid.as_bytes()),
        FlowId::UnmaskedKey(key) => {
            put_key_nested(w, FlowAttr::Key, key, key, false)
        }
    }
}

/// Write a flow's masked key nested in a [`FlowAttr::Key`] attribute.
pub fn put_masked_key(w: &mut AttrWriter, key: &FlowKey) {
    put_key_nested(w, FlowAttr::Key, key, key, false);
}

/// Write a flow's mask nested in a [`FlowAttr::Mask`] attribute.
pub fn put_mask(w: &mut AttrWriter, key: &FlowKey, mask: &FlowMask) {
    put_key_nested(w, FlowAttr::Mask, key, &mask.key, true);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::nlattr::AttrIter;

    #[test]
    fn ufid_lengths() {
        let log = Log::quiet();
        let ok = [7u8; MAX_UFID_LENGTH];
        let ufid = get_ufid(Some(Attr::new(9, &ok)), &log).unwrap();
        assert_eq!(ufid.len(), MAX_UFID_LENGTH);

        assert!(get_ufid(Some(Attr::new(9, &[1])), &log).is_some());
        assert!(get_ufid(Some(Attr::new(9, &[])), &log).is_none());
        assert!(get_ufid(Some(Attr::new(9, &[0; 17])), &log).is_none());
        assert!(get_ufid(None, &log).is_none());
    }

    #[test]
    fn identifier_fallback() {
        let log = Log::quiet();
        let mut key = FlowKey::new();
        key.phy.priority = crate::api::wire::Ne32::new(3);

        let id = get_identifier(Some(Attr::new(9, &[0xab, 0xcd])), &key, &log);
        assert!(id.is_ufid());
        let mut w = AttrWriter::new();
        encode_identifier(&mut w, &id);
        let a = AttrIter::new(w.as_bytes()).next().unwrap();
        assert_eq!(a.ty(), FlowAttr::Ufid as u16);
        assert_eq!(a.data(), &[0xab, 0xcd]);

        let id = get_identifier(Some(Attr::new(9, &[0; 20])), &key, &log);
        assert_eq!(id, FlowId::UnmaskedKey(Box::new(key)));
        let mut w = AttrWriter::new();
        encode_identifier(&mut w, &id);
        let a = AttrIter::new(w.as_bytes()).next().unwrap();
        assert_eq!(a.ty(), FlowAttr::Key as u16);
        assert!(a.nested().count() > 0);
    }

    #[test]
    fn flags() {
        assert_eq!(ufid_flags(None), UfidFlags::empty());
        let bits = (UfidFlags::OMIT_KEY | UfidFlags::OMIT_ACTIONS).bits();
        let val = bits.to_ne_bytes();
        assert_eq!(
            ufid_flags(Some(Attr::new(10, &val))),
            UfidFlags::OMIT_KEY | UfidFlags::OMIT_ACTIONS
        );
    }

    #[test]
    fn display() {
        let ufid = Ufid::new(&[0x01, 0xfe]).unwrap();
        assert_eq!(alloc::format!("{ufid}"), "01fe");
    }
}
