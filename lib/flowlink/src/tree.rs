// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A serializable description of attribute streams.
//!
//! Writing raw attribute bytes by hand is error prone, so test fixtures
//! and flowadm input describe flows as trees of typed attributes which
//! are then written out with [`AttrWriter`].
//!
//! ```text
//! (
//!     key: [
//!         (Key(InPort), U32(1)),
//!         (Key(Ethertype), Be16(0x0800)),
//!     ],
//!     actions: [(Action(Output), U32(2))],
//! )
//! ```

use crate::api::ActionAttr;
use crate::api::CheckPktLenAttr;
use crate::api::CtAttr;
use crate::api::DecTtlAttr;
use crate::api::FlowAttr;
use crate::api::KeyAttr;
use crate::api::NatAttr;
use crate::api::NshAttr;
use crate::api::SampleAttr;
use crate::api::TunnelAttr;
use crate::api::UserspaceAttr;
use crate::api::VxlanExtAttr;
use crate::engine::Result;
use crate::engine::nlattr::AttrWriter;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// An attribute type, named by the table it belongs to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AttrType {
    Flow(FlowAttr),
    Key(KeyAttr),
    Tunnel(TunnelAttr),
    VxlanExt(VxlanExtAttr),
    Nsh(NshAttr),
    Action(ActionAttr),
    Sample(SampleAttr),
    CheckPktLen(CheckPktLenAttr),
    DecTtl(DecTtlAttr),
    Userspace(UserspaceAttr),
    Ct(CtAttr),
    Nat(NatAttr),
    /// A bare type number, for types no table names.
    Raw(u16),
}

impl From<AttrType> for u16 {
    fn from(ty: AttrType) -> u16 {
        match ty {
            AttrType::Flow(t) => t.into(),
            AttrType::Key(t) => t.into(),
            AttrType::Tunnel(t) => t.into(),
            AttrType::VxlanExt(t) => t.into(),
            AttrType::Nsh(t) => t.into(),
            AttrType::Action(t) => t.into(),
            AttrType::Sample(t) => t.into(),
            AttrType::CheckPktLen(t) => t.into(),
            AttrType::DecTtl(t) => t.into(),
            AttrType::Userspace(t) => t.into(),
            AttrType::Ct(t) => t.into(),
            AttrType::Nat(t) => t.into(),
            AttrType::Raw(t) => t,
        }
    }
}

/// An attribute value. Integers without a byte order prefix are
/// written in host order.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AttrValue {
    Flag,
    U8(u8),
    U16(u16),
    U32(u32),
    Be16(u16),
    Be32(u32),
    Be64(u64),
    Bytes(Vec<u8>),
    Nested(Vec<AttrNode>),
}

/// One attribute of a tree.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AttrNode(pub AttrType, pub AttrValue);

impl AttrNode {
    pub fn write(&self, w: &mut AttrWriter) {
        let ty = u16::from(self.0);
        match &self.1 {
            AttrValue::Flag => w.put_flag(ty),
            AttrValue::U8(v) => w.put_u8(ty, *v),
            AttrValue::U16(v) => w.put_u16(ty, *v),
            AttrValue::U32(v) => w.put_u32(ty, *v),
            AttrValue::Be16(v) => w.put_be16(ty, *v),
            AttrValue::Be32(v) => w.put_be32(ty, *v),
            AttrValue::Be64(v) => w.put_be64(ty, *v),
            AttrValue::Bytes(v) => w.put(ty, v),
            AttrValue::Nested(children) => {
                let nest = w.begin_nested(ty);
                write_nodes(w, children);
                w.end_nested(nest);
            }
        }
    }
}

pub fn write_nodes(w: &mut AttrWriter, nodes: &[AttrNode]) {
    for node in nodes {
        node.write(w);
    }
}

/// The attribute stream described by `nodes`.
pub fn to_stream(nodes: &[AttrNode]) -> Result<Vec<u8>> {
    let mut w = AttrWriter::new();
    write_nodes(&mut w, nodes);
    w.into_bytes()
}

/// A flow as handed over by a control plane.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowDesc {
    pub key: Vec<AttrNode>,
    #[serde(default)]
    pub mask: Option<Vec<AttrNode>>,
    #[serde(default)]
    pub actions: Vec<AttrNode>,
}

impl FlowDesc {
    pub fn key_stream(&self) -> Result<Vec<u8>> {
        to_stream(&self.key)
    }

    pub fn mask_stream(&self) -> Result<Option<Vec<u8>>> {
        self.mask.as_deref().map(to_stream).transpose()
    }

    pub fn action_stream(&self) -> Result<Vec<u8>> {
        to_stream(&self.actions)
    }
}
