// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Attribute schemas.
//!
//! Each table lists, by type number, the length a value must have.
//! The same tables drive the parser's length checks, exact-mask
//! synthesis, and the action compiler's argument checks.

use super::nlattr::AttrIter;
use super::nlattr::NLA_HDRLEN;
use super::nlattr::nla_align;
use crate::api::CT_SUPPORTED_MASK;
use crate::api::KeyAttr;
use crate::api::wire::ActionAddMpls;
use crate::api::wire::ActionHash;
use crate::api::wire::ActionPushMpls;
use crate::api::wire::ActionPushVlan;
use crate::api::wire::ActionTrunc;
use crate::api::wire::KeyArp;
use crate::api::wire::KeyCtTupleIpv4;
use crate::api::wire::KeyCtTupleIpv6;
use crate::api::wire::KeyEthernet;
use crate::api::wire::KeyIcmp;
use crate::api::wire::KeyIpv4;
use crate::api::wire::KeyIpv6;
use crate::api::wire::KeyNd;
use crate::api::wire::KeyPorts;
use crate::api::wire::NshBase;
use crate::api::wire::NshMd1;
use alloc::vec::Vec;

/// The expected length of one attribute type.
#[derive(Clone, Copy, Debug)]
pub enum AttrLen {
    Fixed(usize),
    /// A nested stream described by another table, or by the same
    /// table when `None`.
    Nested(Option<&'static Schema>),
    Variable,
}

impl AttrLen {
    pub fn accepts(&self, len: usize) -> bool {
        match self {
            AttrLen::Fixed(want) => *want == len,
            AttrLen::Nested(_) | AttrLen::Variable => true,
        }
    }

    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            AttrLen::Fixed(len) => Some(*len),
            _ => None,
        }
    }
}

/// A table of expected lengths indexed by attribute type.
#[derive(Debug)]
pub struct Schema {
    name: &'static str,
    entries: &'static [AttrLen],
    /// Adjusts a synthesized all-ones mask value for types whose
    /// exact-match mask is narrower than the whole field.
    mask_fixup: Option<fn(u16, &mut [u8])>,
}

impl Schema {
    pub const fn new(name: &'static str, entries: &'static [AttrLen]) -> Self {
        Self { name, entries, mask_fixup: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The highest type number in this table.
    pub fn max(&self) -> u16 {
        // Tables are tiny; none comes near u16::MAX entries.
        (self.entries.len() as u16).saturating_sub(1)
    }

    /// The entry for `ty`. Types beyond the table expect a zero
    /// length, as unlisted types do in the datapath.
    pub fn entry(&self, ty: u16) -> AttrLen {
        self.entries.get(usize::from(ty)).copied().unwrap_or(AttrLen::Fixed(0))
    }

    /// The table a nested attribute of type `ty` is described by.
    pub fn nested(&'static self, ty: u16) -> Option<&'static Schema> {
        match self.entry(ty) {
            AttrLen::Nested(next) => Some(next.unwrap_or(self)),
            _ => None,
        }
    }
}

use AttrLen::Fixed;
use AttrLen::Nested;
use AttrLen::Variable;

pub static VXLAN_EXT_SCHEMA: Schema = Schema::new(
    "vxlan_ext",
    &[
        // Unspec
        Fixed(0),
        // Gbp
        Fixed(size_of::<u32>()),
    ],
);

pub static TUNNEL_SCHEMA: Schema = Schema::new(
    "tunnel",
    &[
        // Id
        Fixed(size_of::<u64>()),
        // Ipv4Src, Ipv4Dst
        Fixed(4),
        Fixed(4),
        // Tos, Ttl
        Fixed(1),
        Fixed(1),
        // DontFragment, Csum, Oam
        Fixed(0),
        Fixed(0),
        Fixed(0),
        // GeneveOpts
        Variable,
        // TpSrc, TpDst
        Fixed(2),
        Fixed(2),
        // VxlanOpts
        Nested(Some(&VXLAN_EXT_SCHEMA)),
        // Ipv6Src, Ipv6Dst
        Fixed(16),
        Fixed(16),
        // Pad
        Variable,
        // ErspanOpts
        Variable,
        // Ipv4InfoBridge
        Fixed(0),
    ],
);

pub static NSH_SCHEMA: Schema = Schema::new(
    "nsh",
    &[
        // Unspec
        Fixed(0),
        // Base
        Fixed(size_of::<NshBase>()),
        // Md1
        Fixed(size_of::<NshMd1>()),
        // Md2
        Variable,
    ],
);

pub static KEY_SCHEMA: Schema = Schema {
    name: "key",
    entries: &[
        // Unspec
        Fixed(0),
        // Encap
        Nested(None),
        // Priority, InPort
        Fixed(size_of::<u32>()),
        Fixed(size_of::<u32>()),
        // Ethernet, Vlan, Ethertype
        Fixed(size_of::<KeyEthernet>()),
        Fixed(size_of::<u16>()),
        Fixed(size_of::<u16>()),
        // Ipv4, Ipv6
        Fixed(size_of::<KeyIpv4>()),
        Fixed(size_of::<KeyIpv6>()),
        // Tcp, Udp
        Fixed(size_of::<KeyPorts>()),
        Fixed(size_of::<KeyPorts>()),
        // Icmp, Icmpv6
        Fixed(size_of::<KeyIcmp>()),
        Fixed(size_of::<KeyIcmp>()),
        // Arp, Nd
        Fixed(size_of::<KeyArp>()),
        Fixed(size_of::<KeyNd>()),
        // SkbMark
        Fixed(size_of::<u32>()),
        // Tunnel
        Nested(Some(&TUNNEL_SCHEMA)),
        // Sctp, TcpFlags
        Fixed(size_of::<KeyPorts>()),
        Fixed(size_of::<u16>()),
        // DpHash, RecircId
        Fixed(size_of::<u32>()),
        Fixed(size_of::<u32>()),
        // Mpls
        Variable,
        // CtState, CtZone, CtMark, CtLabels
        Fixed(size_of::<u32>()),
        Fixed(size_of::<u16>()),
        Fixed(size_of::<u32>()),
        Fixed(16),
        // CtOrigTupleIpv4, CtOrigTupleIpv6
        Fixed(size_of::<KeyCtTupleIpv4>()),
        Fixed(size_of::<KeyCtTupleIpv6>()),
        // Nsh
        Nested(Some(&NSH_SCHEMA)),
    ],
    mask_fixup: Some(key_mask_fixup),
};

fn key_mask_fixup(ty: u16, val: &mut [u8]) {
    if ty == KeyAttr::CtState as u16 && val.len() == size_of::<u32>() {
        val.copy_from_slice(&CT_SUPPORTED_MASK.to_ne_bytes());
    }
}

/// Argument lengths of the actions. Nested and variable actions are
/// checked by their own compilers.
pub static ACTION_SCHEMA: Schema = Schema::new(
    "action",
    &[
        // Unspec
        Fixed(0),
        // Output
        Fixed(size_of::<u32>()),
        // Userspace
        Nested(Some(&USERSPACE_SCHEMA)),
        // Set
        Variable,
        // PushVlan, PopVlan
        Fixed(size_of::<ActionPushVlan>()),
        Fixed(0),
        // Sample
        Variable,
        // Recirc
        Fixed(size_of::<u32>()),
        // Hash
        Fixed(size_of::<ActionHash>()),
        // PushMpls, PopMpls
        Fixed(size_of::<ActionPushMpls>()),
        Fixed(size_of::<u16>()),
        // SetMasked, Ct
        Variable,
        Nested(Some(&CT_ACTION_SCHEMA)),
        // Trunc
        Fixed(size_of::<ActionTrunc>()),
        // PushEth, PopEth
        Fixed(size_of::<KeyEthernet>()),
        Fixed(0),
        // CtClear
        Fixed(0),
        // PushNsh, PopNsh
        Variable,
        Fixed(0),
        // Meter
        Fixed(size_of::<u32>()),
        // Clone, CheckPktLen
        Variable,
        Variable,
        // AddMpls
        Fixed(size_of::<ActionAddMpls>()),
        // DecTtl
        Variable,
    ],
);

pub static USERSPACE_SCHEMA: Schema = Schema::new(
    "userspace",
    &[
        // Unspec
        Fixed(0),
        // Pid
        Fixed(size_of::<u32>()),
        // Userdata
        Variable,
        // EgressTunPort
        Fixed(size_of::<u32>()),
        // Actions
        Fixed(0),
    ],
);

pub static SAMPLE_SCHEMA: Schema = Schema::new(
    "sample",
    &[
        // Unspec
        Fixed(0),
        // Probability
        Fixed(size_of::<u32>()),
        // Actions
        Variable,
    ],
);

pub static CHECK_PKT_LEN_SCHEMA: Schema = Schema::new(
    "check_pkt_len",
    &[
        // Unspec
        Fixed(0),
        // PktLen
        Fixed(size_of::<u16>()),
        // ActionsIfGreater, ActionsIfLessEqual
        Variable,
        Variable,
    ],
);

pub static CT_ACTION_SCHEMA: Schema = Schema::new(
    "ct",
    &[
        // Unspec
        Fixed(0),
        // Commit
        Fixed(0),
        // Zone
        Fixed(size_of::<u16>()),
        // Mark: value and mask
        Fixed(2 * size_of::<u32>()),
        // Labels: value and mask
        Fixed(2 * 16),
        // Helper
        Variable,
        // Nat
        Nested(Some(&NAT_SCHEMA)),
        // ForceCommit
        Fixed(0),
        // Eventmask
        Fixed(size_of::<u32>()),
        // Timeout
        Variable,
    ],
);

pub static NAT_SCHEMA: Schema = Schema::new(
    "nat",
    &[
        // Unspec
        Fixed(0),
        // Src, Dst
        Fixed(0),
        Fixed(0),
        // IpMin, IpMax: IPv4 or IPv6
        Variable,
        Variable,
        // ProtoMin, ProtoMax
        Fixed(size_of::<u16>()),
        Fixed(size_of::<u16>()),
        // Persistent, ProtoHash, ProtoRandom
        Fixed(0),
        Fixed(0),
        Fixed(0),
    ],
);

/// Build an exact-match mask stream for `stream`.
///
/// The result has the same shape as the input, every value byte set
/// to all-ones, except where the schema narrows a field's mask.
/// Nested attributes are followed through their tables.
pub fn exact_mask(stream: &[u8], schema: &'static Schema) -> Vec<u8> {
    let mut out = Vec::with_capacity(stream.len());
    exact_mask_into(&mut out, stream, schema);
    out
}

fn exact_mask_into(out: &mut Vec<u8>, stream: &[u8], schema: &'static Schema) {
    for attr in AttrIter::new(stream) {
        let start = out.len();
        out.extend_from_slice(&[0; NLA_HDRLEN]);

        match schema.nested(attr.ty()) {
            Some(next) => exact_mask_into(out, attr.data(), next),
            None => {
                let val = out.len();
                out.resize(val + attr.len(), 0xff);
                if let Some(fixup) = schema.mask_fixup {
                    fixup(attr.ty(), &mut out[val..]);
                }
            }
        }

        let len = u16::try_from(out.len() - start).unwrap_or(u16::MAX);
        out[start..start + 2].copy_from_slice(&len.to_ne_bytes());
        out[start + 2..start + 4].copy_from_slice(&attr.ty().to_ne_bytes());
        out.resize(nla_align(out.len()), 0);
    }
}
