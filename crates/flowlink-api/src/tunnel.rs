// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Tunnel metadata: flags, the option sub-formats, and Geneve option
//! walking.
//!
//! RFC 8926 Geneve: Generic Network Virtualization Encapsulation

use crate::FlowError;
use crate::wire::ErspanMetadata;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::IntoBytes;

/// The size of the tunnel option slot in a flow key.
pub const TUN_OPTS_MAX: usize = 256;

pub const GENEVE_OPT_HDR_LEN: usize = 4;
pub const GENEVE_OPT_CRIT_SHIFT: u8 = 7;
pub const GENEVE_OPT_TYPE_MASK: u8 = (1 << GENEVE_OPT_CRIT_SHIFT) - 1;
pub const GENEVE_OPT_RESERVED_SHIFT: u8 = 5;
pub const GENEVE_OPT_LEN_MASK: u8 = (1 << GENEVE_OPT_RESERVED_SHIFT) - 1;
pub const GENEVE_OPT_LEN_SCALE_SHIFT: u8 = 2;

/// Address family values stored in a key's tunnel protocol byte.
pub const TUN_PROTO_INET: u8 = 2;
pub const TUN_PROTO_INET6: u8 = 10;

bitflags::bitflags! {
    /// Tunnel key flags. The three `*_OPT` flags double as the
    /// discriminant for the option slot.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct TunnelFlags: u16 {
        const CSUM = 0x0001;
        const KEY = 0x0004;
        const DONT_FRAGMENT = 0x0100;
        const OAM = 0x0200;
        const CRIT_OPT = 0x0400;
        const GENEVE_OPT = 0x0800;
        const VXLAN_OPT = 0x1000;
        const ERSPAN_OPT = 0x4000;
    }
}

impl TunnelFlags {
    pub const OPTIONS_PRESENT: Self = Self::GENEVE_OPT
        .union(Self::VXLAN_OPT)
        .union(Self::ERSPAN_OPT);
}

bitflags::bitflags! {
    /// How a tunnel destination attached to a set action is used.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct TunnelMode: u8 {
        const TX = 0x01;
        const IPV6 = 0x02;
        /// Only the tunnel id is meaningful; the endpoints come from
        /// the bridge the port is attached to.
        const BRIDGE = 0x04;
    }
}

/// The option sub-format occupying a tunnel key's option slot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TunnelOpts {
    #[default]
    None,
    /// A list of Geneve option TLVs, 4-byte aligned.
    Geneve(Vec<u8>),
    /// The VXLAN group based policy extension.
    Vxlan { gbp: u32 },
    Erspan(ErspanMetadata),
}

impl TunnelOpts {
    /// The flag that selects this sub-format.
    pub fn flag(&self) -> TunnelFlags {
        match self {
            TunnelOpts::None => TunnelFlags::empty(),
            TunnelOpts::Geneve(_) => TunnelFlags::GENEVE_OPT,
            TunnelOpts::Vxlan { .. } => TunnelFlags::VXLAN_OPT,
            TunnelOpts::Erspan(_) => TunnelFlags::ERSPAN_OPT,
        }
    }

    /// The number of option slot bytes this sub-format occupies.
    pub fn len(&self) -> usize {
        match self {
            TunnelOpts::None => 0,
            TunnelOpts::Geneve(opts) => opts.len(),
            TunnelOpts::Vxlan { .. } => size_of::<u32>(),
            TunnelOpts::Erspan(_) => size_of::<ErspanMetadata>(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bytes this sub-format stores in the option slot.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TunnelOpts::None => Vec::new(),
            TunnelOpts::Geneve(opts) => opts.clone(),
            TunnelOpts::Vxlan { gbp } => gbp.to_ne_bytes().to_vec(),
            TunnelOpts::Erspan(md) => md.as_bytes().to_vec(),
        }
    }
}

/// A single Geneve option TLV.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GeneveOpt<'a> {
    pub class: u16,
    pub ty: u8,
    pub data: &'a [u8],
}

impl GeneveOpt<'_> {
    /// Whether a receiver that does not understand this option must
    /// drop the packet.
    pub fn is_critical(&self) -> bool {
        (self.ty >> GENEVE_OPT_CRIT_SHIFT) != 0
    }
}

/// Walk a buffer of Geneve options.
pub struct GeneveOptIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> GeneveOptIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }
}

impl<'a> Iterator for GeneveOptIter<'a> {
    type Item = Result<GeneveOpt<'a>, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }

        if self.buf.len() < GENEVE_OPT_HDR_LEN {
            self.failed = true;
            return Some(Err(FlowError::invalid(format!(
                "geneve option header truncated ({} bytes)",
                self.buf.len()
            ))));
        }

        let class = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        let ty = self.buf[2];
        let body = usize::from(self.buf[3] & GENEVE_OPT_LEN_MASK)
            << GENEVE_OPT_LEN_SCALE_SHIFT;
        let total = GENEVE_OPT_HDR_LEN + body;

        if total > self.buf.len() {
            self.failed = true;
            return Some(Err(FlowError::invalid(format!(
                "geneve option length {} exceeds remaining {}",
                total,
                self.buf.len()
            ))));
        }

        let data = &self.buf[GENEVE_OPT_HDR_LEN..total];
        self.buf = &self.buf[total..];
        Some(Ok(GeneveOpt { class, ty, data }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn walk_geneve_opts() {
        #[rustfmt::skip]
        let buf = [
            // class, type (critical), length = 1 word
            0x01, 0x29, 0x80, 0x01,
            0xde, 0xad, 0xbe, 0xef,
            // class, type, no body
            0x01, 0x29, 0x02, 0x00,
        ];

        let opts: Vec<_> =
            GeneveOptIter::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].class, 0x0129);
        assert!(opts[0].is_critical());
        assert_eq!(opts[0].data, &[0xde, 0xad, 0xbe, 0xef]);
        assert!(!opts[1].is_critical());
        assert!(opts[1].data.is_empty());
    }

    #[test]
    fn geneve_opt_overrun() {
        // Claims two words of body but carries one.
        let buf = [0x01, 0x29, 0x00, 0x02, 0, 0, 0, 0];
        let mut iter = GeneveOptIter::new(&buf);
        assert!(matches!(iter.next(), Some(Err(FlowError::Invalid(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn opts_discriminant() {
        assert_eq!(TunnelOpts::None.flag(), TunnelFlags::empty());
        assert_eq!(
            TunnelOpts::Vxlan { gbp: 5 }.flag(),
            TunnelFlags::VXLAN_OPT
        );
        assert_eq!(TunnelOpts::Vxlan { gbp: 5 }.len(), 4);
        assert!(TunnelFlags::OPTIONS_PRESENT.contains(TunnelFlags::ERSPAN_OPT));
    }
}
