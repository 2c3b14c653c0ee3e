// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Fixed-layout records carried as attribute values.
//!
//! Every record is `Unaligned` so that it can be read straight out of
//! an attribute payload regardless of where the payload sits. Sizes
//! match the datapath's C structures, including tail padding.

use crate::MacAddr;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::native_endian;
use zerocopy::byteorder::network_endian;

pub type Be16 = network_endian::U16;
pub type Be32 = network_endian::U32;
pub type Be64 = network_endian::U64;
pub type Ne16 = native_endian::U16;
pub type Ne32 = native_endian::U32;

/// The header in front of every attribute: total length including this
/// header, then the type. Both are in host byte order.
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
#[repr(C)]
pub struct NlAttrHdr {
    pub len: Ne16,
    pub ty: Ne16,
}

macro_rules! wire_records {
    ($(
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* pub $field:ident: $ty:ty,)+
        }
    )+) => {$(
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            Eq,
            FromBytes,
            Immutable,
            IntoBytes,
            KnownLayout,
            PartialEq,
            Unaligned,
        )]
        #[repr(C)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)+
        }
    )+};
}

wire_records! {
    pub struct KeyEthernet {
        pub src: [u8; 6],
        pub dst: [u8; 6],
    }

    pub struct KeyIpv4 {
        pub src: [u8; 4],
        pub dst: [u8; 4],
        pub proto: u8,
        pub tos: u8,
        pub ttl: u8,
        pub frag: u8,
    }

    pub struct KeyIpv6 {
        pub src: [u8; 16],
        pub dst: [u8; 16],
        pub label: Be32,
        pub proto: u8,
        pub tclass: u8,
        pub hlimit: u8,
        pub frag: u8,
    }

    /// Transport ports, shared by TCP, UDP and SCTP.
    pub struct KeyPorts {
        pub src: Be16,
        pub dst: Be16,
    }

    /// ICMP and ICMPv6 type and code.
    pub struct KeyIcmp {
        pub ty: u8,
        pub code: u8,
    }

    pub struct KeyArp {
        pub sip: [u8; 4],
        pub tip: [u8; 4],
        pub op: Be16,
        pub sha: [u8; 6],
        pub tha: [u8; 6],
        pub pad: [u8; 2],
    }

    pub struct KeyNd {
        pub target: [u8; 16],
        pub sll: [u8; 6],
        pub tll: [u8; 6],
    }

    pub struct KeyMpls {
        pub lse: Be32,
    }

    pub struct KeyCtTupleIpv4 {
        pub src: [u8; 4],
        pub dst: [u8; 4],
        pub src_port: Be16,
        pub dst_port: Be16,
        pub proto: u8,
        pub pad: [u8; 3],
    }

    pub struct KeyCtTupleIpv6 {
        pub src: [u8; 16],
        pub dst: [u8; 16],
        pub src_port: Be16,
        pub dst_port: Be16,
        pub proto: u8,
        pub pad: [u8; 3],
    }

    pub struct NshBase {
        pub flags: u8,
        pub ttl: u8,
        pub mdtype: u8,
        pub np: u8,
        pub path_hdr: Be32,
    }

    pub struct NshMd1 {
        pub context: [Be32; 4],
    }

    pub struct ActionPushVlan {
        pub tpid: Be16,
        pub tci: Be16,
    }

    pub struct ActionPushMpls {
        pub lse: Be32,
        pub ethertype: Be16,
        pub pad: [u8; 2],
    }

    pub struct ActionAddMpls {
        pub lse: Be32,
        pub ethertype: Be16,
        pub tun_flags: Ne16,
    }

    pub struct ActionHash {
        pub alg: Ne32,
        pub basis: Ne32,
    }

    pub struct ActionTrunc {
        pub max_len: Ne32,
    }

    /// Argument record at the head of a compiled sample block.
    pub struct SampleArg {
        pub exec: u8,
        pub pad: [u8; 3],
        pub probability: Ne32,
    }

    /// Argument record at the head of a compiled length check block.
    pub struct CheckPktLenArg {
        pub pkt_len: Ne16,
        pub exec_for_greater: u8,
        pub exec_for_lesser_equal: u8,
    }

    /// ERSPAN metadata: a version word, then either a v1 session index
    /// or the v2 fields.
    pub struct ErspanMetadata {
        pub version: Ne32,
        pub body: [u8; 8],
    }
}

impl KeyEthernet {
    pub fn new(src: MacAddr, dst: MacAddr) -> Self {
        Self { src: src.bytes(), dst: dst.bytes() }
    }
}

impl ErspanMetadata {
    /// The v1 session index.
    pub fn index(&self) -> u32 {
        let [a, b, c, d, ..] = self.body;
        u32::from_be_bytes([a, b, c, d])
    }
}

/// Sizes of the NSH metadata blocks.
pub const NSH_MD1_CONTEXT_SIZE: usize = 4;
pub const NSH_CTX_HDRS_MAX_LEN: usize = 248;
pub const NSH_M_TYPE1: u8 = 0x01;
pub const NSH_M_TYPE2: u8 = 0x02;

#[cfg(test)]
mod test {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn record_sizes() {
        assert_eq!(size_of::<NlAttrHdr>(), 4);
        assert_eq!(size_of::<KeyEthernet>(), 12);
        assert_eq!(size_of::<KeyIpv4>(), 12);
        assert_eq!(size_of::<KeyIpv6>(), 40);
        assert_eq!(size_of::<KeyArp>(), 24);
        assert_eq!(size_of::<KeyNd>(), 28);
        assert_eq!(size_of::<KeyCtTupleIpv4>(), 16);
        assert_eq!(size_of::<KeyCtTupleIpv6>(), 40);
        assert_eq!(size_of::<NshBase>(), 8);
        assert_eq!(size_of::<NshMd1>(), 16);
        assert_eq!(size_of::<ActionPushMpls>(), 8);
        assert_eq!(size_of::<ActionAddMpls>(), 8);
        assert_eq!(size_of::<SampleArg>(), 8);
        assert_eq!(size_of::<CheckPktLenArg>(), 4);
        assert_eq!(size_of::<ErspanMetadata>(), 12);
    }

    #[test]
    fn ipv4_from_bytes() {
        #[rustfmt::skip]
        let bytes = [
            // src
            10, 0, 0, 1,
            // dst
            10, 0, 0, 2,
            // proto, tos, ttl, frag
            6, 0, 64, 0,
        ];
        let ip = KeyIpv4::read_from_bytes(&bytes[..]).unwrap();
        assert_eq!(ip.src, [10, 0, 0, 1]);
        assert_eq!(ip.proto, 6);
        assert_eq!(ip.ttl, 64);
    }
}
