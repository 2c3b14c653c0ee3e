// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const IP_PROTO_ICMPV6: u8 = 58;
pub const IP_PROTO_SCTP: u8 = 132;

/// ICMPv6 neighbor solicitation.
pub const NDISC_NEIGHBOUR_SOLICITATION: u8 = 135;
/// ICMPv6 neighbor advertisement.
pub const NDISC_NEIGHBOUR_ADVERTISEMENT: u8 = 136;

/// The only bits of an IPv6 flow label. Anything above is invalid.
pub const IPV6_FLOW_LABEL_MASK: u32 = 0x000F_FFFF;

/// Fragment classification of an IP packet, as stored in a key.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[repr(u8)]
pub enum FragType {
    #[default]
    None = 0,
    /// The first fragment, which carries the transport header.
    First = 1,
    /// A non-first fragment. Transport fields are meaningless.
    Later = 2,
}

impl FragType {
    pub const MAX: u8 = FragType::Later as u8;
}

impl TryFrom<u8> for FragType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(FragType::None),
            1 => Ok(FragType::First),
            2 => Ok(FragType::Later),
            _ => Err(val),
        }
    }
}

impl Display for FragType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FragType::None => "no",
            FragType::First => "first",
            FragType::Later => "later",
        };
        write!(f, "{s}")
    }
}

bitflags::bitflags! {
    /// Connection tracking state bits.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct CtState: u32 {
        const NEW = 0x01;
        const ESTABLISHED = 0x02;
        const RELATED = 0x04;
        const REPLY_DIR = 0x08;
        const INVALID = 0x10;
        const TRACKED = 0x20;
        const SRC_NAT = 0x40;
        const DST_NAT = 0x80;
    }
}

/// Every connection tracking state bit a key may carry.
pub const CT_SUPPORTED_MASK: u32 = CtState::all().bits();

/// The only hash algorithm accepted by the hash action.
pub const HASH_ALG_L4: u32 = 0;

/// The add MPLS action flag asking for the label to be pushed in
/// front of the network header rather than the Ethernet header.
pub const MPLS_L3_TUNNEL_FLAG_MASK: u16 = 1 << 0;
