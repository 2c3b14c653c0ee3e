// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the flowlink codec and its consumers: the
//! attribute type catalog, fixed-layout wire records, and the error
//! type returned by every decode and compile operation.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

#[macro_use]
mod macros;

pub mod attr;
pub mod error;
pub mod ether;
pub mod ip;
pub mod mac;
pub mod tunnel;
pub mod wire;

pub use attr::*;
pub use error::*;
pub use ether::*;
pub use ip::*;
pub use mac::*;
pub use tunnel::*;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The overall version of the attribute protocol understood by this
/// crate. Bump it whenever an attribute type is added, removed, or
/// changes its layout.
pub const API_VERSION: u64 = 1;

/// The largest port number the datapath accepts. A key without an
/// ingress port stores this value so that it cannot match any real
/// port.
pub const DP_MAX_PORTS: u16 = u16::MAX;

/// The maximum size of a compiled action program, in bytes.
pub const MAX_ACTIONS_BUFSIZE: usize = 32 * 1024;

/// The maximum length of a unique flow identifier, in bytes.
pub const MAX_UFID_LENGTH: usize = 16;

/// The link-layer framing of a packet, as tracked by the match and by
/// the action compiler.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[repr(u8)]
pub enum MacProto {
    /// No link-layer header: the packet starts at the network layer.
    None = 0,
    #[default]
    Ethernet = 1,
}

impl MacProto {
    /// Interpret the byte stored in a flow key. Any value other than
    /// [`MacProto::None`] is treated as Ethernet.
    pub fn from_key(val: u8) -> Self {
        if val == MacProto::None as u8 {
            MacProto::None
        } else {
            MacProto::Ethernet
        }
    }
}

impl Display for MacProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MacProto::None => "none",
            MacProto::Ethernet => "ethernet",
        };
        write!(f, "{s}")
    }
}
