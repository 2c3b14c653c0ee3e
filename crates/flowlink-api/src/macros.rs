// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

/// Declare an attribute type catalog.
///
/// Each catalog is a `u16`-backed enum whose discriminants are the
/// on-wire type numbers. The macro also generates the conversions used
/// by the parser (`TryFrom<u16>`), a presence bit for the 64-bit
/// attribute sets, and a `MAX` constant naming the highest type
/// accepted from the wire. Variants listed after `MAX` are internal to
/// compiled programs and never accepted from a caller.
macro_rules! attr_types {
    (
        $(#[$meta:meta])*
        pub enum $name:ident max $max:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $val:expr,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            serde::Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            serde::Serialize,
        )]
        #[repr(u16)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant = $val,
            )+
        }

        impl $name {
            /// The highest type number accepted from the wire.
            pub const MAX: u16 = $name::$max as u16;

            /// This type's bit in an attribute presence set.
            #[inline]
            pub const fn bit(self) -> u64 {
                1u64 << (self as u16)
            }
        }

        impl TryFrom<u16> for $name {
            type Error = u16;

            fn try_from(val: u16) -> core::result::Result<Self, u16> {
                $(
                    if val == $val {
                        return Ok($name::$variant);
                    }
                )+
                Err(val)
            }
        }

        impl From<$name> for u16 {
            fn from(val: $name) -> u16 {
                val as u16
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(
                &self,
                f: &mut core::fmt::Formatter<'_>,
            ) -> core::fmt::Result {
                write!(f, "{:?}", self)
            }
        }
    };
}
