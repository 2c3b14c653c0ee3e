// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ethertypes and VLAN tag bits.

/// Stored in a key for an Ethernet frame without an ethertype (an
/// 802.2 LLC frame).
pub const ETHER_TYPE_802_2: u16 = 0x0004;
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_TEB: u16 = 0x6558;
pub const ETHER_TYPE_RARP: u16 = 0x8035;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;
pub const ETHER_TYPE_MPLS_UC: u16 = 0x8847;
pub const ETHER_TYPE_MPLS_MC: u16 = 0x8848;
pub const ETHER_TYPE_QINQ: u16 = 0x88A8;
pub const ETHER_TYPE_NSH: u16 = 0x894F;

/// Values below this are 802.3 length fields, not ethertypes.
pub const ETH_P_802_3_MIN: u16 = 0x0600;

/// Length of an Ethernet header without VLAN tags.
pub const ETHER_HDR_SZ: u32 = 14;

/// The CFI/DEI bit of a VLAN TCI. A key uses it to mark that a tag is
/// present at all, so that a TCI of zero can still be matched.
pub const VLAN_CFI_MASK: u16 = 0x1000;

/// The number of MPLS labels a key can hold.
pub const MPLS_LABEL_DEPTH: usize = 3;

#[inline]
pub fn eth_type_vlan(ty: u16) -> bool {
    ty == ETHER_TYPE_VLAN || ty == ETHER_TYPE_QINQ
}

#[inline]
pub fn eth_p_mpls(ty: u16) -> bool {
    ty == ETHER_TYPE_MPLS_UC || ty == ETHER_TYPE_MPLS_MC
}

/// Tunnel protocol numbers used by NSH's next-protocol field.
pub const TUN_P_IPV4: u8 = 0x1;
pub const TUN_P_IPV6: u8 = 0x2;
pub const TUN_P_ETHERNET: u8 = 0x3;
pub const TUN_P_NSH: u8 = 0x4;
pub const TUN_P_MPLS: u8 = 0x5;

/// Map an ethertype to its NSH next-protocol number.
pub fn tun_p_from_eth_p(ty: u16) -> Option<u8> {
    match ty {
        ETHER_TYPE_IPV4 => Some(TUN_P_IPV4),
        ETHER_TYPE_IPV6 => Some(TUN_P_IPV6),
        ETHER_TYPE_NSH => Some(TUN_P_NSH),
        ETHER_TYPE_TEB => Some(TUN_P_ETHERNET),
        ETHER_TYPE_MPLS_UC => Some(TUN_P_MPLS),
        _ => None,
    }
}

/// Map an NSH next-protocol number to its ethertype.
pub fn tun_p_to_eth_p(np: u8) -> Option<u16> {
    match np {
        TUN_P_IPV4 => Some(ETHER_TYPE_IPV4),
        TUN_P_IPV6 => Some(ETHER_TYPE_IPV6),
        TUN_P_NSH => Some(ETHER_TYPE_NSH),
        TUN_P_ETHERNET => Some(ETHER_TYPE_TEB),
        TUN_P_MPLS => Some(ETHER_TYPE_MPLS_UC),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nsh_next_proto_mapping() {
        for ty in [
            ETHER_TYPE_IPV4,
            ETHER_TYPE_IPV6,
            ETHER_TYPE_NSH,
            ETHER_TYPE_TEB,
            ETHER_TYPE_MPLS_UC,
        ] {
            let np = tun_p_from_eth_p(ty).unwrap();
            assert_eq!(tun_p_to_eth_p(np), Some(ty));
        }

        assert_eq!(tun_p_from_eth_p(ETHER_TYPE_MPLS_MC), None);
        assert_eq!(tun_p_to_eth_p(0), None);
    }
}
