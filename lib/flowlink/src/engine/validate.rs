// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Cross-field match validation.
//!
//! Once both sides are decoded, the key's protocol fields determine
//! which attributes it must have carried, and the mask may only name
//! attributes whose enclosing protocol it matches exactly. A mask that
//! wildcards the ethertype cannot match on IPv4 addresses, for
//! example, since those bytes could belong to any protocol.

use super::Log;
use super::Result;
use super::key::MatchBuilder;
use super::nlattr::AttrSet;
use crate::api::ETHER_TYPE_ARP;
use crate::api::ETHER_TYPE_IPV4;
use crate::api::ETHER_TYPE_IPV6;
use crate::api::ETHER_TYPE_NSH;
use crate::api::ETHER_TYPE_RARP;
use crate::api::FlowError;
use crate::api::FragType;
use crate::api::IP_PROTO_ICMP;
use crate::api::IP_PROTO_ICMPV6;
use crate::api::IP_PROTO_SCTP;
use crate::api::IP_PROTO_TCP;
use crate::api::IP_PROTO_UDP;
use crate::api::KeyAttr;
use crate::api::NDISC_NEIGHBOUR_ADVERTISEMENT;
use crate::api::NDISC_NEIGHBOUR_SOLICITATION;
use crate::api::eth_p_mpls;
use crate::nlerr;

/// Mask attributes that have to be earned by an exact match on the
/// protocol field above them.
const GATED: AttrSet = AttrSet::from_bits(
    KeyAttr::Ipv4.bit()
        | KeyAttr::CtOrigTupleIpv4.bit()
        | KeyAttr::Ipv6.bit()
        | KeyAttr::CtOrigTupleIpv6.bit()
        | KeyAttr::Tcp.bit()
        | KeyAttr::TcpFlags.bit()
        | KeyAttr::Udp.bit()
        | KeyAttr::Sctp.bit()
        | KeyAttr::Icmp.bit()
        | KeyAttr::Icmpv6.bit()
        | KeyAttr::Arp.bit()
        | KeyAttr::Nd.bit()
        | KeyAttr::Mpls.bit()
        | KeyAttr::Nsh.bit(),
);

const ALWAYS_ALLOWED: AttrSet = AttrSet::from_bits(
    KeyAttr::Tunnel.bit() | KeyAttr::InPort.bit() | KeyAttr::Ethertype.bit(),
);

/// Check a decoded match.
///
/// `key_attrs` and `mask_attrs` are the attribute types each stream
/// carried once VLAN levels were resolved. Without a mask only the key
/// requirements apply.
///
/// # Errors
///
/// * [`FlowError::MissingRequiredField`]: the key's ethertype or IP
///   protocol implies an attribute the key lacks.
/// * [`FlowError::DisallowedMaskField`]: the mask names an attribute
///   whose protocol it does not match exactly.
pub fn validate_match(
    m: &MatchBuilder,
    has_mask: bool,
    key_attrs: AttrSet,
    mask_attrs: AttrSet,
    log: &Log,
) -> Result<()> {
    let key = &m.key;
    let mask = has_mask.then_some(&m.mask.key);
    let eth_exact = mask.is_some_and(|mk| mk.eth.ty.get() == u16::MAX);
    let proto_exact = mask.is_some_and(|mk| mk.ip.proto == 0xff);

    let mut expected = AttrSet::EMPTY;
    let mut allowed = key_attrs.difference(GATED).union(ALWAYS_ALLOWED);

    let mut expect = |ty: KeyAttr, exact: bool, allowed: &mut AttrSet| {
        expected.insert(ty);
        if exact {
            allowed.insert(ty);
        }
    };

    let eth_ty = key.eth.ty.get();

    if eth_ty == ETHER_TYPE_ARP || eth_ty == ETHER_TYPE_RARP {
        expect(KeyAttr::Arp, eth_exact, &mut allowed);
    }

    if eth_p_mpls(eth_ty) {
        expect(KeyAttr::Mpls, eth_exact, &mut allowed);
    }

    let l4 = key.ip.frag != FragType::Later as u8;

    if eth_ty == ETHER_TYPE_IPV4 {
        expect(KeyAttr::Ipv4, eth_exact, &mut allowed);
        if eth_exact {
            allowed.insert(KeyAttr::CtOrigTupleIpv4);
        }

        if l4 {
            match key.ip.proto {
                IP_PROTO_UDP => expect(KeyAttr::Udp, proto_exact, &mut allowed),
                IP_PROTO_SCTP => {
                    expect(KeyAttr::Sctp, proto_exact, &mut allowed)
                }
                IP_PROTO_TCP => {
                    // Flags are optional in the key; a mask may name
                    // them alongside the ports.
                    expect(KeyAttr::Tcp, proto_exact, &mut allowed);
                    if proto_exact {
                        allowed.insert(KeyAttr::TcpFlags);
                    }
                }
                IP_PROTO_ICMP => {
                    expect(KeyAttr::Icmp, proto_exact, &mut allowed)
                }
                _ => {}
            }
        }
    }

    if eth_ty == ETHER_TYPE_IPV6 {
        expect(KeyAttr::Ipv6, eth_exact, &mut allowed);
        if eth_exact {
            allowed.insert(KeyAttr::CtOrigTupleIpv6);
        }

        if l4 {
            match key.ip.proto {
                IP_PROTO_UDP => expect(KeyAttr::Udp, proto_exact, &mut allowed),
                IP_PROTO_SCTP => {
                    expect(KeyAttr::Sctp, proto_exact, &mut allowed)
                }
                IP_PROTO_TCP => {
                    expect(KeyAttr::Tcp, proto_exact, &mut allowed);
                    if proto_exact {
                        allowed.insert(KeyAttr::TcpFlags);
                    }
                }
                IP_PROTO_ICMPV6 => {
                    expect(KeyAttr::Icmpv6, proto_exact, &mut allowed);

                    let ty = key.tp.src.get();
                    if ty == u16::from(NDISC_NEIGHBOUR_SOLICITATION)
                        || ty == u16::from(NDISC_NEIGHBOUR_ADVERTISEMENT)
                    {
                        // The ND fields share key space with the
                        // original direction tuple.
                        allowed.remove(KeyAttr::CtOrigTupleIpv6);
                        let nd_exact =
                            mask.is_some_and(|mk| mk.tp.src.get() == 0x00ff);
                        expect(KeyAttr::Nd, nd_exact, &mut allowed);
                    }
                }
                _ => {}
            }
        }
    }

    if eth_ty == ETHER_TYPE_NSH {
        expect(KeyAttr::Nsh, eth_exact, &mut allowed);
    }

    if !key_attrs.is_superset(expected) {
        nlerr!(log, "missing key attributes";
            "keys" => ?key_attrs, "expected" => ?expected);
        return Err(log.fail(FlowError::MissingRequiredField {
            present: key_attrs.bits(),
            expected: expected.bits(),
        }));
    }

    if !allowed.is_superset(mask_attrs) {
        nlerr!(log, "unexpected mask attributes";
            "mask" => ?mask_attrs, "allowed" => ?allowed);
        return Err(log.fail(FlowError::DisallowedMaskField {
            mask: mask_attrs.bits(),
            allowed: allowed.bits(),
        }));
    }

    Ok(())
}
