// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The action compiler.
//!
//! Actions are checked in order against the packet as it will look at
//! that point: each push or pop changes the ethertype, VLAN tag, MPLS
//! depth, or link-layer framing that later actions see. Nested blocks
//! are checked against a copy of that state, so nothing they do leaks
//! out to the actions that follow them.
//!
//! Most actions are copied through unchanged. The exceptions are
//! rewritten into the form the datapath executes:
//!
//! * An unmasked set becomes a [`ActionAttr::SetToMasked`] record
//!   carrying the value followed by an all-ones mask.
//! * A set tunnel becomes a set of a [`KeyAttr::TunnelInfo`] record
//!   naming a tunnel destination in the buffer's side table.
//! * Sample, clone, and check_pkt_len blocks gain an argument record
//!   that says whether each nested list may run without deferring.

use super::DecodeCfg;
use super::Log;
use super::Result;
use super::action_buf::ActionBuffer;
use super::key::FlowKey;
use super::key::MatchBuilder;
use super::nlattr::Attr;
use super::nlattr::AttrIter;
use super::nlattr::AttrWriter;
use super::nlattr::NLA_HDRLEN;
use super::nlattr::ParsedAttrs;
use super::nlattr::nla_total_size;
use super::nsh::NshForm;
use super::nsh::put_nsh_exact_masked;
use super::nsh::validate_masked_nsh;
use super::nsh::validate_nsh;
use super::schema::ACTION_SCHEMA;
use super::schema::CHECK_PKT_LEN_SCHEMA;
use super::schema::CT_ACTION_SCHEMA;
use super::schema::KEY_SCHEMA;
use super::schema::NAT_SCHEMA;
use super::schema::SAMPLE_SCHEMA;
use super::schema::USERSPACE_SCHEMA;
use super::tunnel::TunnelInfo;
use super::tunnel::decode_tunnel;
use super::tunnel::geneve_crit_opt;
use crate::api::ActionAttr;
use crate::api::CheckPktLenAttr;
use crate::api::CloneAttr;
use crate::api::CtAttr;
use crate::api::DP_MAX_PORTS;
use crate::api::DecTtlAttr;
use crate::api::ETHER_HDR_SZ;
use crate::api::ETHER_TYPE_ARP;
use crate::api::ETHER_TYPE_IPV4;
use crate::api::ETHER_TYPE_IPV6;
use crate::api::ETHER_TYPE_NSH;
use crate::api::ETHER_TYPE_RARP;
use crate::api::ETHER_TYPE_TEB;
use crate::api::FlowError;
use crate::api::HASH_ALG_L4;
use crate::api::IP_PROTO_SCTP;
use crate::api::IP_PROTO_TCP;
use crate::api::IP_PROTO_UDP;
use crate::api::IPV6_FLOW_LABEL_MASK;
use crate::api::KeyAttr;
use crate::api::MPLS_L3_TUNNEL_FLAG_MASK;
use crate::api::MacProto;
use crate::api::NatAttr;
use crate::api::SampleAttr;
use crate::api::TUN_P_ETHERNET;
use crate::api::TunnelFlags;
use crate::api::UserspaceAttr;
use crate::api::VLAN_CFI_MASK;
use crate::api::eth_p_mpls;
use crate::api::eth_type_vlan;
use crate::api::tun_p_from_eth_p;
use crate::api::tun_p_to_eth_p;
use crate::api::wire::ActionAddMpls;
use crate::api::wire::ActionHash;
use crate::api::wire::ActionPushMpls;
use crate::api::wire::ActionPushVlan;
use crate::api::wire::ActionTrunc;
use crate::api::wire::CheckPktLenArg;
use crate::api::wire::KeyIpv4;
use crate::api::wire::KeyIpv6;
use crate::api::wire::Ne16;
use crate::api::wire::Ne32;
use crate::api::wire::SampleArg;
use crate::nlerr;
use alloc::vec::Vec;
use core::mem::offset_of;

/// What the packet looks like at a given point in an action list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct PacketState {
    eth_type: u16,
    vlan_tci: u16,
    mpls_label_count: u32,
    mac_proto: MacProto,
}

impl PacketState {
    fn from_key(key: &FlowKey) -> Self {
        let eth_type = key.eth.ty.get();
        let mpls_label_count = if eth_p_mpls(eth_type) {
            key.mpls.num_labels_mask.count_ones()
        } else {
            0
        };

        Self {
            eth_type,
            vlan_tci: key.eth.vlan.tci.get(),
            mpls_label_count,
            mac_proto: key.mac_proto(),
        }
    }

    fn has_vlan(&self) -> bool {
        self.vlan_tci & VLAN_CFI_MASK != 0
    }

    /// Whether an MPLS label may be pushed in front of the current
    /// network header. Only packets with a known tag order qualify.
    fn mpls_taggable(&self) -> bool {
        !self.has_vlan()
            && (matches!(
                self.eth_type,
                ETHER_TYPE_IPV4
                    | ETHER_TYPE_IPV6
                    | ETHER_TYPE_ARP
                    | ETHER_TYPE_RARP
            ) || eth_p_mpls(self.eth_type))
    }

    fn is_ip(&self) -> bool {
        self.eth_type == ETHER_TYPE_IPV4 || self.eth_type == ETHER_TYPE_IPV6
    }
}

/// Compile an action stream for a flow whose masked key is `key`.
///
/// On error nothing is returned: any tunnel destinations allocated
/// along the way are released with the partial buffer.
///
/// # Errors
///
/// * Parse errors from the action stream or any nested stream.
/// * [`FlowError::UnknownActionType`].
/// * [`FlowError::Invalid`]: an argument out of range, or a block
///   missing a required attribute.
/// * [`FlowError::IllegalActionForProtocol`]: an action the packet's
///   ethertype or protocol does not allow at that point.
/// * [`FlowError::InvalidFramingTransition`]: a push or pop that the
///   packet's link-layer framing does not allow.
/// * [`FlowError::BufferCapacityExceeded`],
///   [`FlowError::AllocationFailure`].
pub fn compile_actions(
    actions: &[u8],
    key: &FlowKey,
    cfg: &DecodeCfg<'_>,
) -> Result<ActionBuffer> {
    let mut buf =
        ActionBuffer::new(actions.len()).map_err(|e| cfg.log.fail(e))?;
    buf.set_orig_len(actions.len());

    let compiler = Compiler { key, cfg };
    compiler.copy_actions(actions, PacketState::from_key(key), &mut buf)?;
    Ok(buf)
}

/// Whether any action in `actions` may change the packet or the flow
/// fields later actions read.
pub fn actions_may_change_flow(actions: &[u8]) -> bool {
    AttrIter::new(actions).any(|a| {
        !matches!(
            ActionAttr::try_from(a.ty()),
            Ok(ActionAttr::Output
                | ActionAttr::Recirc
                | ActionAttr::Trunc
                | ActionAttr::Userspace)
        )
    })
}

struct Compiler<'a> {
    key: &'a FlowKey,
    cfg: &'a DecodeCfg<'a>,
}

impl Compiler<'_> {
    fn log(&self) -> &Log {
        &self.cfg.log
    }

    fn copy_actions(
        &self,
        actions: &[u8],
        mut st: PacketState,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let mut iter = AttrIter::new(actions);

        while let Some(a) = iter.next() {
            let last = iter.is_done();
            self.copy_action(a, &mut st, last, buf)?;
        }

        if iter.remaining() != 0 {
            return Err(self.log().fail(FlowError::TrailingBytes {
                table: ACTION_SCHEMA.name().into(),
                remaining: iter.remaining(),
            }));
        }

        Ok(())
    }

    fn copy_action(
        &self,
        a: Attr<'_>,
        st: &mut PacketState,
        last: bool,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let ty = a.ty();

        let action = match ActionAttr::try_from(ty) {
            Ok(action) if ty <= ActionAttr::MAX => action,
            _ => {
                nlerr!(log, "unknown action type"; "type" => ty);
                return Err(FlowError::UnknownActionType(ty));
            }
        };

        let entry = ACTION_SCHEMA.entry(ty);
        if !entry.accepts(a.len()) {
            return Err(log.fail(FlowError::MalformedAttr {
                table: ACTION_SCHEMA.name().into(),
                ty,
                len: a.len(),
                expected: entry.fixed_len().unwrap_or(0),
            }));
        }

        match action {
            ActionAttr::Unspec => {
                return Err(log.fail(FlowError::invalid("action type 0")));
            }

            // Only ever produced by this compiler; rejected above.
            ActionAttr::SetToMasked => {
                return Err(FlowError::UnknownActionType(ty));
            }

            ActionAttr::Userspace => self.validate_userspace(a)?,

            ActionAttr::Output => {
                let port = a.read_u32()?;
                if port >= u32::from(DP_MAX_PORTS) {
                    return Err(log.fail(FlowError::invalid(format!(
                        "output port {port} out of range"
                    ))));
                }
            }

            ActionAttr::Trunc => {
                let trunc: ActionTrunc = a.read()?;
                if trunc.max_len.get() < ETHER_HDR_SZ {
                    return Err(log.fail(FlowError::invalid(format!(
                        "truncate length {} shorter than an Ethernet header",
                        trunc.max_len.get()
                    ))));
                }
            }

            ActionAttr::Hash => {
                let hash: ActionHash = a.read()?;
                if hash.alg.get() != HASH_ALG_L4 {
                    return Err(log.fail(FlowError::invalid(format!(
                        "unsupported hash algorithm {}",
                        hash.alg.get()
                    ))));
                }
            }

            ActionAttr::PopVlan => {
                if st.mac_proto != MacProto::Ethernet {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "no Ethernet header to pop a VLAN tag from",
                    )));
                }
                st.vlan_tci = 0;
            }

            ActionAttr::PushVlan => {
                if st.mac_proto != MacProto::Ethernet {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "no Ethernet header to push a VLAN tag onto",
                    )));
                }

                let vlan: ActionPushVlan = a.read()?;
                if !eth_type_vlan(vlan.tpid.get()) {
                    return Err(log.fail(FlowError::invalid(format!(
                        "{:#06x} is not a VLAN TPID",
                        vlan.tpid.get()
                    ))));
                }

                if vlan.tci.get() & VLAN_CFI_MASK == 0 {
                    return Err(log.fail(FlowError::invalid(
                        "pushed VLAN TCI lacks the CFI bit",
                    )));
                }
                st.vlan_tci = vlan.tci.get();
            }

            ActionAttr::Recirc | ActionAttr::CtClear => {}

            // Meters that do not exist are ignored at execution.
            ActionAttr::Meter => {}

            ActionAttr::AddMpls => {
                let mpls: ActionAddMpls = a.read()?;
                let ethertype = mpls.ethertype.get();
                if !eth_p_mpls(ethertype) {
                    return Err(log.fail(FlowError::invalid(format!(
                        "{ethertype:#06x} is not an MPLS ethertype"
                    ))));
                }

                if mpls.tun_flags.get() & MPLS_L3_TUNNEL_FLAG_MASK != 0 {
                    if !st.mpls_taggable() {
                        return Err(log.fail(FlowError::illegal(
                            action,
                            format!(
                                "cannot add an MPLS label to ethertype \
                                 {:#06x}",
                                st.eth_type
                            ),
                        )));
                    }
                    st.mpls_label_count += 1;
                } else if st.mac_proto == MacProto::Ethernet {
                    st.mpls_label_count = 1;
                    st.mac_proto = MacProto::None;
                } else {
                    st.mpls_label_count += 1;
                }
                st.eth_type = ethertype;
            }

            ActionAttr::PushMpls => {
                let mpls: ActionPushMpls = a.read()?;
                let ethertype = mpls.ethertype.get();
                if !eth_p_mpls(ethertype) {
                    return Err(log.fail(FlowError::invalid(format!(
                        "{ethertype:#06x} is not an MPLS ethertype"
                    ))));
                }

                if !st.mpls_taggable() {
                    return Err(log.fail(FlowError::illegal(
                        action,
                        format!(
                            "cannot push an MPLS label onto ethertype {:#06x}",
                            st.eth_type
                        ),
                    )));
                }
                st.eth_type = ethertype;
                st.mpls_label_count += 1;
            }

            ActionAttr::PopMpls => {
                if st.has_vlan() || !eth_p_mpls(st.eth_type) {
                    return Err(log.fail(FlowError::illegal(
                        action,
                        "no MPLS label on top of the packet",
                    )));
                }

                let proto = a.read_be16()?;
                if proto == ETHER_TYPE_TEB && st.mac_proto != MacProto::None {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "popping to an Ethernet frame needs no outer \
                         Ethernet header",
                    )));
                }

                // Once the last label is gone nothing downstream may
                // rely on the ethertype until the packet is
                // recirculated.
                st.mpls_label_count = st.mpls_label_count.saturating_sub(1);
                st.eth_type = match st.mpls_label_count {
                    0 => 0,
                    _ if !eth_p_mpls(proto) => 0,
                    _ => proto,
                };
            }

            ActionAttr::Set => return self.validate_set(a, false, st, buf),
            ActionAttr::SetMasked => {
                return self.validate_set(a, true, st, buf);
            }

            ActionAttr::Sample => return self.copy_sample(a, st, last, buf),

            ActionAttr::Ct => self.validate_ct(a)?,

            ActionAttr::PushEth => {
                if st.mac_proto != MacProto::None {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "packet already has an Ethernet header",
                    )));
                }
                st.mac_proto = MacProto::Ethernet;
            }

            ActionAttr::PopEth => {
                if st.mac_proto != MacProto::Ethernet {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "no Ethernet header to pop",
                    )));
                }

                if st.has_vlan() {
                    return Err(log.fail(FlowError::framing(
                        action,
                        "cannot pop an Ethernet header with a VLAN tag",
                    )));
                }
                st.mac_proto = MacProto::None;
            }

            ActionAttr::PushNsh => {
                if st.mac_proto != MacProto::Ethernet
                    && tun_p_from_eth_p(st.eth_type).is_none()
                {
                    return Err(log.fail(FlowError::framing(
                        action,
                        format!(
                            "ethertype {:#06x} cannot follow an NSH header",
                            st.eth_type
                        ),
                    )));
                }
                st.mac_proto = MacProto::None;
                validate_nsh(a, NshForm::Push, log)?;
            }

            ActionAttr::PopNsh => {
                if st.eth_type != ETHER_TYPE_NSH {
                    return Err(log.fail(FlowError::illegal(
                        action,
                        "packet has no NSH header",
                    )));
                }

                let np = self.key.nsh.np;
                if tun_p_to_eth_p(np).is_none() {
                    return Err(log.fail(FlowError::invalid(format!(
                        "unknown NSH next protocol {np}"
                    ))));
                }

                st.mac_proto = if np == TUN_P_ETHERNET {
                    MacProto::Ethernet
                } else {
                    MacProto::None
                };
            }

            ActionAttr::Clone => return self.copy_clone(a, st, last, buf),

            ActionAttr::CheckPktLen => {
                return self.copy_check_pkt_len(a, st, last, buf);
            }

            ActionAttr::DecTtl => return self.copy_dec_ttl(a, st, buf),
        }

        buf.copy_action(a, log)
    }

    fn validate_userspace(&self, a: Attr<'_>) -> Result<()> {
        let log = self.log();
        let attrs =
            ParsedAttrs::parse(a.data(), &USERSPACE_SCHEMA, false, log)?;

        let pid = match attrs.get(UserspaceAttr::Pid) {
            Some(pid) => pid.read_u32()?,
            None => 0,
        };

        if pid == 0 {
            return Err(log.fail(FlowError::invalid(
                "userspace action needs a nonzero pid",
            )));
        }

        Ok(())
    }

    fn validate_ct(&self, a: Attr<'_>) -> Result<()> {
        let log = self.log();

        if !self.cfg.net.ct_supports(KeyAttr::CtState) {
            return Err(log.fail(FlowError::unsupported(
                "connection tracking is not available",
            )));
        }

        let ty = self.key.eth.ty.get();
        if ty != ETHER_TYPE_IPV4 && ty != ETHER_TYPE_IPV6 {
            return Err(log.fail(FlowError::illegal(
                ActionAttr::Ct,
                format!("ct needs an IP flow, not ethertype {ty:#06x}"),
            )));
        }

        let attrs =
            ParsedAttrs::parse(a.data(), &CT_ACTION_SCHEMA, false, log)?;

        if let Some(nat) = attrs.get(CtAttr::Nat) {
            let nat = ParsedAttrs::parse(nat.data(), &NAT_SCHEMA, false, log)?;
            if nat.contains(NatAttr::Src) && nat.contains(NatAttr::Dst) {
                return Err(log.fail(FlowError::invalid(
                    "nat may rewrite the source or the destination, not both",
                )));
            }

            for ty in [NatAttr::IpMin, NatAttr::IpMax] {
                if let Some(ip) = nat.get(ty) {
                    if ip.len() != 4 && ip.len() != 16 {
                        return Err(log.fail(FlowError::MalformedAttr {
                            table: NAT_SCHEMA.name().into(),
                            ty: ty.into(),
                            len: ip.len(),
                            expected: 4,
                        }));
                    }
                }
            }
        }

        Ok(())
    }

    /// Check a set or masked set action and write its compiled form.
    fn validate_set(
        &self,
        a: Attr<'_>,
        masked: bool,
        st: &PacketState,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let action =
            if masked { ActionAttr::SetMasked } else { ActionAttr::Set };

        // A set carries exactly one key attribute.
        let inner = match a.nested().next() {
            Some(inner) if nla_total_size(inner.len()) == a.len() => inner,
            _ => {
                return Err(log.fail(FlowError::invalid(
                    "set action must hold exactly one key attribute",
                )));
            }
        };

        let key_type = inner.ty();
        let key_len = if masked { inner.len() / 2 } else { inner.len() };
        let target = match KeyAttr::try_from(key_type) {
            Ok(target) if key_type <= KeyAttr::MAX => target,
            _ => {
                return Err(log.fail(FlowError::invalid(format!(
                    "set of unknown key attribute {key_type}"
                ))));
            }
        };

        let entry = KEY_SCHEMA.entry(key_type);
        if !entry.accepts(key_len) || (masked && inner.len() % 2 != 0) {
            return Err(log.fail(FlowError::MalformedAttr {
                table: KEY_SCHEMA.name().into(),
                ty: key_type,
                len: key_len,
                expected: entry.fixed_len().unwrap_or(0),
            }));
        }

        let (val, mask) = inner.data().split_at(key_len);
        if masked
            && target != KeyAttr::Nsh
            && val.iter().zip(mask).any(|(v, m)| v & !m != 0)
        {
            return Err(log.fail(FlowError::invalid(format!(
                "masked set of key attribute {key_type} sets bits outside \
                 its mask"
            ))));
        }

        let not_here = |what: &str| {
            log.fail(FlowError::illegal(
                action,
                format!("cannot set {what} on ethertype {:#06x}", st.eth_type),
            ))
        };

        match target {
            KeyAttr::Priority
            | KeyAttr::SkbMark
            | KeyAttr::CtMark
            | KeyAttr::CtLabels => {}

            KeyAttr::Ethernet => {
                if st.mac_proto != MacProto::Ethernet {
                    return Err(log.fail(FlowError::illegal(
                        action,
                        "cannot set Ethernet addresses without an \
                         Ethernet header",
                    )));
                }
            }

            KeyAttr::Tunnel => {
                if masked {
                    return Err(log.fail(FlowError::invalid(
                        "masked tunnel set is not supported",
                    )));
                }
                return self.copy_set_tunnel(inner, buf);
            }

            KeyAttr::Ipv4 => {
                if st.eth_type != ETHER_TYPE_IPV4 {
                    return Err(not_here("IPv4 fields"));
                }

                let ipv4: KeyIpv4 = Attr::new(key_type, val).read()?;
                if masked {
                    let m: KeyIpv4 = Attr::new(key_type, mask).read()?;
                    if m.proto != 0 || m.frag != 0 {
                        return Err(log.fail(FlowError::invalid(
                            "IPv4 protocol and fragment type are not \
                             writable",
                        )));
                    }
                } else if ipv4.proto != self.key.ip.proto
                    || ipv4.frag != self.key.ip.frag
                {
                    return Err(log.fail(FlowError::invalid(
                        "IPv4 set may not change protocol or fragment type",
                    )));
                }
            }

            KeyAttr::Ipv6 => {
                if st.eth_type != ETHER_TYPE_IPV6 {
                    return Err(not_here("IPv6 fields"));
                }

                let ipv6: KeyIpv6 = Attr::new(key_type, val).read()?;
                if masked {
                    let m: KeyIpv6 = Attr::new(key_type, mask).read()?;
                    if m.proto != 0 || m.frag != 0 {
                        return Err(log.fail(FlowError::invalid(
                            "IPv6 protocol and fragment type are not \
                             writable",
                        )));
                    }

                    if m.label.get() & !IPV6_FLOW_LABEL_MASK != 0 {
                        return Err(log.fail(FlowError::invalid(
                            "IPv6 flow label mask is wider than 20 bits",
                        )));
                    }
                } else if ipv6.proto != self.key.ip.proto
                    || ipv6.frag != self.key.ip.frag
                {
                    return Err(log.fail(FlowError::invalid(
                        "IPv6 set may not change protocol or fragment type",
                    )));
                }

                if ipv6.label.get() & !IPV6_FLOW_LABEL_MASK != 0 {
                    return Err(log.fail(FlowError::invalid(format!(
                        "IPv6 flow label {:#x} is wider than 20 bits",
                        ipv6.label.get()
                    ))));
                }
            }

            KeyAttr::Tcp => self.check_transport(st, IP_PROTO_TCP, action)?,
            KeyAttr::Udp => self.check_transport(st, IP_PROTO_UDP, action)?,
            KeyAttr::Sctp => self.check_transport(st, IP_PROTO_SCTP, action)?,

            KeyAttr::Mpls => {
                if !eth_p_mpls(st.eth_type) {
                    return Err(not_here("an MPLS label"));
                }
            }

            KeyAttr::Nsh => {
                if st.eth_type != ETHER_TYPE_NSH {
                    return Err(not_here("NSH fields"));
                }

                if masked {
                    validate_masked_nsh(inner, log)?;
                } else {
                    validate_nsh(inner, NshForm::Key, log)?;
                }
            }

            _ => {
                return Err(log.fail(FlowError::illegal(
                    action,
                    format!("key attribute {key_type} is not writable"),
                )));
            }
        }

        if masked {
            return buf.copy_action(a, log);
        }

        let nest = buf.begin_nested(ActionAttr::SetToMasked, log)?;
        if target == KeyAttr::Nsh {
            let mut w = AttrWriter::new();
            put_nsh_exact_masked(&mut w, inner);
            let stream = w.into_bytes().map_err(|e| log.fail(e))?;
            buf.add_raw(&stream, log)?;
        } else {
            let mut both = Vec::with_capacity(key_len * 2);
            both.extend_from_slice(val);
            both.resize(key_len * 2, 0xff);

            // Only the low 20 bits of the flow label are writable.
            if target == KeyAttr::Ipv6 {
                let off = key_len + offset_of!(KeyIpv6, label);
                let label = &mut both[off..off + size_of::<u32>()];
                let masked_label = IPV6_FLOW_LABEL_MASK.to_be_bytes();
                for (b, m) in label.iter_mut().zip(masked_label) {
                    *b &= m;
                }
            }
            buf.add_action(key_type, &both, log)?;
        }
        buf.end_nested(nest)?;

        Ok(())
    }

    fn check_transport(
        &self,
        st: &PacketState,
        proto: u8,
        action: ActionAttr,
    ) -> Result<()> {
        if !st.is_ip() || self.key.ip.proto != proto {
            return Err(self.log().fail(FlowError::illegal(
                action,
                format!(
                    "cannot set protocol {proto} ports on a flow with \
                     ethertype {:#06x} and protocol {}",
                    st.eth_type, self.key.ip.proto
                ),
            )));
        }
        Ok(())
    }

    fn copy_set_tunnel(
        &self,
        attr: Attr<'_>,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let mut m = MatchBuilder::new();
        let opts_type = decode_tunnel(attr, &mut m, false, log)?;
        let mut key = m.key;

        if key.tun_opts_len.get() != 0
            && opts_type == TunnelFlags::GENEVE_OPT
            && geneve_crit_opt(key.tun_opts_bytes(), log)?
        {
            let flags = key.tun_flags() | TunnelFlags::CRIT_OPT;
            key.tun_key.flags = Ne16::new(flags.bits());
        }

        let nest = buf.begin_nested(ActionAttr::Set, log)?;
        let dst = self
            .cfg
            .tunnels
            .alloc(TunnelInfo::from_key(&key))
            .map_err(|e| log.fail(e))?;
        buf.add_tunnel(dst, log)?;
        buf.end_nested(nest)?;

        Ok(())
    }

    /// The action list held by a block's sub-attribute.
    fn nested_actions<'a>(
        &self,
        attr: Option<Attr<'a>>,
        block: &str,
    ) -> Result<&'a [u8]> {
        match attr {
            Some(a) if a.is_empty() || a.len() >= NLA_HDRLEN => Ok(a.data()),
            _ => Err(self.log().fail(FlowError::invalid(format!(
                "{block} action is missing a valid action list"
            )))),
        }
    }

    fn copy_sample(
        &self,
        a: Attr<'_>,
        st: &PacketState,
        last: bool,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let attrs = ParsedAttrs::parse(a.data(), &SAMPLE_SCHEMA, false, log)?;

        if attrs.contains(SampleAttr::Unspec) {
            return Err(log.fail(FlowError::invalid("sample attribute 0")));
        }

        let Some(probability) = attrs.get(SampleAttr::Probability) else {
            return Err(log.fail(FlowError::invalid(
                "sample action is missing its probability",
            )));
        };
        let actions =
            self.nested_actions(attrs.get(SampleAttr::Actions), "sample")?;

        let nest = buf.begin_nested(ActionAttr::Sample, log)?;
        let arg = SampleArg {
            exec: u8::from(last || !actions_may_change_flow(actions)),
            pad: [0; 3],
            probability: Ne32::new(probability.read_u32()?),
        };
        buf.add_record(SampleAttr::Arg, &arg, log)?;
        self.copy_actions(actions, *st, buf)?;
        buf.end_nested(nest)?;

        Ok(())
    }

    fn copy_clone(
        &self,
        a: Attr<'_>,
        st: &PacketState,
        last: bool,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let actions = self.nested_actions(Some(a), "clone")?;

        let nest = buf.begin_nested(ActionAttr::Clone, log)?;
        let exec = u32::from(last || !actions_may_change_flow(actions));
        buf.add_action(CloneAttr::Exec, &exec.to_ne_bytes(), log)?;
        self.copy_actions(actions, *st, buf)?;
        buf.end_nested(nest)?;

        Ok(())
    }

    fn copy_check_pkt_len(
        &self,
        a: Attr<'_>,
        st: &PacketState,
        last: bool,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let attrs =
            ParsedAttrs::parse(a.data(), &CHECK_PKT_LEN_SCHEMA, false, log)?;

        if attrs.contains(CheckPktLenAttr::Unspec) {
            return Err(log.fail(FlowError::invalid(
                "check_pkt_len attribute 0",
            )));
        }

        let pkt_len = match attrs.get(CheckPktLenAttr::PktLen) {
            Some(len) => len.read_u16()?,
            None => 0,
        };
        if pkt_len == 0 {
            return Err(log.fail(FlowError::invalid(
                "check_pkt_len needs a nonzero length",
            )));
        }

        let (Some(le), Some(gt)) = (
            attrs.get(CheckPktLenAttr::ActionsIfLessEqual),
            attrs.get(CheckPktLenAttr::ActionsIfGreater),
        ) else {
            return Err(log.fail(FlowError::invalid(
                "check_pkt_len needs both action lists",
            )));
        };

        let nest = buf.begin_nested(ActionAttr::CheckPktLen, log)?;
        let arg = CheckPktLenArg {
            pkt_len: Ne16::new(pkt_len),
            exec_for_greater: u8::from(
                last || !actions_may_change_flow(gt.data()),
            ),
            exec_for_lesser_equal: u8::from(
                last || !actions_may_change_flow(le.data()),
            ),
        };
        buf.add_record(CheckPktLenAttr::Arg, &arg, log)?;

        let branch =
            buf.begin_nested(CheckPktLenAttr::ActionsIfLessEqual, log)?;
        self.copy_actions(le.data(), *st, buf)?;
        buf.end_nested(branch)?;

        let branch =
            buf.begin_nested(CheckPktLenAttr::ActionsIfGreater, log)?;
        self.copy_actions(gt.data(), *st, buf)?;
        buf.end_nested(branch)?;

        buf.end_nested(nest)?;
        Ok(())
    }

    fn copy_dec_ttl(
        &self,
        a: Attr<'_>,
        st: &PacketState,
        buf: &mut ActionBuffer,
    ) -> Result<()> {
        let log = self.log();
        let mut action = None;
        let mut iter = a.nested();

        for sub in iter.by_ref() {
            let ty = sub.ty();

            // Newer attributes are skipped so that older datapaths
            // still accept the action.
            if ty > DecTtlAttr::MAX {
                continue;
            }

            if ty == u16::from(DecTtlAttr::Unspec) || action.is_some() {
                return Err(log.fail(FlowError::invalid(format!(
                    "duplicate or invalid dec_ttl attribute {ty}"
                ))));
            }
            action = Some(sub);
        }

        if iter.remaining() != 0 {
            return Err(log.fail(FlowError::TrailingBytes {
                table: "dec_ttl".into(),
                remaining: iter.remaining(),
            }));
        }

        let actions = self.nested_actions(action, "dec_ttl")?;

        let nest = buf.begin_nested(ActionAttr::DecTtl, log)?;
        let inner = buf.begin_nested(DecTtlAttr::Action, log)?;
        self.copy_actions(actions, *st, buf)?;
        buf.end_nested(inner)?;
        buf.end_nested(nest)?;

        Ok(())
    }
}
