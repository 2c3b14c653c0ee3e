// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The attribute type catalog.
//!
//! Type numbers follow the Open vSwitch datapath numbering so that a
//! buffer produced by an existing controller can be fed straight in.

attr_types! {
    /// Flow key attributes.
    pub enum KeyAttr max Nsh {
        Unspec = 0,
        /// Nested stream holding the attributes behind a VLAN tag.
        Encap = 1,
        Priority = 2,
        InPort = 3,
        Ethernet = 4,
        Vlan = 5,
        Ethertype = 6,
        Ipv4 = 7,
        Ipv6 = 8,
        Tcp = 9,
        Udp = 10,
        Icmp = 11,
        Icmpv6 = 12,
        Arp = 13,
        Nd = 14,
        SkbMark = 15,
        Tunnel = 16,
        Sctp = 17,
        TcpFlags = 18,
        DpHash = 19,
        RecircId = 20,
        Mpls = 21,
        CtState = 22,
        CtZone = 23,
        CtMark = 24,
        CtLabels = 25,
        CtOrigTupleIpv4 = 26,
        CtOrigTupleIpv6 = 27,
        Nsh = 28,
        /// Compiled form of a tunnel set action. Never accepted from
        /// the wire.
        TunnelInfo = 29,
    }
}

attr_types! {
    /// Attributes nested inside [`KeyAttr::Tunnel`].
    pub enum TunnelAttr max Ipv4InfoBridge {
        Id = 0,
        Ipv4Src = 1,
        Ipv4Dst = 2,
        Tos = 3,
        Ttl = 4,
        DontFragment = 5,
        Csum = 6,
        Oam = 7,
        GeneveOpts = 8,
        TpSrc = 9,
        TpDst = 10,
        VxlanOpts = 11,
        Ipv6Src = 12,
        Ipv6Dst = 13,
        Pad = 14,
        ErspanOpts = 15,
        Ipv4InfoBridge = 16,
    }
}

attr_types! {
    /// Attributes nested inside [`TunnelAttr::VxlanOpts`].
    pub enum VxlanExtAttr max Gbp {
        Unspec = 0,
        Gbp = 1,
    }
}

attr_types! {
    /// Attributes nested inside [`KeyAttr::Nsh`] and the push NSH
    /// action.
    pub enum NshAttr max Md2 {
        Unspec = 0,
        Base = 1,
        Md1 = 2,
        Md2 = 3,
    }
}

attr_types! {
    /// Action attributes.
    pub enum ActionAttr max DecTtl {
        Unspec = 0,
        Output = 1,
        Userspace = 2,
        Set = 3,
        PushVlan = 4,
        PopVlan = 5,
        Sample = 6,
        Recirc = 7,
        Hash = 8,
        PushMpls = 9,
        PopMpls = 10,
        SetMasked = 11,
        Ct = 12,
        Trunc = 13,
        PushEth = 14,
        PopEth = 15,
        CtClear = 16,
        PushNsh = 17,
        PopNsh = 18,
        Meter = 19,
        Clone = 20,
        CheckPktLen = 21,
        AddMpls = 22,
        DecTtl = 23,
        /// A set action rewritten into value plus all-ones mask form.
        /// Never accepted from the wire.
        SetToMasked = 25,
    }
}

attr_types! {
    /// Attributes nested inside [`ActionAttr::Sample`].
    pub enum SampleAttr max Actions {
        Unspec = 0,
        Probability = 1,
        Actions = 2,
        /// Compiled argument record. Never accepted from the wire.
        Arg = 3,
    }
}

attr_types! {
    /// Attributes nested inside a compiled [`ActionAttr::Clone`].
    pub enum CloneAttr max Exec {
        Unspec = 0,
        Exec = 1,
    }
}

attr_types! {
    /// Attributes nested inside [`ActionAttr::CheckPktLen`].
    pub enum CheckPktLenAttr max ActionsIfLessEqual {
        Unspec = 0,
        PktLen = 1,
        ActionsIfGreater = 2,
        ActionsIfLessEqual = 3,
        /// Compiled argument record. Never accepted from the wire.
        Arg = 4,
    }
}

attr_types! {
    /// Attributes nested inside [`ActionAttr::DecTtl`].
    pub enum DecTtlAttr max Action {
        Unspec = 0,
        Action = 1,
    }
}

attr_types! {
    /// Attributes nested inside [`ActionAttr::Userspace`].
    pub enum UserspaceAttr max Actions {
        Unspec = 0,
        Pid = 1,
        Userdata = 2,
        EgressTunPort = 3,
        Actions = 4,
    }
}

attr_types! {
    /// Attributes nested inside [`ActionAttr::Ct`].
    pub enum CtAttr max Timeout {
        Unspec = 0,
        Commit = 1,
        Zone = 2,
        Mark = 3,
        Labels = 4,
        Helper = 5,
        Nat = 6,
        ForceCommit = 7,
        Eventmask = 8,
        Timeout = 9,
    }
}

attr_types! {
    /// Attributes nested inside [`CtAttr::Nat`].
    pub enum NatAttr max ProtoRandom {
        Unspec = 0,
        Src = 1,
        Dst = 2,
        IpMin = 3,
        IpMax = 4,
        ProtoMin = 5,
        ProtoMax = 6,
        Persistent = 7,
        ProtoHash = 8,
        ProtoRandom = 9,
    }
}

attr_types! {
    /// Top-level flow request attributes. Only the members that carry
    /// a flow identifier or a match are interpreted by this crate.
    pub enum FlowAttr max UfidFlags {
        Unspec = 0,
        Key = 1,
        Actions = 2,
        Stats = 3,
        TcpFlags = 4,
        Used = 5,
        Clear = 6,
        Mask = 7,
        Probe = 8,
        Ufid = 9,
        UfidFlags = 10,
    }
}

bitflags::bitflags! {
    /// Flags carried in [`FlowAttr::UfidFlags`] that let a caller
    /// skip parts of a flow dump.
    #[derive(
        Clone, Copy, Debug, Default, Eq, PartialEq,
        serde::Deserialize, serde::Serialize,
    )]
    pub struct UfidFlags: u32 {
        const OMIT_KEY = 1 << 0;
        const OMIT_MASK = 1 << 1;
        const OMIT_ACTIONS = 1 << 2;
    }
}
