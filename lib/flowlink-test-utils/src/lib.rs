// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use flowlink::api::ActionAttr;
pub use flowlink::api::ETHER_TYPE_ARP;
pub use flowlink::api::ETHER_TYPE_IPV4;
pub use flowlink::api::ETHER_TYPE_IPV6;
pub use flowlink::api::ETHER_TYPE_VLAN;
pub use flowlink::api::FlowError;
pub use flowlink::api::IP_PROTO_TCP;
pub use flowlink::api::IP_PROTO_UDP;
pub use flowlink::api::KeyAttr;
pub use flowlink::api::MAX_ACTIONS_BUFSIZE;
pub use flowlink::api::MacAddr;
pub use flowlink::api::SampleAttr;
pub use flowlink::api::TunnelAttr;
pub use flowlink::api::wire::Be16;
pub use flowlink::api::wire::KeyEthernet;
pub use flowlink::api::wire::KeyIpv4;
pub use flowlink::api::wire::KeyIpv6;
pub use flowlink::api::wire::KeyPorts;
pub use flowlink::engine::CtAvailable;
pub use flowlink::engine::DecodeCfg;
pub use flowlink::engine::Log;
pub use flowlink::engine::NoCt;
pub use flowlink::engine::action_buf::ActionBuffer;
pub use flowlink::engine::compile::compile_actions;
pub use flowlink::engine::decode::decode_exact;
pub use flowlink::engine::decode::decode_key;
pub use flowlink::engine::decode::decode_match;
pub use flowlink::engine::encode::encode_key;
pub use flowlink::engine::encode::encode_mask;
pub use flowlink::engine::key::FlowKey;
pub use flowlink::engine::key::FlowMatch;
pub use flowlink::engine::nlattr::AttrIter;
pub use flowlink::engine::nlattr::AttrWriter;
pub use flowlink::engine::serialize::serialize_actions;
pub use flowlink::tree::FlowDesc;

use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// The names of the canonical flows under `fixtures/`.
pub const FIXTURES: &[&str] =
    &["ipv4_tcp", "vlan_ipv6_udp", "geneve_arp", "mpls", "nsh"];

/// Load one of the canonical flows by name.
pub fn fixture(name: &str) -> FlowDesc {
    let text = match name {
        "ipv4_tcp" => include_str!("../fixtures/ipv4_tcp.ron"),
        "vlan_ipv6_udp" => include_str!("../fixtures/vlan_ipv6_udp.ron"),
        "geneve_arp" => include_str!("../fixtures/geneve_arp.ron"),
        "mpls" => include_str!("../fixtures/mpls.ron"),
        "nsh" => include_str!("../fixtures/nsh.ron"),
        _ => panic!("no fixture named {name}"),
    };

    ron::from_str(text)
        .unwrap_or_else(|e| panic!("fixture {name} does not parse: {e}"))
}

/// Decode a fixture's match the way a flow install would: with its
/// mask when it has one, exact otherwise.
pub fn decode_fixture(desc: &FlowDesc) -> Result<FlowMatch, FlowError> {
    let key = desc.key_stream()?;
    let mask = desc.mask_stream()?;
    decode_match(&key, mask.as_deref(), &CtAvailable, &Log::quiet())
}

/// Build an attribute stream with an [`AttrWriter`].
pub fn stream(build: impl FnOnce(&mut AttrWriter)) -> Vec<u8> {
    let mut w = AttrWriter::new();
    build(&mut w);
    w.into_bytes().unwrap_or_else(|e| panic!("stream does not encode: {e}"))
}

/// Build a key stream one layer at a time.
///
/// ```ignore
/// let key = KeyBuilder::new()
///     .in_port(1)
///     .ethernet(SRC, DST)
///     .ipv4(IP_PROTO_TCP)
///     .ports(KeyAttr::Tcp, 1234, 80)
///     .build();
/// ```
#[derive(Default)]
pub struct KeyBuilder {
    w: AttrWriter,
}

pub const SRC: MacAddr = MacAddr::from_const([0x02, 0x08, 0x20, 0, 0, 1]);
pub const DST: MacAddr = MacAddr::from_const([0x02, 0x08, 0x20, 0, 0, 2]);

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: u32) -> Self {
        self.w.put_u32(KeyAttr::InPort, port);
        self
    }

    pub fn ethernet(mut self, src: MacAddr, dst: MacAddr) -> Self {
        self.w.put_record(KeyAttr::Ethernet, &KeyEthernet::new(src, dst));
        self
    }

    pub fn ethertype(mut self, ty: u16) -> Self {
        self.w.put_be16(KeyAttr::Ethertype, ty);
        self
    }

    /// An IPv4 header carrying `proto`, with its ethertype.
    pub fn ipv4(self, proto: u8) -> Self {
        let ipv4 = KeyIpv4 {
            src: [10, 0, 0, 1],
            dst: [10, 0, 0, 2],
            proto,
            ttl: 64,
            ..Default::default()
        };
        self.ethertype(ETHER_TYPE_IPV4).record(KeyAttr::Ipv4, &ipv4)
    }

    pub fn ports(mut self, ty: KeyAttr, src: u16, dst: u16) -> Self {
        let ports = KeyPorts { src: Be16::new(src), dst: Be16::new(dst) };
        self.w.put_record(ty, &ports);
        self
    }

    /// A VLAN tag, with `inner` building the key behind it.
    pub fn vlan(
        mut self,
        tpid: u16,
        tci: u16,
        inner: impl FnOnce(KeyBuilder) -> KeyBuilder,
    ) -> Self {
        self.w.put_be16(KeyAttr::Ethertype, tpid);
        self.w.put_be16(KeyAttr::Vlan, tci);
        let encap = inner(KeyBuilder::new()).build();
        self.w.put(KeyAttr::Encap, &encap);
        self
    }

    pub fn record<T: IntoBytes + Immutable>(
        mut self,
        ty: KeyAttr,
        val: &T,
    ) -> Self {
        self.w.put_record(ty, val);
        self
    }

    pub fn raw(mut self, ty: KeyAttr, data: &[u8]) -> Self {
        self.w.put(ty, data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.w
            .into_bytes()
            .unwrap_or_else(|e| panic!("key does not encode: {e}"))
    }
}
