// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests.
//!
//! These run the canonical flows under `flowlink-test-utils/fixtures`
//! through the whole codec: decode the match, compile the actions
//! against the decoded key, and render everything back out.

use flowlink::api::FragType;
use flowlink::api::wire::KeyIpv4;
use flowlink::print::print_actions_into;
use flowlink::print::print_match_into;
use flowlink_test_utils::*;
use zerocopy::IntoBytes;

#[test]
fn fixtures_decode() {
    for name in FIXTURES {
        let desc = fixture(name);
        let m = decode_fixture(&desc)
            .unwrap_or_else(|e| panic!("{name}: decode failed: {e}"));
        assert!(m.mask.is_some(), "{name}: no mask");
    }
}

#[test]
fn key_roundtrip() {
    for name in FIXTURES {
        let m = decode_fixture(&fixture(name)).unwrap();
        let key = encode_key(&m.key).unwrap();
        let again = decode_key(&key, &CtAvailable, &Log::quiet())
            .unwrap_or_else(|e| panic!("{name}: re-decode failed: {e}"));
        assert_eq!(again.key, m.key, "{name}");
    }
}

#[test]
fn mask_within_range() {
    for name in FIXTURES {
        let m = decode_fixture(&fixture(name)).unwrap();
        let mask = m.mask.as_ref().unwrap();
        let size = size_of::<FlowKey>();
        assert!(m.range.end() <= size, "{name}: key {:?}", m.range);
        assert!(mask.range.end() <= size, "{name}: mask {:?}", mask.range);

        for (off, byte) in mask.key.as_bytes().iter().enumerate() {
            if *byte != 0 {
                assert!(
                    mask.range.contains(off),
                    "{name}: mask byte {off} outside {:?}",
                    mask.range
                );
            }
        }

        let masked = m.key.masked(mask);
        for (off, byte) in masked.as_bytes().iter().enumerate() {
            if !mask.range.contains(off) {
                assert_eq!(*byte, 0, "{name}: masked byte {off}");
            }
        }
    }
}

#[test]
fn duplicates_rejected() {
    for name in FIXTURES {
        let desc = fixture(name);
        let mut key = desc.key.clone();
        key.push(key[0].clone());
        let stream = flowlink::tree::to_stream(&key).unwrap();

        let res = decode_exact(&stream, &CtAvailable, &Log::quiet());
        assert!(
            matches!(res, Err(FlowError::DuplicateAttr { .. })),
            "{name}: {res:?}"
        );
    }
}

#[test]
fn three_tags_rejected() {
    let key = KeyBuilder::new()
        .ethernet(SRC, DST)
        .vlan(0x88a8, 0x1000 | 10, |b| {
            b.vlan(ETHER_TYPE_VLAN, 0x1000 | 20, |b| {
                b.vlan(ETHER_TYPE_VLAN, 0x1000 | 30, |b| b.ipv4(0))
            })
        })
        .build();

    assert!(matches!(
        decode_exact(&key, &CtAvailable, &Log::quiet()),
        Err(FlowError::Invalid(_))
    ));

    let key = KeyBuilder::new()
        .ethernet(SRC, DST)
        .vlan(0x88a8, 0x1000 | 10, |b| {
            b.vlan(ETHER_TYPE_VLAN, 0x1000 | 20, |b| b.ipv4(0))
        })
        .build();
    let m = decode_exact(&key, &CtAvailable, &Log::quiet()).unwrap();
    assert_eq!(m.key.eth.vlan.tci.get(), 0x1000 | 10);
    assert_eq!(m.key.eth.cvlan.tci.get(), 0x1000 | 20);
    assert_eq!(m.key.eth.ty.get(), ETHER_TYPE_IPV4);
}

#[test]
fn ipv4_tcp_requirements() {
    let key = KeyBuilder::new()
        .in_port(1)
        .ethernet(SRC, DST)
        .ipv4(IP_PROTO_TCP)
        .ports(KeyAttr::Tcp, 40000, 22)
        .build();
    let m = decode_exact(&key, &CtAvailable, &Log::quiet()).unwrap();
    assert_eq!(m.key.tp.dst.get(), 22);

    // The transport header is required for whole packets.
    let key = KeyBuilder::new()
        .ethernet(SRC, DST)
        .ipv4(IP_PROTO_TCP)
        .build();
    assert!(matches!(
        decode_exact(&key, &CtAvailable, &Log::quiet()),
        Err(FlowError::MissingRequiredField { .. })
    ));

    // But not for later fragments, which have none.
    let later = KeyIpv4 {
        src: [10, 0, 0, 1],
        dst: [10, 0, 0, 2],
        proto: IP_PROTO_TCP,
        ttl: 64,
        frag: FragType::Later as u8,
        ..Default::default()
    };
    let key = KeyBuilder::new()
        .ethernet(SRC, DST)
        .ethertype(ETHER_TYPE_IPV4)
        .record(KeyAttr::Ipv4, &later)
        .build();
    let m = decode_exact(&key, &CtAvailable, &Log::quiet()).unwrap();
    assert_eq!(m.key.ip.frag, FragType::Later as u8);
}

#[test]
fn actions_roundtrip() {
    for name in FIXTURES {
        let desc = fixture(name);
        let m = decode_fixture(&desc).unwrap();
        let actions = desc.action_stream().unwrap();

        let buf = compile_actions(&actions, &m.key, &DecodeCfg::default())
            .unwrap_or_else(|e| panic!("{name}: compile failed: {e}"));
        let out = serialize_actions(&buf).unwrap();

        // Tunnel sets are rebuilt from the tunnel destination, which
        // spells out fields the request left at their defaults.
        if *name == "geneve_arp" {
            assert_eq!(buf.tunnels().len(), 1);
            continue;
        }
        assert_eq!(out, actions, "{name}");
    }
}

#[test]
fn set_becomes_masked_set() {
    let desc = fixture("ipv4_tcp");
    let m = decode_fixture(&desc).unwrap();
    let actions = desc.action_stream().unwrap();
    let buf =
        compile_actions(&actions, &m.key, &DecodeCfg::default()).unwrap();

    let recs: Vec<_> = buf.iter().collect();
    assert_eq!(recs[0].ty(), ActionAttr::SetToMasked as u16);
    let inner = recs[0].nested().next().unwrap();
    assert_eq!(inner.ty(), KeyAttr::Priority as u16);
    assert_eq!(inner.data(), [7u32.to_ne_bytes(), [0xff; 4]].concat());
    assert_eq!(recs[1].ty(), ActionAttr::Output as u16);
}

#[test]
fn sample_before_output_runs_eagerly() {
    let desc = fixture("nsh");
    let m = decode_fixture(&desc).unwrap();
    let actions = desc.action_stream().unwrap();
    let buf =
        compile_actions(&actions, &m.key, &DecodeCfg::default()).unwrap();

    let sample = buf
        .iter()
        .find(|a| a.ty() == ActionAttr::Sample as u16)
        .unwrap();
    let arg = sample.nested().next().unwrap();
    assert_eq!(arg.ty(), SampleAttr::Arg as u16);
    // exec is the first byte of the argument record.
    assert_eq!(arg.data()[0], 1);
}

#[test]
fn buffer_growth_is_logarithmic() {
    let log = Log::quiet();
    let mut buf = ActionBuffer::new(8).unwrap();
    let mut records = 0;

    loop {
        match buf.add_action(ActionAttr::Output, &1u32.to_ne_bytes(), &log) {
            Ok(_) => records += 1,
            Err(FlowError::BufferCapacityExceeded { max, .. }) => {
                assert_eq!(max, MAX_ACTIONS_BUFSIZE);
                break;
            }
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    assert_eq!(records, MAX_ACTIONS_BUFSIZE / 8);
    assert!(buf.grow_count() <= 13, "{} grows", buf.grow_count());
    assert_eq!(buf.size(), MAX_ACTIONS_BUFSIZE);
}

#[test]
fn oversized_actions_rejected() {
    let desc = fixture("ipv4_tcp");
    let m = decode_fixture(&desc).unwrap();
    let actions = stream(|w| {
        for port in 0..(MAX_ACTIONS_BUFSIZE / 8 + 1) {
            w.put_u32(ActionAttr::Output, port as u32);
        }
    });

    assert!(matches!(
        compile_actions(&actions, &m.key, &DecodeCfg::default()),
        Err(FlowError::BufferCapacityExceeded { .. })
    ));
}

#[test]
fn printing() {
    let desc = fixture("vlan_ipv6_udp");
    let m = decode_fixture(&desc).unwrap();

    let mut out = Vec::new();
    print_match_into(&mut out, &m).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Ipv6"));
    assert!(text.contains("Udp"));

    let mut out = Vec::new();
    print_actions_into(&mut out, &desc.action_stream().unwrap()).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("PopVlan"));
    assert!(text.contains("Output"));
}
