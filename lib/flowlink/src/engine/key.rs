// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow key, its mask, and the byte range both touch.
//!
//! A [`FlowKey`] is a plain byte layout: every field is unaligned and
//! there is no padding, so a mask is simply another `FlowKey` whose
//! bits select which key bits participate in a match. Decoders write
//! fields through [`MatchBuilder`] with the [`put!`] macro, which
//! serves both the key and the mask pass and keeps each side's
//! [`KeyRange`] current.

use crate::api::MacProto;
use crate::api::TUN_OPTS_MAX;
use crate::api::TunnelFlags;
use crate::api::TunnelOpts;
use crate::api::wire::Be16;
use crate::api::wire::Be32;
use crate::api::wire::Be64;
use crate::api::wire::ErspanMetadata;
use crate::api::wire::Ne16;
use crate::api::wire::Ne32;
use core::fmt;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// Ranges are widened to multiples of this many bytes.
pub const RANGE_GRANULE: usize = size_of::<u64>();

macro_rules! key_groups {
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

key_groups! {
    /// Outer tunnel header fields.
    pub struct TunKey {
        pub tun_id: Be64,
        pub ipv4_src: [u8; 4],
        pub ipv4_dst: [u8; 4],
        pub ipv6_src: [u8; 16],
        pub ipv6_dst: [u8; 16],
        pub tos: u8,
        pub ttl: u8,
        pub tp_src: Be16,
        pub tp_dst: Be16,
        /// [`TunnelFlags`] bits.
        pub flags: Ne16,
    }

    /// Packet metadata that does not come from the packet itself.
    pub struct PhyKey {
        pub priority: Ne32,
        pub skb_mark: Ne32,
        pub in_port: Ne16,
    }

    pub struct VlanHead {
        pub tpid: Be16,
        /// The tag control information, with the CFI bit set whenever
        /// a tag is present.
        pub tci: Be16,
    }

    pub struct EthKey {
        pub src: [u8; 6],
        pub dst: [u8; 6],
        pub vlan: VlanHead,
        pub cvlan: VlanHead,
        pub ty: Be16,
    }

    pub struct CtKey {
        pub state: u8,
        pub orig_proto: u8,
        pub zone: Ne16,
        pub mark: Ne32,
        pub labels: [u8; 16],
        pub orig_tp_src: Be16,
        pub orig_tp_dst: Be16,
    }

    pub struct IpKey {
        pub proto: u8,
        pub tos: u8,
        pub ttl: u8,
        pub frag: u8,
    }

    /// Transport ports and TCP flags. ICMP type and code are stored in
    /// the low byte of `src` and `dst`.
    pub struct TpKey {
        pub src: Be16,
        pub dst: Be16,
        pub flags: Be16,
    }

    pub struct MplsKey {
        pub lse: [Be32; 3],
        /// One bit per significant entry of `lse`, lowest first.
        pub num_labels_mask: u8,
    }

    /// IPv4 addresses, reused for ARP.
    pub struct Ipv4Key {
        pub src: [u8; 4],
        pub dst: [u8; 4],
        pub arp_sha: [u8; 6],
        pub arp_tha: [u8; 6],
        pub ct_orig_src: [u8; 4],
        pub ct_orig_dst: [u8; 4],
    }

    pub struct Ipv6Key {
        pub src: [u8; 16],
        pub dst: [u8; 16],
        pub label: Be32,
        pub nd_target: [u8; 16],
        pub nd_sll: [u8; 6],
        pub nd_tll: [u8; 6],
        pub ct_orig_src: [u8; 16],
        pub ct_orig_dst: [u8; 16],
    }

    pub struct NshKey {
        pub flags: u8,
        pub ttl: u8,
        pub mdtype: u8,
        pub np: u8,
        pub path_hdr: Be32,
        pub context: [Be32; 4],
    }

    /// The fields of a packet a flow can match on.
    ///
    /// The tunnel option slot comes first and is filled from its end,
    /// so that a key with short options has a range starting close to
    /// the fields that follow.
    pub struct FlowKey {
        pub tun_opts: [u8; TUN_OPTS_MAX],
        pub tun_opts_len: Ne16,
        pub tun_key: TunKey,
        /// Address family of the tunnel endpoints, zero for no tunnel.
        pub tun_proto: u8,
        pub phy: PhyKey,
        pub mac_proto: u8,
        pub dp_hash: Ne32,
        pub recirc_id: Ne32,
        pub eth: EthKey,
        pub ct: CtKey,
        pub ip: IpKey,
        pub tp: TpKey,
        pub mpls: MplsKey,
        pub ipv4: Ipv4Key,
        pub ipv6: Ipv6Key,
        pub nsh: NshKey,
    }
}

impl FlowKey {
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    pub fn mac_proto(&self) -> MacProto {
        MacProto::from_key(self.mac_proto)
    }

    pub fn tun_flags(&self) -> TunnelFlags {
        TunnelFlags::from_bits_retain(self.tun_key.flags.get())
    }

    /// The used part of the tunnel option slot.
    pub fn tun_opts_bytes(&self) -> &[u8] {
        let len = usize::from(self.tun_opts_len.get()).min(TUN_OPTS_MAX);
        &self.tun_opts[TUN_OPTS_MAX - len..]
    }

    /// The option slot, interpreted according to the tunnel flags.
    pub fn tun_opts(&self) -> TunnelOpts {
        let flags = self.tun_flags();
        let bytes = self.tun_opts_bytes();

        if flags.contains(TunnelFlags::GENEVE_OPT) {
            TunnelOpts::Geneve(bytes.to_vec())
        } else if flags.contains(TunnelFlags::VXLAN_OPT) {
            match <[u8; 4]>::try_from(bytes) {
                Ok(gbp) => TunnelOpts::Vxlan { gbp: u32::from_ne_bytes(gbp) },
                Err(_) => TunnelOpts::None,
            }
        } else if flags.contains(TunnelFlags::ERSPAN_OPT) {
            match ErspanMetadata::read_from_bytes(bytes) {
                Ok(md) => TunnelOpts::Erspan(md),
                Err(_) => TunnelOpts::None,
            }
        } else {
            TunnelOpts::None
        }
    }

    /// The result of applying `mask` to this key: every byte inside
    /// the mask's range ANDed with the mask, everything else zero.
    pub fn masked(&self, mask: &FlowMask) -> FlowKey {
        let mut out = FlowKey::new();
        let src = self.as_bytes();
        let m = mask.key.as_bytes();
        let dst = out.as_mut_bytes();

        for i in mask.range.start()..mask.range.end() {
            dst[i] = src[i] & m[i];
        }

        out
    }
}

impl Default for FlowKey {
    fn default() -> Self {
        Self::new()
    }
}

/// A half-open byte interval over the [`FlowKey`] layout.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct KeyRange {
    start: usize,
    end: usize,
}

impl KeyRange {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end() - self.start()
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Widen the range to cover `size` bytes at `offset`.
    ///
    /// Both ends are rounded outward to [`RANGE_GRANULE`], except that
    /// the end never runs past the layout.
    pub fn update(&mut self, offset: usize, size: usize) {
        let start = offset - offset % RANGE_GRANULE;
        let end = (offset + size)
            .next_multiple_of(RANGE_GRANULE)
            .min(size_of::<FlowKey>());

        if self.is_empty() {
            self.start = start;
            self.end = end;
        } else {
            self.start = self.start.min(start);
            self.end = self.end.max(end);
        }
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start() && offset < self.end()
    }
}

impl fmt::Debug for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A mask over a [`FlowKey`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlowMask {
    pub key: FlowKey,
    pub range: KeyRange,
}

/// A decoded match: the key, the range of the key the decode touched,
/// and the mask when one was asked for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowMatch {
    pub key: FlowKey,
    pub range: KeyRange,
    pub mask: Option<FlowMask>,
}

/// One side of a match under construction.
pub struct Side<'a> {
    pub key: &'a mut FlowKey,
    pub range: &'a mut KeyRange,
}

/// A match under construction. Both sides always exist; whether the
/// mask side is handed out at the end is the decoder's decision.
#[derive(Clone, Debug, Default)]
pub struct MatchBuilder {
    pub key: FlowKey,
    pub range: KeyRange,
    pub mask: FlowMask,
}

impl MatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The side a write with `is_mask` lands on.
    pub fn side(&mut self, is_mask: bool) -> Side<'_> {
        if is_mask {
            Side { key: &mut self.mask.key, range: &mut self.mask.range }
        } else {
            Side { key: &mut self.key, range: &mut self.range }
        }
    }

    /// The key or mask as written so far.
    pub fn get(&self, is_mask: bool) -> &FlowKey {
        if is_mask { &self.mask.key } else { &self.key }
    }

    /// Copy `bytes` into the tunnel option slot, right-aligned.
    pub fn put_tun_opts(&mut self, bytes: &[u8], is_mask: bool) {
        let off = core::mem::offset_of!(FlowKey, tun_opts) + TUN_OPTS_MAX
            - bytes.len();
        let side = self.side(is_mask);
        side.key.as_mut_bytes()[off..off + bytes.len()].copy_from_slice(bytes);
        side.range.update(off, bytes.len());
    }

    pub fn into_match(self, with_mask: bool) -> FlowMatch {
        FlowMatch {
            key: self.key,
            range: self.range,
            mask: with_mask.then_some(self.mask),
        }
    }
}

/// Write a key field on one side of a [`MatchBuilder`] and widen that
/// side's range to cover it.
///
/// ```ignore
/// put!(m, ip.proto, ipv4.proto, is_mask);
/// ```
macro_rules! put {
    ($m:expr, $($field:ident).+, $val:expr, $is_mask:expr) => {{
        let side = $m.side($is_mask);
        side.key.$($field).+ = $val;
        side.range.update(
            core::mem::offset_of!($crate::engine::key::FlowKey, $($field).+),
            core::mem::size_of_val(&side.key.$($field).+),
        );
    }};
}

/// Set every byte of a key field group on one side of a
/// [`MatchBuilder`] to `byte`.
macro_rules! fill {
    ($m:expr, $($field:ident).+, $byte:expr, $is_mask:expr) => {{
        let side = $m.side($is_mask);
        zerocopy::IntoBytes::as_mut_bytes(&mut side.key.$($field).+)
            .fill($byte);
        side.range.update(
            core::mem::offset_of!($crate::engine::key::FlowKey, $($field).+),
            core::mem::size_of_val(&side.key.$($field).+),
        );
    }};
}

#[cfg(test)]
mod test {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn layout_has_no_padding() {
        // Unaligned fields pack tightly, so the layout size is the sum
        // of its groups.
        assert_eq!(
            size_of::<TunKey>(),
            8 + 4 + 4 + 16 + 16 + 1 + 1 + 2 + 2 + 2
        );
        assert_eq!(offset_of!(FlowKey, tun_opts_len), TUN_OPTS_MAX);
        assert_eq!(align_of::<FlowKey>(), 1);
    }

    #[test]
    fn range_rounds_to_granule() {
        let mut r = KeyRange::default();
        assert!(r.is_empty());
        r.update(10, 2);
        assert_eq!((r.start(), r.end()), (8, 16));
        r.update(30, 4);
        assert_eq!((r.start(), r.end()), (8, 40));
        r.update(0, 1);
        assert_eq!((r.start(), r.end()), (0, 40));
        assert!(r.contains(39));
        assert!(!r.contains(40));
    }

    #[test]
    fn range_stops_at_layout_end() {
        let size = size_of::<FlowKey>();
        let mut r = KeyRange::default();
        r.update(size - 1, 1);
        assert_eq!(r.end(), size);
        assert_eq!(r.start(), (size - 1) - (size - 1) % RANGE_GRANULE);
    }

    #[test]
    fn masked_key_at_layout_end() {
        let mut m = MatchBuilder::new();
        let ctx = [Be32::new(0x0102_0304); 4];
        put!(m, nsh.context, ctx, false);
        put!(m, nsh.context, [Be32::new(0xffff_0000); 4], true);

        assert_eq!(m.range.end(), size_of::<FlowKey>());
        assert_eq!(m.mask.range.end(), size_of::<FlowKey>());

        let masked = m.key.masked(&m.mask);
        assert_eq!(masked.nsh.context, [Be32::new(0x0102_0000); 4]);
    }

    #[test]
    fn put_updates_side() {
        let mut m = MatchBuilder::new();
        put!(m, ip.proto, 6, false);
        put!(m, ip.proto, 0xff, true);
        put!(m, eth.ty, Be16::new(0x0800), false);

        assert_eq!(m.key.ip.proto, 6);
        assert_eq!(m.mask.key.ip.proto, 0xff);
        assert_eq!(m.key.eth.ty.get(), 0x0800);

        let proto = offset_of!(FlowKey, ip.proto);
        let ty = offset_of!(FlowKey, eth.ty);
        assert!(m.range.contains(proto));
        assert!(m.range.contains(ty));
        assert!(m.mask.range.contains(proto));
        assert_eq!(m.mask.range.len(), RANGE_GRANULE);
    }

    #[test]
    fn tun_opts_right_aligned() {
        let mut m = MatchBuilder::new();
        m.put_tun_opts(&[1, 2, 3, 4, 5, 6, 7, 8], false);
        put!(m, tun_opts_len, Ne16::new(8), false);
        let flags = Ne16::new(TunnelFlags::GENEVE_OPT.bits());
        put!(m, tun_key.flags, flags, false);

        assert_eq!(m.key.tun_opts_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(m.key.tun_opts[TUN_OPTS_MAX - 9], 0);
        assert_eq!(m.range.start(), TUN_OPTS_MAX - 8);
        assert_eq!(
            m.key.tun_opts(),
            TunnelOpts::Geneve(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
    }

    #[test]
    fn masked_key() {
        let mut m = MatchBuilder::new();
        put!(m, ipv4.src, [10, 1, 2, 3], false);
        put!(m, ipv4.src, [255, 255, 0, 0], true);
        put!(m, ip.ttl, 64, false);

        let masked = m.key.masked(&m.mask);
        assert_eq!(masked.ipv4.src, [10, 1, 0, 0]);
        assert_eq!(masked.ip.ttl, 0);
    }

    #[test]
    fn fill_group() {
        let mut m = MatchBuilder::new();
        fill!(m, tun_key, 0xff, true);
        assert_eq!(m.mask.key.tun_key.tun_id.get(), u64::MAX);
        assert_eq!(m.mask.key.tun_key.flags.get(), u16::MAX);
        assert!(m.range.is_empty());
        assert!(!m.mask.range.is_empty());
    }
}
