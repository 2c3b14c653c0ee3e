// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Attribute streams.
//!
//! An attribute is a `(len, type)` header followed by its value and
//! padding to a 4-byte boundary. The length counts the header and the
//! value but not the padding. A nested attribute's value is itself an
//! attribute stream.

use super::Log;
use super::Result;
use super::schema::Schema;
use crate::api::FlowError;
use crate::api::wire::NlAttrHdr;
use alloc::vec::Vec;
use core::fmt;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub const NLA_HDRLEN: usize = 4;
pub const NLA_ALIGNTO: usize = 4;
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// Round `len` up to the attribute alignment.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// The space an attribute with a `payload`-byte value occupies,
/// padding included.
#[inline]
pub const fn nla_total_size(payload: usize) -> usize {
    nla_align(NLA_HDRLEN + payload)
}

/// A single attribute borrowed from a stream.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Attr<'a> {
    ty: u16,
    data: &'a [u8],
}

impl<'a> Attr<'a> {
    pub fn new(ty: u16, data: &'a [u8]) -> Self {
        Self { ty, data }
    }

    /// The attribute type with the header flag bits removed.
    pub fn ty(&self) -> u16 {
        self.ty
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the stream carried as this attribute's value.
    pub fn nested(&self) -> AttrIter<'a> {
        AttrIter::new(self.data)
    }

    /// Read the value as a fixed-layout record.
    ///
    /// The length must match exactly. Decoders normally call this
    /// only after the schema has checked the length, so a failure here
    /// means the schema and the record type disagree.
    pub fn read<T>(&self) -> Result<T>
    where
        T: FromBytes + KnownLayout + Immutable,
    {
        T::read_from_bytes(self.data).map_err(|_| FlowError::MalformedAttr {
            table: "record".into(),
            ty: self.ty,
            len: self.data.len(),
            expected: size_of::<T>(),
        })
    }

    pub fn read_u8(&self) -> Result<u8> {
        self.read::<u8>()
    }

    /// Read a host byte order `u16`.
    pub fn read_u16(&self) -> Result<u16> {
        self.read::<crate::api::wire::Ne16>().map(|v| v.get())
    }

    /// Read a host byte order `u32`.
    pub fn read_u32(&self) -> Result<u32> {
        self.read::<crate::api::wire::Ne32>().map(|v| v.get())
    }

    /// Read a network byte order `u16`.
    pub fn read_be16(&self) -> Result<u16> {
        self.read::<crate::api::wire::Be16>().map(|v| v.get())
    }

    /// Read a network byte order `u32`.
    pub fn read_be32(&self) -> Result<u32> {
        self.read::<crate::api::wire::Be32>().map(|v| v.get())
    }

    /// Read a network byte order `u64`.
    pub fn read_be64(&self) -> Result<u64> {
        self.read::<crate::api::wire::Be64>().map(|v| v.get())
    }
}

impl fmt::Debug for Attr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attr {{ ty: {}, len: {} }}", self.ty, self.data.len())
    }
}

/// Iterate over the attributes of a stream.
///
/// Iteration stops at the first record whose header is short or whose
/// length runs past the end of the buffer. Whatever is left at that
/// point is available from [`AttrIter::remaining`]; a fully consumed
/// stream leaves nothing.
#[derive(Clone, Debug)]
pub struct AttrIter<'a> {
    buf: &'a [u8],
}

impl<'a> AttrIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// The number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Whether the attribute most recently returned was the last one.
    pub fn is_done(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Attr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (hdr, _) = NlAttrHdr::ref_from_prefix(self.buf).ok()?;
        let len = usize::from(hdr.len.get());

        if len < NLA_HDRLEN || len > self.buf.len() {
            return None;
        }

        let attr = Attr {
            ty: hdr.ty.get() & NLA_TYPE_MASK,
            data: &self.buf[NLA_HDRLEN..len],
        };
        let advance = nla_align(len).min(self.buf.len());
        self.buf = &self.buf[advance..];
        Some(attr)
    }
}

/// A set of attribute types present at one level of a stream.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct AttrSet(u64);

impl AttrSet {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, ty: impl Into<u16>) -> bool {
        let ty = ty.into();
        ty < 64 && self.0 & (1 << ty) != 0
    }

    pub fn insert(&mut self, ty: impl Into<u16>) {
        let ty = ty.into();
        if ty < 64 {
            self.0 |= 1 << ty;
        }
    }

    pub fn remove(&mut self, ty: impl Into<u16>) {
        let ty = ty.into();
        if ty < 64 {
            self.0 &= !(1 << ty);
        }
    }

    /// Whether every member of `other` is in `self`.
    pub const fn is_superset(&self, other: AttrSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: AttrSet) -> AttrSet {
        AttrSet(self.0 | other.0)
    }

    pub const fn difference(self, other: AttrSet) -> AttrSet {
        AttrSet(self.0 & !other.0)
    }

    /// Iterate over the type numbers in the set, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..64u16).filter(move |ty| self.0 & (1 << ty) != 0)
    }
}

impl fmt::Debug for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrSet({:#x})", self.0)
    }
}

impl<T: Into<u16>> FromIterator<T> for AttrSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = AttrSet::EMPTY;
        for ty in iter {
            set.insert(ty);
        }
        set
    }
}

/// The result of parsing one level of a stream: which types are
/// present and where each one's value lives.
#[derive(Clone)]
pub struct ParsedAttrs<'a> {
    present: AttrSet,
    attrs: [Option<&'a [u8]>; 64],
}

impl Default for ParsedAttrs<'_> {
    fn default() -> Self {
        Self { present: AttrSet::EMPTY, attrs: [None; 64] }
    }
}

impl<'a> ParsedAttrs<'a> {
    /// Parse `buf` against `schema`.
    ///
    /// With `mask_semantics`, a record whose value is all zeroes is
    /// accepted but treated as absent: a mask that cares about none of
    /// a field's bits need not be distinguished from one that omits
    /// the field.
    ///
    /// # Errors
    ///
    /// * [`FlowError::UnknownType`]: a type above the schema's max.
    /// * [`FlowError::DuplicateAttr`]: a type seen twice.
    /// * [`FlowError::MalformedAttr`]: a length the schema rejects.
    /// * [`FlowError::TrailingBytes`]: the stream ends mid-record.
    pub fn parse(
        buf: &'a [u8],
        schema: &Schema,
        mask_semantics: bool,
        log: &Log,
    ) -> Result<Self> {
        let mut parsed = Self::default();
        parsed.parse_into(buf, schema, mask_semantics, log)?;
        Ok(parsed)
    }

    /// Parse `buf` on top of what has already been parsed, as if both
    /// streams were one.
    pub fn parse_into(
        &mut self,
        buf: &'a [u8],
        schema: &Schema,
        mask_semantics: bool,
        log: &Log,
    ) -> Result<()> {
        let mut iter = AttrIter::new(buf);

        for attr in iter.by_ref() {
            let ty = attr.ty();

            if ty > schema.max() {
                return Err(log.fail(FlowError::UnknownType {
                    table: schema.name().into(),
                    ty,
                    max: schema.max(),
                }));
            }

            if self.present.contains(ty) {
                return Err(log.fail(FlowError::DuplicateAttr {
                    table: schema.name().into(),
                    ty,
                }));
            }

            let entry = schema.entry(ty);
            if !entry.accepts(attr.len()) {
                return Err(log.fail(FlowError::MalformedAttr {
                    table: schema.name().into(),
                    ty,
                    len: attr.len(),
                    expected: entry.fixed_len().unwrap_or(0),
                }));
            }

            if !mask_semantics || !is_all_zero(attr.data()) {
                self.present.insert(ty);
                self.attrs[usize::from(ty)] = Some(attr.data());
            }
        }

        if iter.remaining() != 0 {
            return Err(log.fail(FlowError::TrailingBytes {
                table: schema.name().into(),
                remaining: iter.remaining(),
            }));
        }

        Ok(())
    }

    pub fn present(&self) -> AttrSet {
        self.present
    }

    pub fn contains(&self, ty: impl Into<u16>) -> bool {
        self.present.contains(ty)
    }

    /// The attribute of type `ty`, if present.
    pub fn get(&self, ty: impl Into<u16>) -> Option<Attr<'a>> {
        let ty = ty.into();
        if !self.present.contains(ty) {
            return None;
        }
        self.attrs[usize::from(ty)].map(|data| Attr::new(ty, data))
    }

    /// Forget about `ty`, as the VLAN decoder does once it has
    /// consumed a tag level.
    pub fn clear(&mut self, ty: impl Into<u16>) {
        let ty = ty.into();
        self.present.remove(ty);
        if let Some(slot) = self.attrs.get_mut(usize::from(ty)) {
            *slot = None;
        }
    }
}

impl fmt::Debug for ParsedAttrs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedAttrs").field("present", &self.present).finish()
    }
}

pub fn is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|b| *b == 0)
}

/// A growable attribute stream for encoding.
///
/// Nested attributes are written between [`AttrWriter::begin_nested`]
/// and [`AttrWriter::end_nested`]; the handle returned by the former
/// is an offset, so it stays valid as the buffer grows.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttrWriter {
    buf: Vec<u8>,
    /// Type and length of the first record too long for its header.
    overflow: Option<(u16, usize)>,
}

/// An open nested attribute in an [`AttrWriter`].
#[derive(Debug)]
#[must_use = "a nested attribute must be closed with end_nested"]
pub struct NestHandle {
    start: usize,
    ty: u16,
}

impl AttrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The finished stream.
    ///
    /// A record whose length does not fit its 16-bit header is never
    /// written; it fails the whole stream here instead.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self.overflow {
            Some((ty, len)) => Err(FlowError::AttrTooLong { ty, len }),
            None => Ok(self.buf),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append an attribute with the given value.
    pub fn put(&mut self, ty: impl Into<u16>, data: &[u8]) {
        let ty = ty.into();
        let Some(len) = self.record_len(ty, NLA_HDRLEN + data.len()) else {
            return;
        };
        self.push_hdr(ty, len);
        self.buf.extend_from_slice(data);
        self.pad();
    }

    /// Append an attribute whose value is a fixed-layout record.
    pub fn put_record<T: IntoBytes + Immutable>(
        &mut self,
        ty: impl Into<u16>,
        val: &T,
    ) {
        self.put(ty, val.as_bytes());
    }

    /// Append a valueless flag attribute.
    pub fn put_flag(&mut self, ty: impl Into<u16>) {
        self.put(ty, &[]);
    }

    pub fn put_u8(&mut self, ty: impl Into<u16>, val: u8) {
        self.put(ty, &[val]);
    }

    pub fn put_u16(&mut self, ty: impl Into<u16>, val: u16) {
        self.put(ty, &val.to_ne_bytes());
    }

    pub fn put_u32(&mut self, ty: impl Into<u16>, val: u32) {
        self.put(ty, &val.to_ne_bytes());
    }

    pub fn put_be16(&mut self, ty: impl Into<u16>, val: u16) {
        self.put(ty, &val.to_be_bytes());
    }

    pub fn put_be32(&mut self, ty: impl Into<u16>, val: u32) {
        self.put(ty, &val.to_be_bytes());
    }

    pub fn put_be64(&mut self, ty: impl Into<u16>, val: u64) {
        self.put(ty, &val.to_be_bytes());
    }

    /// Append an already encoded attribute stream as-is.
    pub fn put_raw(&mut self, stream: &[u8]) {
        self.buf.extend_from_slice(stream);
    }

    pub fn begin_nested(&mut self, ty: impl Into<u16>) -> NestHandle {
        let handle = NestHandle { start: self.buf.len(), ty: ty.into() };
        self.push_hdr(handle.ty, 0);
        handle
    }

    /// Close a nested attribute. One that has outgrown its header is
    /// dropped along with its contents.
    pub fn end_nested(&mut self, handle: NestHandle) {
        let len = self.buf.len() - handle.start;
        match self.record_len(handle.ty, len) {
            Some(len) => write_len(&mut self.buf[handle.start..], len),
            None => self.buf.truncate(handle.start),
        }
    }

    /// Drop a nested attribute and everything written into it.
    pub fn cancel_nested(&mut self, handle: NestHandle) {
        self.buf.truncate(handle.start);
    }

    fn record_len(&mut self, ty: u16, len: usize) -> Option<u16> {
        let res = u16::try_from(len).ok();
        if res.is_none() {
            self.overflow.get_or_insert((ty, len));
        }
        res
    }

    fn push_hdr(&mut self, ty: u16, len: u16) {
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&ty.to_ne_bytes());
    }

    fn pad(&mut self) {
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}

/// Write an attribute length into the header at the start of `hdr`.
pub(crate) fn write_len(hdr: &mut [u8], len: u16) {
    hdr[..2].copy_from_slice(&len.to_ne_bytes());
}
