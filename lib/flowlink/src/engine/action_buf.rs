// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The compiled action program.
//!
//! An [`ActionBuffer`] holds a stream of action records in the same
//! attribute encoding they arrive in, plus a side table of the tunnel
//! destinations referenced by set tunnel actions. The buffer grows by
//! doubling up to [`MAX_ACTIONS_BUFSIZE`].

use super::Log;
use super::Result;
use super::nlattr::Attr;
use super::nlattr::AttrIter;
use super::nlattr::NLA_HDRLEN;
use super::nlattr::nla_align;
use super::nlattr::write_len;
use super::tunnel::TunnelInfo;
use crate::api::FlowError;
use crate::api::KeyAttr;
use crate::api::MAX_ACTIONS_BUFSIZE;
use crate::api::wire::NlAttrHdr;
use crate::api::wire::Ne16;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// A tunnel destination attached to a set tunnel action.
///
/// Destinations are shared between the action buffer that created
/// them and whatever flow table the program is installed into. The
/// release hook, if any, runs when the last reference goes away.
pub struct TunnelDst {
    info: TunnelInfo,
    release: Option<Box<dyn FnOnce(&TunnelInfo) + Send + Sync>>,
}

impl TunnelDst {
    pub fn new(info: TunnelInfo) -> Self {
        Self { info, release: None }
    }

    /// A destination that calls `release` when dropped.
    pub fn with_release<F>(info: TunnelInfo, release: F) -> Self
    where
        F: FnOnce(&TunnelInfo) + Send + Sync + 'static,
    {
        Self { info, release: Some(Box::new(release)) }
    }

    pub fn info(&self) -> &TunnelInfo {
        &self.info
    }
}

impl Drop for TunnelDst {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&self.info);
        }
    }
}

impl fmt::Debug for TunnelDst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDst").field("info", &self.info).finish()
    }
}

/// Allocates the datapath state behind a tunnel destination.
pub trait TunnelDstAllocator {
    /// Allocate a destination for `info`.
    ///
    /// # Errors
    ///
    /// [`FlowError::AllocationFailure`] when the datapath is out of
    /// room for another destination.
    fn alloc(&self, info: TunnelInfo) -> Result<Arc<TunnelDst>>;
}

/// An allocator whose destinations live on the heap and need no
/// release.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapTunnels;

impl TunnelDstAllocator for HeapTunnels {
    fn alloc(&self, info: TunnelInfo) -> Result<Arc<TunnelDst>> {
        Ok(Arc::new(TunnelDst::new(info)))
    }
}

/// An open nested record in an [`ActionBuffer`]: the offset of its
/// header.
#[derive(Debug)]
#[must_use = "a nested action must be closed with end_nested"]
pub struct ActionNest(usize);

/// A compiled action program.
pub struct ActionBuffer {
    buf: Vec<u8>,
    /// The space the buffer may use before it has to grow again.
    size: usize,
    /// The length of the action stream this program was compiled from.
    orig_len: usize,
    grows: usize,
    tunnels: Vec<Arc<TunnelDst>>,
}

impl ActionBuffer {
    /// Create an empty buffer with room for `size` bytes, clamped to
    /// [`MAX_ACTIONS_BUFSIZE`].
    ///
    /// # Errors
    ///
    /// [`FlowError::AllocationFailure`].
    pub fn new(size: usize) -> Result<Self> {
        let size = size.min(MAX_ACTIONS_BUFSIZE);
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| FlowError::AllocationFailure(size))?;

        Ok(Self { buf, size, orig_len: 0, grows: 0, tunnels: Vec::new() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The compiled records.
    pub fn iter(&self) -> AttrIter<'_> {
        AttrIter::new(&self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The space currently available without growing.
    pub fn size(&self) -> usize {
        self.size
    }

    /// How many times the buffer has grown.
    pub fn grow_count(&self) -> usize {
        self.grows
    }

    pub fn orig_len(&self) -> usize {
        self.orig_len
    }

    pub(crate) fn set_orig_len(&mut self, len: usize) {
        self.orig_len = len;
    }

    /// The tunnel destination a compiled tunnel info record refers to.
    pub fn tunnel(&self, idx: u32) -> Option<&Arc<TunnelDst>> {
        self.tunnels.get(usize::try_from(idx).ok()?)
    }

    pub fn tunnels(&self) -> &[Arc<TunnelDst>] {
        &self.tunnels
    }

    /// Make room for a record of `attr_len` bytes, header included,
    /// and return the offset it starts at. The new space is zeroed.
    ///
    /// # Errors
    ///
    /// * [`FlowError::BufferCapacityExceeded`]: the record does not fit
    ///   even with the buffer at its cap.
    /// * [`FlowError::AllocationFailure`].
    pub fn reserve(&mut self, attr_len: usize, log: &Log) -> Result<usize> {
        let req = nla_align(attr_len);
        let next = self.buf.len();

        if next + req > self.size {
            let mut new = (next + req).max(self.size * 2);

            if new > MAX_ACTIONS_BUFSIZE {
                if MAX_ACTIONS_BUFSIZE - next < req {
                    return Err(log.fail(FlowError::BufferCapacityExceeded {
                        requested: next + req,
                        max: MAX_ACTIONS_BUFSIZE,
                    }));
                }
                new = MAX_ACTIONS_BUFSIZE;
            }

            self.buf
                .try_reserve_exact(new - next)
                .map_err(|_| log.fail(FlowError::AllocationFailure(new)))?;
            self.size = new;
            self.grows += 1;
        }

        self.buf.resize(next + req, 0);
        Ok(next)
    }

    /// Append a record of type `ty` holding `data`.
    pub fn add_action(
        &mut self,
        ty: impl Into<u16>,
        data: &[u8],
        log: &Log,
    ) -> Result<()> {
        let start = self.add_hdr(ty.into(), data.len(), log)? + NLA_HDRLEN;
        self.buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Append a record whose value is a fixed-layout struct.
    pub fn add_record<T: IntoBytes + Immutable>(
        &mut self,
        ty: impl Into<u16>,
        val: &T,
        log: &Log,
    ) -> Result<()> {
        self.add_action(ty, val.as_bytes(), log)
    }

    /// Append an attribute as it came off the wire.
    pub fn copy_action(&mut self, attr: Attr<'_>, log: &Log) -> Result<()> {
        self.add_action(attr.ty(), attr.data(), log)
    }

    /// Append an already encoded, aligned attribute stream.
    pub fn add_raw(&mut self, stream: &[u8], log: &Log) -> Result<()> {
        let off = self.reserve(stream.len(), log)?;
        self.buf[off..off + stream.len()].copy_from_slice(stream);
        Ok(())
    }

    /// Open a nested record. Its length is filled in by
    /// [`ActionBuffer::end_nested`].
    pub fn begin_nested(
        &mut self,
        ty: impl Into<u16>,
        log: &Log,
    ) -> Result<ActionNest> {
        self.add_hdr(ty.into(), 0, log).map(ActionNest)
    }

    pub fn end_nested(&mut self, nest: ActionNest) -> Result<()> {
        let len = self.buf.len() - nest.0;
        let hdr_len = u16::try_from(len).map_err(|_| {
            FlowError::BufferCapacityExceeded {
                requested: len,
                max: usize::from(u16::MAX),
            }
        })?;
        write_len(&mut self.buf[nest.0..], hdr_len);
        Ok(())
    }

    /// Record `dst` in the tunnel table and append a tunnel info record
    /// naming it.
    pub fn add_tunnel(&mut self, dst: Arc<TunnelDst>, log: &Log) -> Result<()> {
        let idx = u32::try_from(self.tunnels.len())
            .map_err(|_| log.fail(FlowError::AllocationFailure(0)))?;
        self.add_action(KeyAttr::TunnelInfo, &idx.to_ne_bytes(), log)?;
        self.tunnels.push(dst);
        Ok(())
    }

    fn add_hdr(
        &mut self,
        ty: u16,
        data_len: usize,
        log: &Log,
    ) -> Result<usize> {
        let len = NLA_HDRLEN + data_len;
        let hdr_len = u16::try_from(len).map_err(|_| {
            log.fail(FlowError::BufferCapacityExceeded {
                requested: len,
                max: usize::from(u16::MAX),
            })
        })?;

        let off = self.reserve(len, log)?;
        let hdr = NlAttrHdr { len: Ne16::new(hdr_len), ty: Ne16::new(ty) };
        self.buf[off..off + NLA_HDRLEN].copy_from_slice(hdr.as_bytes());
        Ok(off)
    }
}

impl fmt::Debug for ActionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBuffer")
            .field("len", &self.buf.len())
            .field("size", &self.size)
            .field("tunnels", &self.tunnels.len())
            .finish()
    }
}
