// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flowlink engine: attribute parsing, match decode and validation,
//! action compilation, and the inverse encoders.

#[macro_use]
pub mod key;
pub mod action_buf;
pub mod compile;
pub mod ct;
pub mod decode;
pub mod encode;
pub mod flow_id;
pub mod nlattr;
pub mod nsh;
pub mod schema;
pub mod serialize;
pub mod tunnel;
pub mod validate;
pub mod vlan;

use crate::api::FlowError;
use crate::api::KeyAttr;
use action_buf::HeapTunnels;
use action_buf::TunnelDstAllocator;
use slog::Logger;
use slog::o;

pub type Result<T> = core::result::Result<T, FlowError>;

/// Where decode and compile diagnostics go.
///
/// Every failure is returned as a [`FlowError`] regardless of this
/// setting. The log only controls whether a human-readable explanation
/// is also emitted, so that callers probing datapath features can stay
/// quiet.
#[derive(Clone)]
pub struct Log {
    logger: Logger,
    quiet: bool,
}

impl Log {
    pub fn new(logger: Logger) -> Self {
        Self { logger, quiet: false }
    }

    /// A log that emits nothing.
    pub fn quiet() -> Self {
        Self { logger: Logger::root(slog::Discard, o!()), quiet: true }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Report `err` and hand it back for returning.
    pub fn fail(&self, err: FlowError) -> FlowError {
        if !self.quiet {
            slog::info!(self.logger, "{}", err);
        }
        err
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::quiet()
    }
}

impl core::fmt::Debug for Log {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Log").field("quiet", &self.quiet).finish()
    }
}

/// Emit a decode diagnostic unless the log is quiet.
#[macro_export]
macro_rules! nlerr {
    ($log:expr, $($args:tt)+) => {
        if !$log.is_quiet() {
            $crate::slog::info!($log.logger(), $($args)+);
        }
    };
}

/// The network context a flow is installed into.
///
/// Connection tracking fields may only be matched when the context
/// has connection tracking available for them. A field the context
/// rejects is left unconsumed and the key fails decode as carrying an
/// unknown attribute.
pub trait NetContext {
    fn ct_supports(&self, attr: KeyAttr) -> bool;
}

/// A context with every connection tracking field available.
#[derive(Clone, Copy, Debug, Default)]
pub struct CtAvailable;

impl NetContext for CtAvailable {
    fn ct_supports(&self, _attr: KeyAttr) -> bool {
        true
    }
}

/// A context without connection tracking.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCt;

impl NetContext for NoCt {
    fn ct_supports(&self, _attr: KeyAttr) -> bool {
        false
    }
}

/// The collaborators a decode or compile runs against.
#[derive(Clone)]
pub struct DecodeCfg<'a> {
    pub net: &'a dyn NetContext,
    /// Source of the tunnel destinations set tunnel actions attach.
    pub tunnels: &'a dyn TunnelDstAllocator,
    pub log: Log,
}

impl<'a> DecodeCfg<'a> {
    pub fn new(
        net: &'a dyn NetContext,
        tunnels: &'a dyn TunnelDstAllocator,
        log: Log,
    ) -> Self {
        Self { net, tunnels, log }
    }
}

impl Default for DecodeCfg<'_> {
    /// Connection tracking available, heap tunnel destinations, and a
    /// quiet log.
    fn default() -> Self {
        Self { net: &CtAvailable, tunnels: &HeapTunnels, log: Log::quiet() }
    }
}

impl core::fmt::Debug for DecodeCfg<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodeCfg").field("log", &self.log).finish()
    }
}
