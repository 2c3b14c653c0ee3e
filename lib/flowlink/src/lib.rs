// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow match and action codec for a software switch datapath.
//!
//! A control plane hands the datapath flows as nested attribute
//! streams: a key, an optional mask, and an action list. This crate
//! decodes the first two into a fixed-layout [`FlowKey`]/[`FlowMask`]
//! pair, validates them against each other, compiles the action list
//! into an [`ActionBuffer`], and renders all of it back out again for
//! flow dumps.
//!
//! [`FlowKey`]: engine::key::FlowKey
//! [`FlowMask`]: engine::key::FlowMask
//! [`ActionBuffer`]: engine::action_buf::ActionBuffer

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

pub use slog;

pub mod api;
#[macro_use]
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
pub mod tree;
