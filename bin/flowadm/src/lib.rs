// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! flowlink administration library

use anyhow::Context;
use flowlink::api::FlowError;
use flowlink::engine::CtAvailable;
use flowlink::engine::DecodeCfg;
use flowlink::engine::Log;
use flowlink::engine::NetContext;
use flowlink::engine::NoCt;
use flowlink::engine::action_buf::ActionBuffer;
use flowlink::engine::action_buf::HeapTunnels;
use flowlink::engine::compile::compile_actions;
use flowlink::engine::decode::decode_match;
use flowlink::engine::key::FlowMatch;
use flowlink::engine::serialize::serialize_actions;
use flowlink::tree::FlowDesc;
use slog::Drain;
use slog::Logger;
use slog::o;
use std::fs;
use std::path::Path;

/// Build the logger decode and compile diagnostics are sent to.
///
/// Output goes to the terminal and is filtered by `RUST_LOG`, with
/// diagnostics shown by default.
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::LogBuilder::new(drain)
        .filter(None, slog::FilterLevel::Info)
        .parse(&std::env::var("RUST_LOG").unwrap_or_default())
        .build()
        .ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "flowadm"))
}

/// Read a [`FlowDesc`] written in RON.
pub fn load_flow(path: &Path) -> anyhow::Result<FlowDesc> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_flow(&text)
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn parse_flow(text: &str) -> anyhow::Result<FlowDesc> {
    Ok(ron::from_str(text)?)
}

/// A flow run through the codec.
#[derive(Debug)]
pub struct Processed {
    pub desc: FlowDesc,
    pub matched: FlowMatch,
    pub actions: ActionBuffer,
    /// The action list as a dump would report it.
    pub serialized: Vec<u8>,
}

impl Processed {
    /// Whether the dumped action list is the one that was installed.
    pub fn roundtrips(&self) -> bool {
        self.desc.action_stream().is_ok_and(|a| a == self.serialized)
    }
}

/// The handle used to run flows through the codec.
pub struct FlowAdm {
    net: &'static dyn NetContext,
    log: Log,
}

impl FlowAdm {
    /// Create a handle reporting diagnostics to `log`. When `ct` is
    /// false flows are decoded as if connection tracking were missing
    /// from the datapath.
    pub fn new(ct: bool, log: Log) -> Self {
        let net: &'static dyn NetContext =
            if ct { &CtAvailable } else { &NoCt };
        Self { net, log }
    }

    pub fn decode(&self, desc: &FlowDesc) -> Result<FlowMatch, FlowError> {
        let key = desc.key_stream()?;
        let mask = desc.mask_stream()?;
        decode_match(&key, mask.as_deref(), self.net, &self.log)
    }

    /// Decode the match, then compile and re-serialize the actions
    /// against it.
    pub fn process(&self, desc: FlowDesc) -> anyhow::Result<Processed> {
        let matched = self.decode(&desc).context("match decode failed")?;
        let cfg = DecodeCfg::new(self.net, &HeapTunnels, self.log.clone());
        let actions = desc.action_stream()?;
        let actions = compile_actions(&actions, &matched.key, &cfg)
            .context("action compile failed")?;
        let serialized =
            serialize_actions(&actions).context("action dump failed")?;
        Ok(Processed { desc, matched, actions, serialized })
    }
}
