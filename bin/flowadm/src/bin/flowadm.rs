// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use clap::Parser;

use flowadm::FlowAdm;
use flowadm::load_flow;
use flowadm::term_logger;
use flowlink::engine::Log;
use flowlink::engine::encode::encode_key;
use flowlink::engine::encode::encode_mask;
use flowlink::print::print_actions;
use flowlink::print::print_match;
use flowlink::print::write_hr;

/// Decode, compile, and dump flows described in RON.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Decode a flow's key and mask and print the resulting match.
    DecodeMatch {
        #[command(flatten)]
        opts: FlowOpts,
    },

    /// Compile a flow's actions against its match and print the
    /// compiled program.
    CompileActions {
        #[command(flatten)]
        opts: FlowOpts,
    },

    /// Run a flow through the codec and print it the way a flow dump
    /// would, noting where the dump differs from the input.
    Roundtrip {
        #[command(flatten)]
        opts: FlowOpts,

        /// Exit with an error if the dumped flow differs.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Debug, Args)]
struct FlowOpts {
    /// The RON file describing the flow.
    file: PathBuf,

    /// Decode as if the datapath lacked connection tracking.
    #[arg(long)]
    no_ct: bool,

    /// Don't report why a flow was rejected.
    #[arg(short, long)]
    quiet: bool,
}

impl FlowOpts {
    fn adm(&self) -> FlowAdm {
        let log =
            if self.quiet { Log::quiet() } else { Log::new(term_logger()) };
        FlowAdm::new(!self.no_ct, log)
    }
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    match cmd {
        Command::DecodeMatch { opts } => {
            let desc = load_flow(&opts.file)?;
            let m = opts.adm().decode(&desc)?;
            print_match(&m)?;
        }

        Command::CompileActions { opts } => {
            let desc = load_flow(&opts.file)?;
            let p = opts.adm().process(desc)?;
            print_actions(p.actions.as_bytes())?;
            let tunnels = p.actions.tunnels();
            if !tunnels.is_empty() {
                println!();
                for (idx, dst) in tunnels.iter().enumerate() {
                    println!("tunnel {idx}: {dst:?}");
                }
            }
        }

        Command::Roundtrip { opts, strict } => {
            let desc = load_flow(&opts.file)?;
            let p = opts.adm().process(desc)?;

            let key = encode_key(&p.matched.key)?;
            let same_key = key == p.desc.key_stream()?;
            let same_mask = match (&p.matched.mask, p.desc.mask_stream()?) {
                (Some(mask), Some(orig)) => {
                    encode_mask(&p.matched.key, &mask.key)? == orig
                }
                _ => true,
            };

            print_match(&p.matched)?;
            println!();
            print_actions(&p.serialized)?;
            write_hr(&mut std::io::stdout())?;

            let diff = [
                ("key", same_key),
                ("mask", same_mask),
                ("actions", p.roundtrips()),
            ];
            for (what, same) in diff {
                let state = if same { "unchanged" } else { "differs" };
                println!("{what:<8} {state}");
            }

            if strict && diff.iter().any(|(_, same)| !same) {
                bail!("dumped flow differs from the input");
            }
        }
    }

    Ok(())
}
