// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "10x",
    about = "10x — an AI coding assistant",
    version,
    long_about = None,
)]
pub struct Cli {
    /// Bring-your-own-key mode: authenticate with api_key / TENX_API_KEY
    /// instead of a hosted auth token.
    #[arg(long)]
    pub byok: bool,

    /// Routing mode for this run: auto | superfast | fast | smart
    #[arg(long, short = 'm', value_name = "TIER")]
    pub model: Option<String>,

    /// Resume a named session
    #[arg(long, short = 'r', value_name = "NAME")]
    pub resume: Option<String>,

    /// Continue the most recently updated session
    #[arg(long = "continue", short = 'c')]
    pub continue_last: bool,

    /// Run a single prompt non-interactively and exit
    #[arg(long, short = 'x', value_name = "PROMPT")]
    pub execute: Option<String>,

    /// Suppress informational output (tool traces, token usage)
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}
