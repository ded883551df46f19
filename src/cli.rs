// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Command-line surface for the `ember` binary: a thin driver over the
//! dispatcher/agent-loop core, not a channel adapter in its own right.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the fully merged configuration (defaults + discovered files) as YAML.
    ShowConfig,
}

#[derive(Parser, Debug)]
#[command(name = "ember", about = "Agent execution core for a personal AI assistant", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// One-shot prompt. If omitted, ember reads lines from stdin until EOF,
    /// running each as a turn on the same session.
    pub prompt: Option<String>,

    /// Explicit config file layered on top of the discovered search paths.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Workspace root for sessions/media/memory. Defaults to the current directory.
    #[arg(long, value_name = "PATH")]
    pub workspace: Option<PathBuf>,

    /// Session key to resume. Defaults to `cli:default`.
    #[arg(long)]
    pub session: Option<String>,

    /// -v for debug logging, -vv for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
