//! Command-line surface (ambient concern; §AMBIENT-3).
//!
//! Scaled down from the teacher's `Cli`/`Commands` derive shape to the one
//! thing this crate's binary needs: start serving, over stdio or HTTP.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-server-core", about = "Model Context Protocol connection core")]
pub struct Cli {
    /// Path to a YAML server config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (overrides RUST_LOG if set more than once).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve over line-delimited or header-framed stdio.
    Stdio,
    /// Serve over HTTP, binding the given address.
    Http {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
