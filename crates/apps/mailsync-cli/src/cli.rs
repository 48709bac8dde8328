//! CLI argument parsing using clap derive

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mailsync - Converge hosted mail accounts and aliases onto configuration
#[derive(Parser, Debug)]
#[command(name = "mailsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to conf.yml here or in ~/.config/mailsync)
    #[arg(short, long, global = true, env = "MAILSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Split ledger used to pick incremental candidates
    #[arg(long, global = true, env = "MAILSYNC_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Report planned operations without issuing writes
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Reconcile every resource in the managed domains, deleting surplus ones
    Full,

    /// Reconcile only resources that changed since the last recorded run
    ///
    /// Examples:
    ///   mailsync incremental                           # candidates from the ledger
    ///   mailsync incremental -C ann@example.com        # one address, every kind
    ///   mailsync incremental -C alias:info@example.com # one alias
    Incremental {
        /// Resource to reconcile (`kind:address` or a bare address); repeatable
        #[arg(short = 'C', long = "candidate")]
        candidates: Vec<String>,
    },
}
