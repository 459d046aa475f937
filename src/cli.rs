//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cs-unifi-bouncer")]
#[command(author, version, about = "CrowdSec bouncer for UniFi firewalls")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional YAML config file; environment variables override it
    #[arg(short, long, global = true, env = "BOUNCER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Stream decisions and keep the firewall in sync (default)
    Run,

    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,

    /// Show version
    Version,
}
