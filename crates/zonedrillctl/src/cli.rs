//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Zonedrill - availability zone failover drills
#[derive(Parser, Debug)]
#[command(name = "zonedrillctl")]
#[command(about = "Zonedrill - availability zone failover drills for scheduled services", long_about = None)]
#[command(version = env!("ZONEDRILL_VERSION"))]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $ZONEDRILL_CONFIG and /etc/zonedrill/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Scheduler gateway endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Directory holding saved topology snapshots
    #[arg(long, global = true)]
    pub snapshot_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against an in-memory scheduler instead of the gateway
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove one availability zone from a service and wait for it to settle
    Failover {
        cluster: String,
        service: String,

        #[arg(long)]
        region: String,

        /// Availability zone to take out of service
        #[arg(long)]
        az: String,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Put back the topology saved by the last failover
    Restore {
        cluster: String,
        service: String,

        #[arg(long)]
        region: String,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Show saved snapshots
    Status {
        cluster: Option<String>,
        service: Option<String>,
    },

    /// Delete a saved snapshot so a new failover may start
    Discard { cluster: String, service: String },
}

/// Poll overrides shared by failover and restore
#[derive(clap::Args, Debug, Default, Clone)]
pub struct PollArgs {
    /// Give up after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Seconds between the first poll ticks
    #[arg(long)]
    pub interval: Option<u64>,

    /// Give up after this many ticks
    #[arg(long)]
    pub max_ticks: Option<u32>,
}
