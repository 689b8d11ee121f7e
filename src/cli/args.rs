//! CLI argument definitions using clap
//!
//! Commands:
//! - planb inspect <store_dir>
//! - planb get --config <path> <doc> <key> [--time <time>]
//! - planb search --config <path> <doc> [--fields <f,..>] [--limit <n>]
//! - planb merge-pending --config <path>
//! - planb maintain --config <path> [--now <time>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// planb - embedded state stores
#[derive(Parser, Debug)]
#[command(name = "planb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log as one JSON object per line
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the schema, record count and table sizes of a store
    Inspect {
        /// Store environment directory
        store_dir: PathBuf,
    },

    /// Look up one key
    Get {
        /// Path to configuration file
        #[arg(long, default_value = "./planb.json")]
        config: PathBuf,

        doc: String,

        /// Key; an integer for range stores
        key: String,

        /// Point in time for temporal and session stores, ISO-8601 or epoch
        /// milliseconds. Defaults to now.
        #[arg(long)]
        time: Option<String>,
    },

    /// Filter a store with an expression read from stdin
    Search {
        /// Path to configuration file
        #[arg(long, default_value = "./planb.json")]
        config: PathBuf,

        doc: String,

        /// Fields to return, comma-separated. Defaults to every field.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Stop after this many rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Merge every staged shard archive into its stores
    MergePending {
        /// Path to configuration file
        #[arg(long, default_value = "./planb.json")]
        config: PathBuf,
    },

    /// Apply retention and condense settings to every store
    Maintain {
        /// Path to configuration file
        #[arg(long, default_value = "./planb.json")]
        config: PathBuf,

        /// Reference time, ISO-8601 or epoch milliseconds. Defaults to now.
        #[arg(long)]
        now: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
