//! CLI module for planb
//!
//! Provides command-line interface for:
//! - inspect: Describe a store directory
//! - get: Point lookup in a configured store
//! - search: Filter a store with an expression from stdin
//! - merge-pending: Merge staged shard archives
//! - maintain: Apply retention and condense

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{get, inspect, maintain, merge_pending, run, run_command, search};
pub use errors::{CliError, CliResult};
pub use io::{read_request, write_error, write_response};
