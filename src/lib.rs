//! planb - embedded key/value state stores
//!
//! - Typed keys and values packed into sortable bytes, with long values
//!   moved to deduplicating lookup tables
//! - Five store kinds: state, temporal state, range state, temporal range
//!   state and session
//! - Write batching under one exclusive writer per environment
//! - Shards: batches of stores archived, shipped and merged elsewhere
//! - Retention, lookup sweeping and condensing
//! - Full-scan search with lazily decoded rows

pub mod cli;
pub mod codec;
pub mod config;
pub mod doc;
pub mod env;
pub mod lookup;
pub mod maintenance;
pub mod observability;
pub mod search;
pub mod shard;
pub mod store;
pub mod writer;
