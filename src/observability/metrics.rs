//! Metrics registry for planb
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics registry containing all operational counters
///
/// All counters use Relaxed ordering; readers only need eventually
/// consistent totals.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Committed write transactions
    commits: AtomicU64,
    /// Bytes appended to commit logs
    commit_log_bytes: AtomicU64,
    /// Checkpoints written
    checkpoints: AtomicU64,
    /// Records inserted through a store
    records_inserted: AtomicU64,
    /// Lookup entries created (UID and hash)
    lookups_created: AtomicU64,
    /// Hash clashes resolved with a clash sequence
    hash_clashes: AtomicU64,
    /// Records merged by raw byte copy
    records_merged_quick: AtomicU64,
    /// Records merged by decode and re-insert
    records_merged_slow: AtomicU64,
    /// Source directories merged
    sources_merged: AtomicU64,
    /// Records removed by retention
    records_deleted: AtomicU64,
    /// Lookup entries removed by the sweep phase
    lookups_swept: AtomicU64,
    /// Records removed or rewritten by condense
    records_condensed: AtomicU64,
    /// Shards shipped
    shards_shipped: AtomicU64,
    /// Shards that failed to close
    shards_failed: AtomicU64,
    /// Records rejected by shards
    records_rejected: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Environment

    /// Record a commit and the log bytes it appended
    pub fn record_commit(&self, log_bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.commit_log_bytes.fetch_add(log_bytes, Ordering::Relaxed);
    }

    /// Increment checkpoints written
    pub fn increment_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    // Stores and lookups

    /// Increment records inserted
    pub fn increment_records_inserted(&self) {
        self.records_inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment lookup entries created
    pub fn increment_lookups_created(&self) {
        self.lookups_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment hash clashes
    pub fn increment_hash_clashes(&self) {
        self.hash_clashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Add merge results for one source directory
    pub fn record_merge(&self, quick: u64, slow: u64) {
        self.records_merged_quick.fetch_add(quick, Ordering::Relaxed);
        self.records_merged_slow.fetch_add(slow, Ordering::Relaxed);
        self.sources_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Add retention results
    pub fn record_retention(&self, deleted: u64, swept: u64) {
        self.records_deleted.fetch_add(deleted, Ordering::Relaxed);
        self.lookups_swept.fetch_add(swept, Ordering::Relaxed);
    }

    /// Add condense results
    pub fn add_records_condensed(&self, count: u64) {
        self.records_condensed.fetch_add(count, Ordering::Relaxed);
    }

    // Shards

    /// Increment shards shipped
    pub fn increment_shards_shipped(&self) {
        self.shards_shipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment shards failed
    pub fn increment_shards_failed(&self) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment records rejected
    pub fn increment_records_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            commit_log_bytes: self.commit_log_bytes.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            lookups_created: self.lookups_created.load(Ordering::Relaxed),
            hash_clashes: self.hash_clashes.load(Ordering::Relaxed),
            records_merged_quick: self.records_merged_quick.load(Ordering::Relaxed),
            records_merged_slow: self.records_merged_slow.load(Ordering::Relaxed),
            sources_merged: self.sources_merged.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            lookups_swept: self.lookups_swept.load(Ordering::Relaxed),
            records_condensed: self.records_condensed.load(Ordering::Relaxed),
            shards_shipped: self.shards_shipped.load(Ordering::Relaxed),
            shards_failed: self.shards_failed.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub commit_log_bytes: u64,
    pub checkpoints: u64,
    pub records_inserted: u64,
    pub lookups_created: u64,
    pub hash_clashes: u64,
    pub records_merged_quick: u64,
    pub records_merged_slow: u64,
    pub sources_merged: u64,
    pub records_deleted: u64,
    pub lookups_swept: u64,
    pub records_condensed: u64,
    pub shards_shipped: u64,
    pub shards_failed: u64,
    pub records_rejected: u64,
}
