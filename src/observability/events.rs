//! Observability events for planb
//!
//! Every lifecycle log line carries one of these as its `event` field, so
//! log consumers can match on a stable name instead of message text.

use std::fmt;

/// Observable events in the store engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Environment
    /// Environment opened (after recovery)
    EnvOpen,
    /// Torn commit discarded from the tail of the commit log
    EnvTornCommit,
    /// Commit log corruption detected (FATAL)
    EnvCorruption,
    /// Write transaction committed
    Commit,
    /// Checkpoint written and commit log truncated
    Checkpoint,

    // Lookups
    /// Two distinct values share a hash; a clash sequence was assigned
    HashClash,
    /// Unreferenced lookup entries removed
    LookupSweep,

    // Shards
    /// Shard directory allocated
    ShardCreated,
    /// Record rejected by a shard (unknown document or wrong shape)
    ShardRecordRejected,
    /// Shard archived and handed to the transport
    ShardShipped,
    /// Shard close failed; local files removed
    ShardFailed,
    /// Shard closed without any records
    ShardEmpty,

    // Merge
    /// Merge of a source directory begins
    MergeStart,
    /// Merge of a source directory complete
    MergeComplete,
    /// Received archive staged for a later merge
    ArchiveStaged,
    /// Received archive failed verification
    ArchiveRejected,

    // Maintenance
    /// Retention pass begins
    RetentionStart,
    /// Retention pass complete
    RetentionComplete,
    /// Condense pass complete
    CondenseComplete,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EnvOpen => "ENV_OPEN",
            Event::EnvTornCommit => "ENV_TORN_COMMIT",
            Event::EnvCorruption => "ENV_CORRUPTION",
            Event::Commit => "COMMIT",
            Event::Checkpoint => "CHECKPOINT_COMPLETE",

            Event::HashClash => "HASH_CLASH",
            Event::LookupSweep => "LOOKUP_SWEEP",

            Event::ShardCreated => "SHARD_CREATED",
            Event::ShardRecordRejected => "SHARD_RECORD_REJECTED",
            Event::ShardShipped => "SHARD_SHIPPED",
            Event::ShardFailed => "SHARD_FAILED",
            Event::ShardEmpty => "SHARD_EMPTY",

            Event::MergeStart => "MERGE_BEGIN",
            Event::MergeComplete => "MERGE_COMPLETE",
            Event::ArchiveStaged => "ARCHIVE_STAGED",
            Event::ArchiveRejected => "ARCHIVE_REJECTED",

            Event::RetentionStart => "RETENTION_BEGIN",
            Event::RetentionComplete => "RETENTION_COMPLETE",
            Event::CondenseComplete => "CONDENSE_COMPLETE",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::EnvCorruption)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::EnvOpen,
            Event::EnvTornCommit,
            Event::EnvCorruption,
            Event::Commit,
            Event::Checkpoint,
            Event::HashClash,
            Event::LookupSweep,
            Event::ShardCreated,
            Event::ShardRecordRejected,
            Event::ShardShipped,
            Event::ShardFailed,
            Event::ShardEmpty,
            Event::MergeStart,
            Event::MergeComplete,
            Event::ArchiveStaged,
            Event::ArchiveRejected,
            Event::RetentionStart,
            Event::RetentionComplete,
            Event::CondenseComplete,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::EnvCorruption.is_fatal());
        assert!(!Event::Commit.is_fatal());
        assert!(!Event::ShardFailed.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::MergeComplete), "MERGE_COMPLETE");
        assert_eq!(format!("{}", Event::Checkpoint), "CHECKPOINT_COMPLETE");
    }
}
