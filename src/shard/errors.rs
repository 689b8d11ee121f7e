//! Shard error types
//!
//! Error codes:
//! - PLANB_SHARD_IO_ERROR (ERROR severity)
//! - PLANB_SHARD_ARCHIVE (ERROR severity)
//! - PLANB_SHARD_HASH_MISMATCH (ERROR severity)
//! - PLANB_SHARD_DESCRIPTOR (ERROR severity)
//! - PLANB_SHARD_INVALID_BATCH (ERROR severity)
//! - PLANB_SHARD_TRANSPORT (ERROR severity)
//! - Store and environment codes pass through unchanged
//!
//! A failed shard never touches a live store, so no shard error is fatal
//! on its own.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::env::{EnvError, Severity};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Archive {path} has hash {found}, descriptor says {expected}")]
    HashMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Unreadable descriptor {path}: {reason}")]
    Descriptor { path: String, reason: String },

    #[error("Invalid batch id '{batch_id}'")]
    InvalidBatch { batch_id: String },

    #[error("Transport failed: {message}")]
    Transport { message: String },
}

impl ShardError {
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        ShardError::Io {
            message: message.into(),
            source,
        }
    }

    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn archive(message: impl Into<String>, source: io::Error) -> Self {
        ShardError::Archive {
            message: message.into(),
            source,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ShardError::Transport {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ShardError::Store(e) => e.code(),
            ShardError::Env(e) => e.code(),
            ShardError::Io { .. } => "PLANB_SHARD_IO_ERROR",
            ShardError::Archive { .. } => "PLANB_SHARD_ARCHIVE",
            ShardError::HashMismatch { .. } => "PLANB_SHARD_HASH_MISMATCH",
            ShardError::Descriptor { .. } => "PLANB_SHARD_DESCRIPTOR",
            ShardError::InvalidBatch { .. } => "PLANB_SHARD_INVALID_BATCH",
            ShardError::Transport { .. } => "PLANB_SHARD_TRANSPORT",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ShardError::Store(e) => e.severity(),
            ShardError::Env(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

pub type ShardResult<T> = Result<T, ShardError>;
