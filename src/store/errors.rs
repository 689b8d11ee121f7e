//! Store error types
//!
//! Error codes:
//! - PLANB_STORE_IO_ERROR (ERROR severity)
//! - PLANB_STORE_SCHEMA_MISMATCH (ERROR severity)
//! - PLANB_STORE_RECORD_MISMATCH (ERROR severity)
//! - PLANB_STORE_WRITER_MISMATCH (ERROR severity)
//! - PLANB_STORE_INVALID_QUERY (ERROR severity)
//! - PLANB_STORE_CORRUPT_SCHEMA (FATAL severity)
//! - Environment and codec codes pass through unchanged

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::codec::CodecError;
use crate::env::{EnvError, Severity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Schema mismatch at {path}: store has {found}, expected {expected}")]
    SchemaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Unreadable schema file {path}: {reason}")]
    CorruptSchema { path: String, reason: String },

    #[error("A {found} record cannot be written to a {expected} store")]
    RecordMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Writer belongs to {writer_path}, not {store_path}")]
    WriterMismatch {
        writer_path: String,
        store_path: String,
    },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },
}

impl StoreError {
    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            message: format!("I/O error at {}", path.display()),
            source,
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        StoreError::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Env(e) => e.code(),
            StoreError::Codec(e) => e.code(),
            StoreError::Io { .. } => "PLANB_STORE_IO_ERROR",
            StoreError::SchemaMismatch { .. } => "PLANB_STORE_SCHEMA_MISMATCH",
            StoreError::CorruptSchema { .. } => "PLANB_STORE_CORRUPT_SCHEMA",
            StoreError::RecordMismatch { .. } => "PLANB_STORE_RECORD_MISMATCH",
            StoreError::WriterMismatch { .. } => "PLANB_STORE_WRITER_MISMATCH",
            StoreError::InvalidQuery { .. } => "PLANB_STORE_INVALID_QUERY",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Env(e) => e.severity(),
            StoreError::Codec(e) => e.severity(),
            StoreError::CorruptSchema { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
