//! Environment error types
//!
//! Error codes:
//! - PLANB_ENV_IO_ERROR (ERROR severity)
//! - PLANB_ENV_KEY_TOO_LONG (ERROR severity, not retriable)
//! - PLANB_ENV_MAP_FULL (ERROR severity)
//! - PLANB_ENV_READ_ONLY (ERROR severity)
//! - PLANB_ENV_WRITER_REENTRY (ERROR severity)
//! - PLANB_ENV_CORRUPTION (FATAL severity)
//! - PLANB_ENV_LOG_POISONED (FATAL severity)

use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Severity levels shared by every planb error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, process continues
    Error,
    /// The store can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Errors raised by an environment and its transactions
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Data corruption: {message}")]
    Corruption { message: String },

    #[error("Key of {len} bytes exceeds the maximum key length of {max} bytes")]
    KeyTooLong { len: usize, max: usize },

    #[error("Store size limit reached: {size} bytes exceeds the maximum of {max} bytes")]
    MapFull { size: u64, max: u64 },

    #[error("Environment is read only: {path}")]
    ReadOnly { path: String },

    #[error("Environment is already open read only: {path}")]
    AlreadyOpenReadOnly { path: String },

    #[error("This thread already holds the writer for {path}")]
    WriterReentry { path: String },

    #[error("Commit log could not be rolled back after a failed append: {path}")]
    LogPoisoned { path: String },
}

impl EnvError {
    /// Create an I/O error with a message
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        EnvError::Io {
            message: message.into(),
            source,
        }
    }

    /// Create an I/O error naming the path involved
    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    /// Create a data corruption error (FATAL)
    pub fn corruption(message: impl Into<String>) -> Self {
        EnvError::Corruption {
            message: message.into(),
        }
    }

    /// Create a data corruption error with file and byte offset context
    pub fn corruption_at_offset(path: &Path, offset: u64, reason: impl Into<String>) -> Self {
        EnvError::Corruption {
            message: format!(
                "{} ({} byte_offset: {})",
                reason.into(),
                path.display(),
                offset
            ),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            EnvError::Io { .. } => "PLANB_ENV_IO_ERROR",
            EnvError::Corruption { .. } => "PLANB_ENV_CORRUPTION",
            EnvError::KeyTooLong { .. } => "PLANB_ENV_KEY_TOO_LONG",
            EnvError::MapFull { .. } => "PLANB_ENV_MAP_FULL",
            EnvError::ReadOnly { .. } => "PLANB_ENV_READ_ONLY",
            EnvError::AlreadyOpenReadOnly { .. } => "PLANB_ENV_READ_ONLY",
            EnvError::WriterReentry { .. } => "PLANB_ENV_WRITER_REENTRY",
            EnvError::LogPoisoned { .. } => "PLANB_ENV_LOG_POISONED",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            EnvError::Corruption { .. } | EnvError::LogPoisoned { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type for environment operations
pub type EnvResult<T> = Result<T, EnvError>;
