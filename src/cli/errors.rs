//! CLI error types
//!
//! Error codes:
//! - PLANB_CLI_IO_ERROR (ERROR severity)
//! - PLANB_CLI_UNKNOWN_DOC (ERROR severity)
//! - PLANB_CLI_INVALID_ARGUMENT (ERROR severity)
//! - Config, store and shard codes pass through unchanged

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::env::Severity;
use crate::shard::ShardError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("No document named '{0}' in the config")]
    UnknownDoc(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CliError::InvalidArgument(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(e) => e.code(),
            CliError::Store(e) => e.code(),
            CliError::Shard(e) => e.code(),
            CliError::Io(_) => "PLANB_CLI_IO_ERROR",
            CliError::UnknownDoc(_) => "PLANB_CLI_UNKNOWN_DOC",
            CliError::InvalidArgument(_) => "PLANB_CLI_INVALID_ARGUMENT",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CliError::Store(e) => e.severity(),
            CliError::Shard(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(format!("JSON error: {}", e))
    }
}

pub type CliResult<T> = Result<T, CliError>;
