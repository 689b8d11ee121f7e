//! Codec error types
//!
//! Error codes:
//! - PLANB_CODEC_TYPE_MISMATCH (ERROR severity)
//! - PLANB_CODEC_HASH_CLASH_EXHAUSTED (ERROR severity)
//! - PLANB_CODEC_DECODE (FATAL severity)
//! - PLANB_CODEC_MISSING_LOOKUP (FATAL severity)
//! - Environment codes pass through unchanged

use thiserror::Error;

use crate::env::{EnvError, Severity};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Expected a {expected} value, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Cannot decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("Lookup table {table} has no entry for surrogate {surrogate}")]
    MissingLookup { table: String, surrogate: String },

    #[error("Hash clash sequence exhausted in {table} for hash {hash}")]
    HashClashExhausted { table: String, hash: String },
}

impl CodecError {
    pub fn decode(what: &'static str, reason: impl Into<String>) -> Self {
        CodecError::Decode {
            what,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CodecError::Env(e) => e.code(),
            CodecError::TypeMismatch { .. } => "PLANB_CODEC_TYPE_MISMATCH",
            CodecError::Decode { .. } => "PLANB_CODEC_DECODE",
            CodecError::MissingLookup { .. } => "PLANB_CODEC_MISSING_LOOKUP",
            CodecError::HashClashExhausted { .. } => "PLANB_CODEC_HASH_CLASH_EXHAUSTED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CodecError::Env(e) => e.severity(),
            CodecError::Decode { .. } | CodecError::MissingLookup { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_codes_pass_through() {
        let err: CodecError = EnvError::KeyTooLong { len: 600, max: 511 }.into();
        assert_eq!(err.code(), "PLANB_ENV_KEY_TOO_LONG");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_lookup_is_fatal() {
        let err = CodecError::MissingLookup {
            table: "value_uid_v".to_string(),
            surrogate: "7".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("value_uid_v"));
    }
}
