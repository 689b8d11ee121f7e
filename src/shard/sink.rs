//! Per-record error reporting
//!
//! A record that cannot be written (unknown document, wrong record shape)
//! and a received store that names an unknown document are reported here
//! and skipped; the rest of the batch carries on.

use parking_lot::Mutex;
use tracing::warn;

pub trait ErrorSink: Send + Sync {
    fn report(&self, doc_name: &str, message: &str);
}

/// Logs every report at warn level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, doc_name: &str, message: &str) {
        warn!(doc = doc_name, "{}", message);
    }
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(document, message)` pairs in report order.
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().clone()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, doc_name: &str, message: &str) {
        self.reports
            .lock()
            .push((doc_name.to_string(), message.to_string()));
    }
}
