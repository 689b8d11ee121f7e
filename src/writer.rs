//! Batched single-writer access to an environment
//!
//! Lifecycle:
//! 1. `Writer::new` blocks until no other writer holds the environment. A
//!    thread that already holds a writer for the same environment gets
//!    [`EnvError::WriterReentry`] rather than waiting on itself
//! 2. The write transaction is opened lazily on first use
//! 3. `try_commit` counts changes and commits once the count passes
//!    [`COMMIT_THRESHOLD`]
//! 4. `close` commits the remainder and releases the environment
//!
//! Dropping a writer without closing it performs the same final commit, so
//! early returns and unwinding never leave the next writer blocked.

use std::sync::Arc;

use tracing::error;

use crate::env::lock::WritePermit;
use crate::env::{Env, EnvError, EnvResult, WriteTxn};

/// Changes accumulated before `try_commit` commits
pub const COMMIT_THRESHOLD: u64 = 10_000;

pub struct Writer {
    // Dropped before the permit
    txn: Option<WriteTxn>,
    changes: u64,
    env: Arc<Env>,
    permit: WritePermit,
}

impl Writer {
    /// Waits for exclusive write access to `env`.
    ///
    /// Not re-entrant: fails with [`EnvError::WriterReentry`] when the
    /// calling thread already holds a writer for `env`.
    pub fn new(env: &Arc<Env>) -> EnvResult<Self> {
        check_writable(env)?;
        let permit = env.write_gate().acquire().ok_or_else(|| EnvError::WriterReentry {
            path: env.path().display().to_string(),
        })?;
        Ok(Self::with_permit(env, permit))
    }

    /// Takes exclusive write access to `env` if no other writer holds it.
    pub fn try_new(env: &Arc<Env>) -> EnvResult<Option<Self>> {
        check_writable(env)?;
        Ok(env
            .write_gate()
            .try_acquire()
            .map(|permit| Self::with_permit(env, permit)))
    }

    fn with_permit(env: &Arc<Env>, permit: WritePermit) -> Self {
        Self {
            txn: None,
            changes: 0,
            env: Arc::clone(env),
            permit,
        }
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// The open write transaction, starting one if needed.
    pub fn txn(&mut self) -> EnvResult<&mut WriteTxn> {
        let txn = match self.txn.take() {
            Some(txn) => txn,
            None => self.env.begin_write(&self.permit)?,
        };
        Ok(self.txn.insert(txn))
    }

    /// Counts one change and commits if the threshold has been passed.
    ///
    /// Returns whether a commit happened.
    pub fn try_commit(&mut self) -> EnvResult<bool> {
        self.changes += 1;
        if self.changes > COMMIT_THRESHOLD {
            self.commit()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Changes counted since the last commit.
    pub fn pending_changes(&self) -> u64 {
        self.changes
    }

    /// Commits the open transaction, if any.
    pub fn commit(&mut self) -> EnvResult<()> {
        self.changes = 0;
        if let Some(txn) = self.txn.take() {
            txn.commit()?;
        }
        Ok(())
    }

    /// Commits the remainder and releases the environment.
    pub fn close(mut self) -> EnvResult<()> {
        self.commit()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.txn.is_some() {
            if let Err(e) = self.commit() {
                error!(
                    path = %self.env.path().display(),
                    error = %e,
                    "Final commit of dropped writer failed"
                );
            }
        }
    }
}

fn check_writable(env: &Env) -> EnvResult<()> {
    if env.is_read_only() {
        return Err(EnvError::ReadOnly {
            path: env.path().display().to_string(),
        });
    }
    Ok(())
}
