//! Commit log: append-only, one fsynced record per commit
//!
//! Replay rules:
//! - Records are replayed in file order
//! - A damaged record that reaches the end of the file is a torn commit
//!   (the process died mid-append); it is discarded and the log is cut back
//! - A damaged record followed by more data is corruption and halts the open
//!
//! A failed append is cut back off the file so the next commit lands where it
//! would have. If that cut fails too the log is poisoned and refuses every
//! further append until it is truncated successfully.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::error;

use super::errors::{EnvError, EnvResult};
use super::record::CommitRecord;

/// Result of scanning a commit log
#[derive(Debug, Default)]
pub struct Replay {
    /// Complete, checksum-valid records in file order
    pub records: Vec<CommitRecord>,
    /// Byte length of the valid prefix
    pub valid_len: u64,
    /// Whether a torn tail was found after the valid prefix
    pub torn: bool,
}

/// Appender for `commit.log`
pub struct CommitLog {
    path: PathBuf,
    file: File,
    size: u64,
    poisoned: bool,
}

impl CommitLog {
    /// Opens or creates the log file for appending.
    pub fn open(path: &Path) -> EnvResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EnvError::io_error_at_path(path, e))?;

        let size = file
            .metadata()
            .map_err(|e| EnvError::io_error_at_path(path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            poisoned: false,
        })
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current log size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether a failed append could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Appends a record and fsyncs before returning.
    ///
    /// On failure nothing of the record is left in the log. Returns the
    /// number of bytes appended.
    pub fn append(&mut self, record: &CommitRecord) -> EnvResult<u64> {
        if self.poisoned {
            return Err(EnvError::LogPoisoned {
                path: self.path.display().to_string(),
            });
        }

        let serialized = record.serialize();
        if let Err(e) = self.write_synced(&serialized) {
            self.rollback();
            return Err(EnvError::io_error(
                format!("Failed to append commit {} to {}", record.commit_id, self.path.display()),
                e,
            ));
        }

        self.size += serialized.len() as u64;
        Ok(serialized.len() as u64)
    }

    fn write_synced(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.sync_data()
    }

    /// Cuts off whatever a failed append left past the last good record.
    fn rollback(&mut self) {
        if let Err(e) = self.truncate_to(self.size) {
            error!(
                path = %self.path.display(),
                valid_len = self.size,
                error = %e,
                "Commit log rollback failed; refusing further commits"
            );
            self.poisoned = true;
        }
    }

    /// Empties the log after a checkpoint has made its records redundant.
    pub fn truncate(&mut self) -> EnvResult<()> {
        self.truncate_to(0)
    }

    /// Cuts the log back to `len` bytes.
    pub fn truncate_to(&mut self, len: u64) -> EnvResult<()> {
        self.file
            .set_len(len)
            .and_then(|_| self.file.sync_all())
            .map_err(|e| EnvError::io_error_at_path(&self.path, e))?;
        self.size = len;
        self.poisoned = false;
        Ok(())
    }
}

/// Reads every record of the log at `path`.
///
/// A missing log replays as empty.
pub fn replay(path: &Path) -> EnvResult<Replay> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(EnvError::io_error_at_path(path, e)),
    };

    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match CommitRecord::deserialize(&data[offset..]) {
            Ok((record, consumed)) => {
                replay.records.push(record);
                offset += consumed;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                replay.torn = true;
                break;
            }
            Err(e) => {
                let declared = declared_length(&data[offset..]);
                if offset + declared >= data.len() {
                    replay.torn = true;
                    break;
                }
                return Err(EnvError::corruption_at_offset(path, offset as u64, e.to_string()));
            }
        }
    }

    replay.valid_len = offset as u64;
    Ok(replay)
}

fn declared_length(data: &[u8]) -> usize {
    if data.len() < 4 {
        return data.len();
    }
    u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
}
