//! Receive side: staging shipped archives and merging them into stores
//!
//! The receive directory holds each staged archive next to its descriptor:
//! - `<time>_<owner>.tar.gz`
//! - `<time>_<owner>.json`
//!
//! The descriptor is written last, so an archive without one is incomplete
//! and ignored. Merging an archive:
//! 1. Verify the content hash
//! 2. Unpack into a fresh staging directory
//! 3. Merge each top-level directory into `stores/<document>`; unknown
//!    documents go to the error sink
//! 4. Remove the staging directory, whatever happened

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::doc::DocResolver;
use crate::env::checkpoint::fsync_dir;
use crate::observability::Event;
use crate::store::{MergeStats, PlanBDb, SourceDir};

use super::archive::{extract_archive, remove_dir_quietly, remove_file_quietly};
use super::descriptor::{FileDescriptor, ARCHIVE_EXTENSION};
use super::errors::{ShardError, ShardResult};
use super::sink::ErrorSink;

const DESCRIPTOR_EXTENSION: &str = "json";

/// Outcome of merging one archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub owner_id: String,
    pub merged: BTreeMap<String, MergeStats>,
    /// Directories naming no known document
    pub rejected: Vec<String>,
}

/// Outcome of merging every staged archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingReport {
    pub archives: Vec<ArchiveReport>,
    /// Archives left staged after a failure
    pub failed: usize,
}

pub struct MergeProcessor {
    stores_dir: PathBuf,
    receive_dir: PathBuf,
    staging_dir: PathBuf,
    resolver: Arc<dyn DocResolver>,
    error_sink: Arc<dyn ErrorSink>,
}

impl MergeProcessor {
    pub fn new(
        stores_dir: impl Into<PathBuf>,
        receive_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        resolver: Arc<dyn DocResolver>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            stores_dir: stores_dir.into(),
            receive_dir: receive_dir.into(),
            staging_dir: staging_dir.into(),
            resolver,
            error_sink,
        }
    }

    pub fn stores_dir(&self) -> &Path {
        &self.stores_dir
    }

    pub fn receive_dir(&self) -> &Path {
        &self.receive_dir
    }

    /// Copies an archive into the receive directory and writes its
    /// descriptor. Returns the staged archive path.
    pub fn receive(&self, descriptor: &FileDescriptor, archive: &Path) -> ShardResult<PathBuf> {
        fs::create_dir_all(&self.receive_dir)
            .map_err(|e| ShardError::io_error_at_path(&self.receive_dir, e))?;

        let (archive_path, descriptor_path) = self.staged_paths(descriptor);
        let tmp_archive = archive_path.with_extension("tmp");
        fs::copy(archive, &tmp_archive).map_err(|e| ShardError::io_error_at_path(&tmp_archive, e))?;
        fs::rename(&tmp_archive, &archive_path)
            .map_err(|e| ShardError::io_error_at_path(&archive_path, e))?;

        let json = serde_json::to_vec_pretty(descriptor).map_err(|e| ShardError::Descriptor {
            path: descriptor_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp_descriptor = descriptor_path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_descriptor)
            .map_err(|e| ShardError::io_error_at_path(&tmp_descriptor, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| ShardError::io_error_at_path(&tmp_descriptor, e))?;
        drop(file);
        fs::rename(&tmp_descriptor, &descriptor_path)
            .map_err(|e| ShardError::io_error_at_path(&descriptor_path, e))?;
        fsync_dir(&self.receive_dir)?;

        info!(
            event = %Event::ArchiveStaged,
            owner = %descriptor.owner_id,
            path = %archive_path.display(),
            "Archive staged"
        );
        Ok(archive_path)
    }

    /// Staged archives in creation order.
    pub fn pending(&self) -> ShardResult<Vec<(FileDescriptor, PathBuf)>> {
        let entries = match fs::read_dir(&self.receive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ShardError::io_error_at_path(&self.receive_dir, e)),
        };

        let mut pending = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ShardError::io_error_at_path(&self.receive_dir, e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXTENSION) {
                continue;
            }
            let descriptor = read_descriptor(&path)?;
            let (archive_path, _) = self.staged_paths(&descriptor);
            if archive_path.exists() {
                pending.push((descriptor, archive_path));
            }
        }

        pending.sort_by(|a, b| {
            (a.0.create_time_ms, &a.0.owner_id).cmp(&(b.0.create_time_ms, &b.0.owner_id))
        });
        Ok(pending)
    }

    /// Merges every staged archive, oldest first. Archives that fail stay
    /// staged.
    pub fn merge_pending(&self) -> ShardResult<PendingReport> {
        let mut report = PendingReport::default();
        for (descriptor, archive_path) in self.pending()? {
            match self.merge_staged(&descriptor, &archive_path) {
                Ok(archive_report) => report.archives.push(archive_report),
                Err(e) => {
                    error!(
                        event = %Event::ShardFailed,
                        owner = %descriptor.owner_id,
                        code = e.code(),
                        error = %e,
                        "Staged archive failed to merge"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Merges a staged archive, then removes it and its descriptor.
    pub fn merge_staged(&self, descriptor: &FileDescriptor, archive: &Path) -> ShardResult<ArchiveReport> {
        let report = self.merge_archive(descriptor, archive)?;
        let (archive_path, descriptor_path) = self.staged_paths(descriptor);
        remove_file_quietly(&descriptor_path);
        remove_file_quietly(&archive_path);
        Ok(report)
    }

    /// Verifies and merges an archive. The archive itself is left in place.
    pub fn merge_archive(&self, descriptor: &FileDescriptor, archive: &Path) -> ShardResult<ArchiveReport> {
        if let Err(e) = descriptor.verify(archive) {
            warn!(
                event = %Event::ArchiveRejected,
                owner = %descriptor.owner_id,
                error = %e,
                "Archive content does not match its descriptor"
            );
            return Err(e);
        }

        let staging = self
            .staging_dir
            .join(format!("{}_{}", descriptor.stem(), Uuid::new_v4()));
        fs::create_dir_all(&staging).map_err(|e| ShardError::io_error_at_path(&staging, e))?;

        let result = (|| {
            extract_archive(archive, &staging)?;
            self.merge_unpacked(descriptor, &staging)
        })();

        remove_dir_quietly(&staging);
        result
    }

    fn merge_unpacked(&self, descriptor: &FileDescriptor, staging: &Path) -> ShardResult<ArchiveReport> {
        let mut dirs = fs::read_dir(staging)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| ShardError::io_error_at_path(staging, e))?;
        dirs.sort_by_key(|entry| entry.file_name());

        let mut report = ArchiveReport {
            owner_id: descriptor.owner_id.clone(),
            ..ArchiveReport::default()
        };
        for entry in dirs {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            let Some(doc) = self.resolver.resolve(&name) else {
                self.error_sink.report(
                    &name,
                    &format!("shard {} holds unknown document '{}'", descriptor.owner_id, name),
                );
                warn!(
                    event = %Event::ArchiveRejected,
                    owner = %descriptor.owner_id,
                    doc = %name,
                    "Unknown document in archive"
                );
                report.rejected.push(name);
                continue;
            };

            let db = PlanBDb::open(&doc, &self.stores_dir.join(&doc.name), false)?;
            let stats = db.merge(SourceDir::new(path))?;
            report.merged.insert(name, stats);
        }
        Ok(report)
    }

    fn staged_paths(&self, descriptor: &FileDescriptor) -> (PathBuf, PathBuf) {
        let stem = descriptor.stem();
        (
            self.receive_dir
                .join(format!("{}.{}", stem, ARCHIVE_EXTENSION)),
            self.receive_dir
                .join(format!("{}.{}", stem, DESCRIPTOR_EXTENSION)),
        )
    }
}

fn read_descriptor(path: &Path) -> ShardResult<FileDescriptor> {
    let content = fs::read_to_string(path).map_err(|e| ShardError::io_error_at_path(path, e))?;
    serde_json::from_str(&content).map_err(|e| ShardError::Descriptor {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
