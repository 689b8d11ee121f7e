//! Shards: batches of writes shipped as one archive
//!
//! A shard is a directory under the shards directory holding one store
//! environment per document written in the batch. Stores are opened lazily
//! on the first record for their document.
//!
//! Closing a shard:
//! 1. Close every store writer (final commit) and checkpoint its environment
//! 2. Archive the shard directory to `<batch>.tar.gz` beside it
//! 3. Delete the shard directory
//! 4. Hash the archive
//! 5. Hand descriptor and archive to the transport, asking for a synchronous
//!    merge if any written document wants one
//! 6. Delete the directory and the archive, whether or not 1-5 succeeded
//!
//! A shard dropped without closing deletes its directory unshipped.

pub mod archive;
pub mod descriptor;
pub mod errors;
pub mod merge;
pub mod sink;
pub mod transport;

use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::doc::DocResolver;
use crate::observability::{metrics, Event};
use crate::store::{now_ms, PlanBDb, Record, StoreError};
use crate::writer::Writer;

pub use descriptor::{hash_file, FileDescriptor, ARCHIVE_EXTENSION};
pub use errors::{ShardError, ShardResult};
pub use merge::{ArchiveReport, MergeProcessor, PendingReport};
pub use sink::{CollectingErrorSink, ErrorSink, LoggingErrorSink};
pub use transport::{DirectoryTransport, ShardTransport};

use archive::{create_archive, remove_dir_quietly, remove_file_quietly};

/// Creates shards and gives them their collaborators
#[derive(Clone)]
pub struct ShardManager {
    shards_dir: PathBuf,
    resolver: Arc<dyn DocResolver>,
    transport: Arc<dyn ShardTransport>,
    error_sink: Arc<dyn ErrorSink>,
}

impl ShardManager {
    pub fn new(
        shards_dir: impl Into<PathBuf>,
        resolver: Arc<dyn DocResolver>,
        transport: Arc<dyn ShardTransport>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            shards_dir: shards_dir.into(),
            resolver,
            transport,
            error_sink,
        }
    }

    pub fn shards_dir(&self) -> &Path {
        &self.shards_dir
    }

    /// Allocates an empty shard directory for `batch_id`.
    ///
    /// Leftovers of an earlier shard with the same id are removed.
    pub fn create_writer(&self, batch_id: &str) -> ShardResult<ShardWriter> {
        validate_batch_id(batch_id)?;

        let dir = self.shards_dir.join(batch_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| ShardError::io_error_at_path(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| ShardError::io_error_at_path(&dir, e))?;

        info!(event = %Event::ShardCreated, batch = batch_id, dir = %dir.display(), "Shard created");
        Ok(ShardWriter {
            batch_id: batch_id.to_string(),
            archive_path: self
                .shards_dir
                .join(format!("{}.{}", batch_id, ARCHIVE_EXTENSION)),
            dir,
            create_time_ms: now_ms(),
            manager: self.clone(),
            stores: BTreeMap::new(),
            finished: false,
        })
    }
}

fn validate_batch_id(batch_id: &str) -> ShardResult<()> {
    let valid = !batch_id.is_empty()
        && batch_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ShardError::InvalidBatch {
            batch_id: batch_id.to_string(),
        })
    }
}

struct ShardStore {
    // Dropped before the store
    writer: Writer,
    db: PlanBDb,
    synchronise_merge: bool,
}

/// One open shard
pub struct ShardWriter {
    batch_id: String,
    dir: PathBuf,
    archive_path: PathBuf,
    create_time_ms: i64,
    manager: ShardManager,
    stores: BTreeMap<String, ShardStore>,
    finished: bool,
}

impl ShardWriter {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Documents written so far.
    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Writes one record to the shard store of `doc_name`.
    ///
    /// Returns `false` when the record was reported to the error sink
    /// instead: unknown document or a record of the wrong kind.
    pub fn write(&mut self, doc_name: &str, record: &Record) -> ShardResult<bool> {
        if !self.stores.contains_key(doc_name) {
            let Some(doc) = self.manager.resolver.resolve(doc_name) else {
                self.reject(doc_name, &format!("unknown document '{}'", doc_name));
                return Ok(false);
            };
            let db = PlanBDb::open(&doc, &self.dir.join(&doc.name), false)?;
            let writer = db.writer()?;
            self.stores.insert(
                doc_name.to_string(),
                ShardStore {
                    writer,
                    db,
                    synchronise_merge: doc.settings.synchronise_merge,
                },
            );
        }

        let Some(store) = self.stores.get_mut(doc_name) else {
            return Ok(false);
        };
        match store.db.insert(&mut store.writer, record) {
            Ok(written) => Ok(written),
            Err(e @ StoreError::RecordMismatch { .. }) => {
                self.reject(doc_name, &e.to_string());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ships the shard. Returns its descriptor, or `None` when nothing was
    /// written and there was nothing to ship.
    pub fn close(mut self) -> ShardResult<Option<FileDescriptor>> {
        let result = self.ship();
        self.cleanup();

        match &result {
            Ok(Some(descriptor)) => {
                metrics().increment_shards_shipped();
                info!(
                    event = %Event::ShardShipped,
                    batch = %self.batch_id,
                    hash = %descriptor.content_hash,
                    "Shard shipped"
                );
            }
            Ok(None) => {
                info!(event = %Event::ShardEmpty, batch = %self.batch_id, "Shard closed empty");
            }
            Err(e) => {
                metrics().increment_shards_failed();
                error!(
                    event = %Event::ShardFailed,
                    batch = %self.batch_id,
                    code = e.code(),
                    error = %e,
                    "Shard failed to ship"
                );
            }
        }
        result
    }

    fn ship(&mut self) -> ShardResult<Option<FileDescriptor>> {
        let stores = mem::take(&mut self.stores);
        if stores.is_empty() {
            return Ok(None);
        }

        let mut synchronise_merge = false;
        for (_, store) in stores {
            synchronise_merge |= store.synchronise_merge;
            store.writer.close()?;
            store.db.env().compact()?;
        }

        create_archive(&self.dir, &self.archive_path)?;
        fs::remove_dir_all(&self.dir).map_err(|e| ShardError::io_error_at_path(&self.dir, e))?;

        let descriptor =
            FileDescriptor::for_file(&self.archive_path, self.create_time_ms, self.batch_id.clone())?;
        self.manager
            .transport
            .store_part(&descriptor, &self.archive_path, synchronise_merge)?;
        Ok(Some(descriptor))
    }

    fn reject(&self, doc_name: &str, message: &str) {
        metrics().increment_records_rejected();
        warn!(
            event = %Event::ShardRecordRejected,
            batch = %self.batch_id,
            doc = doc_name,
            "{}",
            message
        );
        self.manager.error_sink.report(doc_name, message);
    }

    fn cleanup(&mut self) {
        self.stores.clear();
        remove_dir_quietly(&self.dir);
        remove_file_quietly(&self.archive_path);
        self.finished = true;
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(batch = %self.batch_id, "Shard dropped without close; discarding");
            self.cleanup();
        }
    }
}
