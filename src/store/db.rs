//! Generic store engine
//!
//! `Db<S>` holds one environment and applies the record layout of schema
//! `S` to it. Records live in the `db` table; lookup tables sit beside it
//! in the same environment.
//!
//! Merge:
//! - Records whose key and value hold no lookup surrogates are copied byte
//!   for byte (quick path)
//! - Others are decoded through the source lookups and re-inserted through
//!   the destination lookups (slow path)
//!
//! Retention:
//! 1. Take the writer, then a snapshot, so nothing is written in between
//! 2. Visit every record in key order; delete it if older than the cutoff,
//!    otherwise mark the lookup surrogates it references
//! 3. Remove every lookup entry left unmarked

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::codec::{Val, ValSerde};
use crate::doc::StoreDoc;
use crate::env::{Env, EnvSettings, ReadTxn, Txn};
use crate::observability::{metrics, Event};
use crate::search::{FieldIndex, LazyKv, Predicate};
use crate::writer::Writer;

use super::errors::{StoreError, StoreResult};
use super::schema::{join_value, split_value, Schema, SchemaInfo};
use super::source::SourceDir;
use super::now_ms;

/// Table holding every record
pub const DATA_TABLE: &str = "db";

/// Outcome of merging one source directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Records copied byte for byte
    pub quick: u64,
    /// Records decoded and re-encoded
    pub slow: u64,
    /// Records kept out because the destination already had the key
    pub skipped: u64,
}

/// Outcome of one retention run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionStats {
    pub deleted: u64,
    pub swept: u64,
}

pub struct Db<S: Schema> {
    env: Arc<Env>,
    schema: S,
    name: String,
    overwrite: bool,
}

impl<S: Schema> Db<S> {
    /// Opens the store for `doc` in `dir`, creating it unless read-only.
    pub fn open(dir: &Path, doc: &StoreDoc, read_only: bool) -> StoreResult<Self> {
        let info = SchemaInfo::for_doc(doc);
        let env = Env::open(
            dir,
            EnvSettings {
                max_store_size: doc.settings.max_store_size,
                read_only,
            },
        )?;

        if read_only {
            info.check(env.path())?;
        } else {
            info.ensure(env.path())?;
        }

        Ok(Self {
            schema: S::from_info(&info),
            env,
            name: doc.name.clone(),
            overwrite: doc.settings.overwrite,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn info(&self) -> &SchemaInfo {
        &self.schema.columns().info
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Blocks until this store can be written.
    ///
    /// Merge, retention and condense take the writer themselves, so calling
    /// them while this thread holds a writer fails with
    /// `PLANB_ENV_WRITER_REENTRY`.
    pub fn writer(&self) -> StoreResult<Writer> {
        Ok(Writer::new(&self.env)?)
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        self.env.begin_read().entries(DATA_TABLE)
    }

    /// Inserts a record stamped with the current time.
    ///
    /// Returns `false` when the key exists and the store keeps existing records.
    pub fn insert(&self, writer: &mut Writer, key: &S::Key, value: &S::Value) -> StoreResult<bool> {
        self.insert_at(writer, key, value, now_ms())
    }

    /// Inserts a record with an explicit insert time.
    pub fn insert_at(
        &self,
        writer: &mut Writer,
        key: &S::Key,
        value: &S::Value,
        insert_time: i64,
    ) -> StoreResult<bool> {
        if !Arc::ptr_eq(writer.env(), &self.env) {
            return Err(StoreError::WriterMismatch {
                writer_path: writer.env().path().display().to_string(),
                store_path: self.env.path().display().to_string(),
            });
        }

        let txn = writer.txn()?;
        let key_bytes = self.schema.write_key(txn, key)?;
        if !self.overwrite && txn.contains(DATA_TABLE, &key_bytes) {
            return Ok(false);
        }
        let column = self.schema.write_value(txn, value)?;
        txn.put(DATA_TABLE, &key_bytes, &join_value(insert_time, &column))?;
        writer.try_commit()?;

        metrics().increment_records_inserted();
        Ok(true)
    }

    /// Value stored under an exact key.
    pub fn get(&self, key: &S::Key) -> StoreResult<Option<S::Value>> {
        Ok(self.get_with_insert_time(key)?.map(|(value, _)| value))
    }

    /// Value and insert time stored under an exact key.
    pub fn get_with_insert_time(&self, key: &S::Key) -> StoreResult<Option<(S::Value, i64)>> {
        let read = self.env.begin_read();
        let Some(key_bytes) = self.schema.key_for_get(&read, key)? else {
            return Ok(None);
        };
        match read.get(DATA_TABLE, &key_bytes) {
            Some(stored) => Ok(Some(self.decode_stored(&read, stored)?)),
            None => Ok(None),
        }
    }

    /// Decodes a stored value into the value and its insert time.
    pub fn decode_stored(&self, txn: &dyn Txn, stored: &[u8]) -> StoreResult<(S::Value, i64)> {
        let (insert_time, column) = split_value(stored)?;
        Ok((self.schema.read_value(txn, column)?, insert_time))
    }

    /// Visits every record in key order.
    pub fn for_each(&self, mut f: impl FnMut(S::Key, S::Value, i64)) -> StoreResult<()> {
        let read = self.env.begin_read();
        for (key, stored) in read.iter(DATA_TABLE) {
            let key = self.schema.read_key(&read, key)?;
            let (value, insert_time) = self.decode_stored(&read, stored)?;
            f(key, value, insert_time);
        }
        Ok(())
    }

    /// Every record in key order.
    pub fn records(&self) -> StoreResult<Vec<(S::Key, S::Value)>> {
        let mut out = Vec::new();
        self.for_each(|key, value, _| out.push((key, value)))?;
        Ok(out)
    }

    /// Streams the indexed fields of every record `predicate` accepts.
    ///
    /// Returns the number of matches.
    pub fn search(
        &self,
        predicate: &dyn Predicate,
        field_index: &FieldIndex,
        consumer: &mut dyn FnMut(Vec<Val>),
    ) -> StoreResult<u64> {
        let read = self.env.begin_read();
        let mut matched = 0;
        for (key, stored) in read.iter(DATA_TABLE) {
            let row = LazyKv::new(&self.schema, &read, key, stored);
            let hit = predicate.matches(&row);
            row.take_error()?;
            if hit {
                let values = field_index.values(&row);
                row.take_error()?;
                consumer(values);
                matched += 1;
            }
        }
        Ok(matched)
    }

    /// Whether a record references any lookup table.
    pub fn uses_lookup(&self, key: &[u8], column: &[u8]) -> StoreResult<bool> {
        let columns = self.schema.columns();
        if let Some(serde) = &columns.key {
            if serde.uses_lookup(self.schema.key_column_bytes(key)?) {
                return Ok(true);
            }
        }
        Ok(columns
            .value
            .as_ref()
            .is_some_and(|serde| serde.uses_lookup(column)))
    }

    /// Merges every record of `source` into this store, then deletes it.
    pub fn merge(&self, source: SourceDir) -> StoreResult<MergeStats> {
        let expected = self.info();
        match SchemaInfo::load(source.path())? {
            Some(found) if found != *expected => {
                return Err(StoreError::SchemaMismatch {
                    path: source.path().display().to_string(),
                    expected: expected.to_string(),
                    found: found.to_string(),
                })
            }
            Some(_) => {}
            None => {
                return Err(StoreError::CorruptSchema {
                    path: source.path().display().to_string(),
                    reason: "no schema file".to_string(),
                })
            }
        }

        info!(
            event = %Event::MergeStart,
            store = %self.name,
            source = %source.path().display(),
            "Merging store directory"
        );

        let stats = {
            let source_env = Env::open(source.path(), EnvSettings::read_only())?;
            let read = source_env.begin_read();
            self.merge_records(&read)?
        };

        fs::remove_dir_all(source.path())
            .map_err(|e| StoreError::io_error_at_path(source.path(), e))?;

        metrics().record_merge(stats.quick, stats.slow);
        info!(
            event = %Event::MergeComplete,
            store = %self.name,
            quick = stats.quick,
            slow = stats.slow,
            skipped = stats.skipped,
            "Merge complete"
        );
        Ok(stats)
    }

    fn merge_records(&self, source: &ReadTxn) -> StoreResult<MergeStats> {
        let mut writer = self.writer()?;
        let mut stats = MergeStats::default();

        for (key, stored) in source.iter(DATA_TABLE) {
            let (insert_time, column) = split_value(stored)?;

            if self.uses_lookup(key, column)? {
                let key = self.schema.read_key(source, key)?;
                let value = self.schema.read_value(source, column)?;
                if self.insert_at(&mut writer, &key, &value, insert_time)? {
                    stats.slow += 1;
                } else {
                    stats.skipped += 1;
                }
                continue;
            }

            let txn = writer.txn()?;
            let written = if self.overwrite {
                txn.put(DATA_TABLE, key, stored)?;
                true
            } else {
                txn.put_if_absent(DATA_TABLE, key, stored)?
            };
            writer.try_commit()?;
            if written {
                stats.quick += 1;
            } else {
                stats.skipped += 1;
            }
        }

        writer.close()?;
        Ok(stats)
    }

    /// Deletes records older than `cutoff` and reclaims lookup entries no
    /// surviving record references.
    ///
    /// `use_alternate_time` ages records by insert time instead of their own
    /// time field.
    pub fn delete_old_data(&self, cutoff: i64, use_alternate_time: bool) -> StoreResult<RetentionStats> {
        info!(
            event = %Event::RetentionStart,
            store = %self.name,
            cutoff,
            use_alternate_time,
            "Retention starting"
        );

        let mut writer = self.writer()?;
        let read = self.env.begin_read();

        let columns = self.schema.columns();
        let mut key_recorder = columns.key.as_ref().map(ValSerde::used_lookups_recorder);
        let mut value_recorder = columns.value.as_ref().map(ValSerde::used_lookups_recorder);

        let mut stats = RetentionStats::default();
        for (key, stored) in read.iter(DATA_TABLE) {
            let (insert_time, column) = split_value(stored)?;
            let time = if use_alternate_time {
                insert_time
            } else {
                self.schema.record_time(key)?.unwrap_or(insert_time)
            };

            if time < cutoff {
                writer.txn()?.delete(DATA_TABLE, key)?;
                writer.try_commit()?;
                stats.deleted += 1;
            } else {
                if let Some(recorder) = key_recorder.as_mut() {
                    recorder.record_used(self.schema.key_column_bytes(key)?)?;
                }
                if let Some(recorder) = value_recorder.as_mut() {
                    recorder.record_used(column)?;
                }
            }
        }

        let txn = writer.txn()?;
        for recorder in [&key_recorder, &value_recorder].into_iter().flatten() {
            stats.swept += recorder.delete_unused(txn)?;
        }
        writer.close()?;

        metrics().record_retention(stats.deleted, stats.swept);
        info!(
            event = %Event::RetentionComplete,
            store = %self.name,
            deleted = stats.deleted,
            swept = stats.swept,
            "Retention complete"
        );
        if stats.swept > 0 {
            info!(event = %Event::LookupSweep, store = %self.name, swept = stats.swept, "Lookup entries reclaimed");
        }
        Ok(stats)
    }

    /// Removes redundant records older than `cutoff`. Returns the number removed.
    pub fn condense(&self, cutoff: i64) -> StoreResult<u64> {
        let condensed = S::condense(self, cutoff)?;
        metrics().add_records_condensed(condensed);
        info!(
            event = %Event::CondenseComplete,
            store = %self.name,
            cutoff,
            condensed,
            "Condense complete"
        );
        Ok(condensed)
    }
}
