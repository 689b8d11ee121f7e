//! Record shapes and the schema file
//!
//! A [`Schema`] describes how one store kind lays out keys and values on top
//! of the column codecs. Stored values always begin with the record's insert
//! time as a sortable long; the value column follows.
//!
//! `schema.json` in the environment directory records the schema a store was
//! created with. A store never opens under a different schema.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::sortable::{self, LONG_LEN};
use crate::codec::{CodecError, CodecResult, DataType, HashLength, Val, ValSerde};
use crate::doc::{StoreDoc, StoreKind};
use crate::env::checkpoint::fsync_dir;
use crate::env::{Txn, WriteTxn};

use super::db::Db;
use super::errors::{StoreError, StoreResult};

pub const SCHEMA_FILE: &str = "schema.json";
const SCHEMA_TMP_FILE: &str = "schema.json.tmp";

/// Field holding the insert time of every record
pub const INSERT_TIME_FIELD: &str = "insertTime";

/// Schema recorded in `schema.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    pub kind: StoreKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<DataType>,
    pub hash_length: HashLength,
}

impl SchemaInfo {
    pub fn for_doc(doc: &StoreDoc) -> Self {
        Self {
            kind: doc.kind,
            key_type: doc.kind.has_key_column().then_some(doc.key_type),
            value_type: doc.kind.has_value_column().then_some(doc.value_type),
            hash_length: doc.hash_length,
        }
    }

    /// Reads the schema file in `dir`, if there is one.
    pub fn load(dir: &Path) -> StoreResult<Option<Self>> {
        let path = dir.join(SCHEMA_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io_error_at_path(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::CorruptSchema {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Writes the schema file atomically.
    pub fn save(&self, dir: &Path) -> StoreResult<()> {
        let tmp_path = dir.join(SCHEMA_TMP_FILE);
        let final_path = dir.join(SCHEMA_FILE);

        let json = serde_json::to_vec_pretty(self).map_err(|e| StoreError::CorruptSchema {
            path: final_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut file =
            fs::File::create(&tmp_path).map_err(|e| StoreError::io_error_at_path(&tmp_path, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io_error_at_path(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .map_err(|e| StoreError::io_error_at_path(&final_path, e))?;
        fsync_dir(dir)?;
        Ok(())
    }

    /// Fails unless the schema file in `dir` is absent or equal to `self`.
    pub fn check(&self, dir: &Path) -> StoreResult<bool> {
        match Self::load(dir)? {
            Some(found) if found != *self => Err(StoreError::SchemaMismatch {
                path: dir.display().to_string(),
                expected: self.to_string(),
                found: found.to_string(),
            }),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Checks the schema file in `dir`, writing it when absent.
    pub fn ensure(&self, dir: &Path) -> StoreResult<()> {
        if !self.check(dir)? {
            self.save(dir)?;
        }
        Ok(())
    }
}

impl fmt::Display for SchemaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        if let Some(key_type) = self.key_type {
            write!(f, "key={}, ", key_type)?;
        }
        if let Some(value_type) = self.value_type {
            write!(f, "value={}, ", value_type)?;
        }
        write!(f, "hash={:?})", self.hash_length)
    }
}

/// Column codecs of a store, built from its schema
#[derive(Debug, Clone)]
pub struct Columns {
    pub info: SchemaInfo,
    pub key: Option<ValSerde>,
    pub value: Option<ValSerde>,
}

impl Columns {
    pub fn new(info: &SchemaInfo) -> Self {
        Self {
            info: info.clone(),
            key: info
                .key_type
                .map(|t| ValSerde::new(t, info.hash_length, "key")),
            value: info
                .value_type
                .map(|t| ValSerde::new(t, info.hash_length, "value")),
        }
    }

    pub fn key(&self) -> CodecResult<&ValSerde> {
        self.key
            .as_ref()
            .ok_or_else(|| CodecError::decode("key", format!("{} has no key column", self.info.kind)))
    }

    pub fn value(&self) -> CodecResult<&ValSerde> {
        self.value.as_ref().ok_or_else(|| {
            CodecError::decode("value", format!("{} has no value column", self.info.kind))
        })
    }
}

/// Layout of one store kind's records
pub trait Schema: Sized + Send + Sync + 'static {
    type Key: Clone + fmt::Debug + PartialEq;
    type Value: Clone + fmt::Debug + PartialEq;

    fn from_info(info: &SchemaInfo) -> Self;

    fn columns(&self) -> &Columns;

    fn write_key(&self, txn: &mut WriteTxn, key: &Self::Key) -> CodecResult<Vec<u8>>;

    /// Encodes a key for lookup; `None` when no record can have it.
    fn key_for_get(&self, txn: &dyn Txn, key: &Self::Key) -> CodecResult<Option<Vec<u8>>>;

    fn read_key(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Self::Key>;

    /// Part of an encoded key produced by the key column.
    fn key_column_bytes<'k>(&self, key: &'k [u8]) -> CodecResult<&'k [u8]> {
        Ok(key)
    }

    /// Time the record describes, used by retention; `None` falls back to
    /// the insert time.
    fn record_time(&self, key: &[u8]) -> CodecResult<Option<i64>>;

    fn write_value(&self, txn: &mut WriteTxn, value: &Self::Value) -> CodecResult<Vec<u8>>;

    fn read_value(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Self::Value>;

    /// Searchable fields in display order.
    fn fields(&self) -> &'static [&'static str];

    fn is_key_field(&self, field: &str) -> bool;

    fn key_field(&self, key: &Self::Key, field: &str) -> Option<Val>;

    fn value_field(&self, value: &Self::Value, field: &str) -> Option<Val>;

    /// Removes or merges redundant records older than `cutoff` without
    /// changing any query result. Returns the number of records removed.
    fn condense(db: &Db<Self>, cutoff: i64) -> StoreResult<u64> {
        let _ = (db, cutoff);
        Ok(0)
    }
}

/// Splits a stored value into its insert time and value column.
pub fn split_value(stored: &[u8]) -> CodecResult<(i64, &[u8])> {
    if stored.len() < LONG_LEN {
        return Err(CodecError::decode(
            "stored value",
            format!("{} bytes is shorter than the insert time", stored.len()),
        ));
    }
    let (time, column) = stored.split_at(LONG_LEN);
    Ok((sortable::read_i64(time)?, column))
}

/// Prefixes a value column with its insert time.
pub fn join_value(insert_time: i64, column: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LONG_LEN + column.len());
    out.extend_from_slice(&sortable::encode_i64(insert_time));
    out.extend_from_slice(column);
    out
}

/// Whether `key` is `prefix` followed by exactly `suffix_len` bytes.
///
/// Key columns vary in length, so keys of a longer prefix can sort between
/// the keys of a shorter one.
pub fn has_exact_prefix(key: &[u8], prefix: &[u8], suffix_len: usize) -> bool {
    key.len() == prefix.len() + suffix_len && key.starts_with(prefix)
}
