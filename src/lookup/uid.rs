//! UID lookup: byte strings to sequential integer surrogates
//!
//! Tables, for a lookup named `value`:
//! - `value_uid_k`: bytes -> id (8 bytes, big-endian)
//! - `value_uid_v`: id -> bytes
//! - `lookup_meta`, key `value_uid_seq`: last id handed out
//!
//! Ids start at 1 and are never reused, even after retention removes them.

use std::collections::HashSet;

use tracing::debug;

use crate::codec::errors::{CodecError, CodecResult};
use crate::env::{Txn, WriteTxn};
use crate::observability::metrics;

use super::META_TABLE;

pub const UID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct UidLookupDb {
    key_table: String,
    value_table: String,
    seq_key: Vec<u8>,
}

impl UidLookupDb {
    pub fn new(name: &str) -> Self {
        Self {
            key_table: format!("{}_uid_k", name),
            value_table: format!("{}_uid_v", name),
            seq_key: format!("{}_uid_seq", name).into_bytes(),
        }
    }

    /// Returns the id of `bytes`, assigning the next one if it is new.
    pub fn put(&self, txn: &mut WriteTxn, bytes: &[u8]) -> CodecResult<u64> {
        if let Some(id) = self.get(&*txn, bytes)? {
            return Ok(id);
        }

        let id = self.last_id(&*txn)? + 1;
        let encoded = id.to_be_bytes();
        txn.put(&self.key_table, bytes, &encoded)?;
        txn.put(&self.value_table, &encoded, bytes)?;
        txn.put(META_TABLE, &self.seq_key, &encoded)?;

        metrics().increment_lookups_created();
        Ok(id)
    }

    /// Returns the id of `bytes` without assigning one.
    pub fn get(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Option<u64>> {
        txn.get(&self.key_table, bytes)
            .map(|id| decode_uid(id, &self.key_table))
            .transpose()
    }

    /// Returns the bytes `id` stands for.
    pub fn get_value<'t>(&self, txn: &'t dyn Txn, id: u64) -> CodecResult<&'t [u8]> {
        txn.get(&self.value_table, &id.to_be_bytes())
            .ok_or_else(|| CodecError::MissingLookup {
                table: self.value_table.clone(),
                surrogate: id.to_string(),
            })
    }

    /// Number of live entries.
    pub fn len(&self, txn: &dyn Txn) -> usize {
        txn.entries(&self.value_table)
    }

    /// Ids of every live entry, in order.
    pub fn ids(&self, txn: &dyn Txn) -> CodecResult<Vec<u64>> {
        txn.iter(&self.value_table)
            .map(|(id, _)| decode_uid(id, &self.value_table))
            .collect()
    }

    /// Removes every entry whose id is not in `used`. Returns the count removed.
    pub fn delete_unused(&self, txn: &mut WriteTxn, used: &HashSet<u64>) -> CodecResult<u64> {
        let unused: Vec<(Vec<u8>, Vec<u8>)> = txn
            .iter(&self.value_table)
            .filter(|(id, _)| {
                decode_uid(id, &self.value_table).map_or(true, |id| !used.contains(&id))
            })
            .map(|(id, bytes)| (id.to_vec(), bytes.to_vec()))
            .collect();

        for (id, bytes) in &unused {
            txn.delete(&self.value_table, id)?;
            txn.delete(&self.key_table, bytes)?;
        }

        if !unused.is_empty() {
            debug!(table = %self.value_table, removed = unused.len(), "Removed unused uid lookups");
        }
        Ok(unused.len() as u64)
    }

    fn last_id(&self, txn: &dyn Txn) -> CodecResult<u64> {
        match txn.get(META_TABLE, &self.seq_key) {
            Some(bytes) => decode_uid(bytes, META_TABLE),
            None => Ok(0),
        }
    }
}

pub(crate) fn decode_uid(bytes: &[u8], table: &str) -> CodecResult<u64> {
    let b: [u8; UID_LEN] = bytes.try_into().map_err(|_| {
        CodecError::decode("uid", format!("{} bytes in {}", bytes.len(), table))
    })?;
    Ok(u64::from_be_bytes(b))
}
