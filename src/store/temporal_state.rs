//! Temporal point state: values that change over time per key
//!
//! Key layout: `[key column][effective time]`. A lookup at time `t` returns
//! the record with the greatest effective time not after `t`.

use std::collections::HashMap;
use std::ops::Bound;

use crate::codec::sortable::{self, LONG_LEN};
use crate::codec::{CodecResult, Val};
use crate::env::{Txn, WriteTxn};

use super::db::{Db, DATA_TABLE};
use super::errors::StoreResult;
use super::schema::{has_exact_prefix, split_value, Columns, Schema, SchemaInfo};

const FIELDS: &[&str] = &["key", "effectiveTime", "value", "insertTime"];

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalKey {
    pub key: Val,
    pub effective_time: i64,
}

impl TemporalKey {
    pub fn new(key: impl Into<Val>, effective_time: i64) -> Self {
        Self {
            key: key.into(),
            effective_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemporalStateSchema {
    columns: Columns,
}

impl Schema for TemporalStateSchema {
    type Key = TemporalKey;
    type Value = Val;

    fn from_info(info: &SchemaInfo) -> Self {
        Self {
            columns: Columns::new(info),
        }
    }

    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn write_key(&self, txn: &mut WriteTxn, key: &TemporalKey) -> CodecResult<Vec<u8>> {
        let prefix = self.columns.key()?.write(txn, &key.key)?;
        Ok(sortable::append_longs(prefix, &[key.effective_time]))
    }

    fn key_for_get(&self, txn: &dyn Txn, key: &TemporalKey) -> CodecResult<Option<Vec<u8>>> {
        Ok(self
            .columns
            .key()?
            .to_buffer_for_get(txn, &key.key)?
            .map(|prefix| sortable::append_longs(prefix, &[key.effective_time])))
    }

    fn read_key(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<TemporalKey> {
        let (prefix, [effective_time]) = sortable::split_longs::<1>(bytes)?;
        Ok(TemporalKey {
            key: self.columns.key()?.read(txn, prefix)?,
            effective_time,
        })
    }

    fn key_column_bytes<'k>(&self, key: &'k [u8]) -> CodecResult<&'k [u8]> {
        Ok(sortable::split_longs::<1>(key)?.0)
    }

    fn record_time(&self, key: &[u8]) -> CodecResult<Option<i64>> {
        let (_, [effective_time]) = sortable::split_longs::<1>(key)?;
        Ok(Some(effective_time))
    }

    fn write_value(&self, txn: &mut WriteTxn, value: &Val) -> CodecResult<Vec<u8>> {
        self.columns.value()?.write(txn, value)
    }

    fn read_value(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        self.columns.value()?.read(txn, bytes)
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn is_key_field(&self, field: &str) -> bool {
        matches!(field, "key" | "effectiveTime")
    }

    fn key_field(&self, key: &TemporalKey, field: &str) -> Option<Val> {
        match field {
            "key" => Some(key.key.clone()),
            "effectiveTime" => Some(Val::Long(key.effective_time)),
            _ => None,
        }
    }

    fn value_field(&self, value: &Val, field: &str) -> Option<Val> {
        (field == "value").then(|| value.clone())
    }

    /// Drops records that repeat the value of the previous record for the
    /// same key. A lookup that landed on a dropped record lands on the
    /// earlier one and reads the same value.
    fn condense(db: &Db<Self>, cutoff: i64) -> StoreResult<u64> {
        let mut writer = db.writer()?;
        let read = db.env().begin_read();

        // Keys of one prefix are not contiguous when a longer prefix shares
        // its leading bytes, so the last value is tracked per prefix.
        let mut last_value: HashMap<&[u8], &[u8]> = HashMap::new();
        let mut removed = 0;
        for (key, stored) in read.iter(DATA_TABLE) {
            let (prefix, [effective_time]) = sortable::split_longs::<1>(key)?;
            let (_, column) = split_value(stored)?;

            match last_value.insert(prefix, column) {
                Some(previous) if previous == column && effective_time < cutoff => {
                    writer.txn()?.delete(DATA_TABLE, key)?;
                    writer.try_commit()?;
                    removed += 1;
                }
                _ => {}
            }
        }

        writer.close()?;
        Ok(removed)
    }
}

pub type TemporalStateDb = Db<TemporalStateSchema>;

impl Db<TemporalStateSchema> {
    /// Value of `key` in effect at `time`.
    pub fn get_at(&self, key: &Val, time: i64) -> StoreResult<Option<Val>> {
        Ok(self.get_entry_at(key, time)?.map(|(_, value)| value))
    }

    /// Effective time and value of the record of `key` in effect at `time`.
    pub fn get_entry_at(&self, key: &Val, time: i64) -> StoreResult<Option<(i64, Val)>> {
        let read = self.env().begin_read();
        let Some(prefix) = self.schema().columns().key()?.to_buffer_for_get(&read, key)? else {
            return Ok(None);
        };
        let end = sortable::append_longs(prefix.clone(), &[time]);

        let found = read
            .range(DATA_TABLE, Bound::Included(prefix.as_slice()), Bound::Included(end.as_slice()))
            .rev()
            .find(|(k, _)| has_exact_prefix(k, &prefix, LONG_LEN));

        match found {
            Some((k, stored)) => {
                let (_, [effective_time]) = sortable::split_longs::<1>(k)?;
                let (value, _) = self.decode_stored(&read, stored)?;
                Ok(Some((effective_time, value)))
            }
            None => Ok(None),
        }
    }
}
