//! Temporal range state: range-valid values that change over time
//!
//! Key layout: `[from][to][effective time]`. A lookup of key `k` at time `t`
//! considers every range holding `k` with an effective time not after `t`
//! and picks the latest; ties go to the greater start, then the narrower
//! range.

use std::ops::Bound;

use crate::codec::sortable;
use crate::codec::{CodecResult, Val};
use crate::env::{Txn, WriteTxn};

use super::db::{Db, DATA_TABLE};
use super::errors::StoreResult;
use super::range_state::KeyRange;
use super::schema::{split_value, Columns, Schema, SchemaInfo};

const FIELDS: &[&str] = &["keyStart", "keyEnd", "effectiveTime", "value", "insertTime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalRangeKey {
    pub range: KeyRange,
    pub effective_time: i64,
}

impl TemporalRangeKey {
    pub fn new(from: i64, to: i64, effective_time: i64) -> Self {
        Self {
            range: KeyRange::new(from, to),
            effective_time,
        }
    }

    /// Orders candidates for a lookup; the greatest wins.
    fn precedence(&self) -> (i64, i64, std::cmp::Reverse<i64>) {
        (
            self.effective_time,
            self.range.from,
            std::cmp::Reverse(self.range.to),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TemporalRangeStateSchema {
    columns: Columns,
}

impl Schema for TemporalRangeStateSchema {
    type Key = TemporalRangeKey;
    type Value = Val;

    fn from_info(info: &SchemaInfo) -> Self {
        Self {
            columns: Columns::new(info),
        }
    }

    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn write_key(&self, _txn: &mut WriteTxn, key: &TemporalRangeKey) -> CodecResult<Vec<u8>> {
        Ok(encode_key(key))
    }

    fn key_for_get(&self, _txn: &dyn Txn, key: &TemporalRangeKey) -> CodecResult<Option<Vec<u8>>> {
        Ok(Some(encode_key(key)))
    }

    fn read_key(&self, _txn: &dyn Txn, bytes: &[u8]) -> CodecResult<TemporalRangeKey> {
        decode_key(bytes)
    }

    fn record_time(&self, key: &[u8]) -> CodecResult<Option<i64>> {
        Ok(Some(decode_key(key)?.effective_time))
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
        matches!(field, "keyStart" | "keyEnd" | "effectiveTime")
    }

    fn key_field(&self, key: &TemporalRangeKey, field: &str) -> Option<Val> {
        match field {
            "keyStart" => Some(Val::Long(key.range.from)),
            "keyEnd" => Some(Val::Long(key.range.to)),
            "effectiveTime" => Some(Val::Long(key.effective_time)),
            _ => None,
        }
    }

    fn value_field(&self, value: &Val, field: &str) -> Option<Val> {
        (field == "value").then(|| value.clone())
    }

    /// Drops records that repeat the value of the previous record for the
    /// same range.
    ///
    /// A record effective at `e2` that repeats the record at `e1` is only
    /// dropped when no other overlapping range becomes effective in
    /// `[e1, e2]`; otherwise that range would start winning lookups the
    /// dropped record used to answer.
    fn condense(db: &Db<Self>, cutoff: i64) -> StoreResult<u64> {
        let mut writer = db.writer()?;
        let read = db.env().begin_read();

        let mut records = Vec::new();
        for (key, stored) in read.iter(DATA_TABLE) {
            let (_, column) = split_value(stored)?;
            records.push((decode_key(key)?, column));
        }

        let mut by_time: Vec<TemporalRangeKey> = records.iter().map(|(key, _)| *key).collect();
        by_time.sort_by_key(|key| key.effective_time);

        let mut removed = 0;
        // Last record kept for the current range
        let mut previous: Option<(TemporalRangeKey, &[u8])> = None;
        for (key, column) in &records {
            let repeat = previous.filter(|(p, p_column)| {
                p.range == key.range
                    && *p_column == *column
                    && key.effective_time < cutoff
                    && !contested(&by_time, key.range, p.effective_time, key.effective_time)
            });
            if repeat.is_some() {
                writer.txn()?.delete(DATA_TABLE, &encode_key(key))?;
                writer.try_commit()?;
                removed += 1;
            } else {
                previous = Some((*key, *column));
            }
        }

        writer.close()?;
        Ok(removed)
    }
}

/// Whether a record of another range overlapping `range` becomes effective
/// within `[from_time, to_time]`.
fn contested(by_time: &[TemporalRangeKey], range: KeyRange, from_time: i64, to_time: i64) -> bool {
    let start = by_time.partition_point(|k| k.effective_time < from_time);
    by_time[start..]
        .iter()
        .take_while(|k| k.effective_time <= to_time)
        .any(|k| k.range != range && k.range.from <= range.to && range.from <= k.range.to)
}

fn encode_key(key: &TemporalRangeKey) -> Vec<u8> {
    sortable::append_longs(
        Vec::with_capacity(24),
        &[key.range.from, key.range.to, key.effective_time],
    )
}

fn decode_key(bytes: &[u8]) -> CodecResult<TemporalRangeKey> {
    let (_, [from, to, effective_time]) = sortable::split_longs::<3>(bytes)?;
    Ok(TemporalRangeKey::new(from, to, effective_time))
}

pub type TemporalRangeStateDb = Db<TemporalRangeStateSchema>;

impl Db<TemporalRangeStateSchema> {
    /// Value for `key` in effect at `time`.
    pub fn get_at(&self, key: i64, time: i64) -> StoreResult<Option<Val>> {
        Ok(self.get_entry_at(key, time)?.map(|(_, value)| value))
    }

    /// Record key and value answering a lookup of `key` at `time`.
    pub fn get_entry_at(&self, key: i64, time: i64) -> StoreResult<Option<(TemporalRangeKey, Val)>> {
        let read = self.env().begin_read();
        let end = encode_key(&TemporalRangeKey::new(key, i64::MAX, i64::MAX));

        let mut best: Option<(TemporalRangeKey, &[u8])> = None;
        for (k, stored) in read.range(DATA_TABLE, Bound::Unbounded, Bound::Included(end.as_slice())) {
            let candidate = decode_key(k)?;
            if !candidate.range.contains(key) || candidate.effective_time > time {
                continue;
            }
            if best.map_or(true, |(b, _)| candidate.precedence() > b.precedence()) {
                best = Some((candidate, stored));
            }
        }

        match best {
            Some((found, stored)) => Ok(Some((found, self.decode_stored(&read, stored)?.0))),
            None => Ok(None),
        }
    }
}
