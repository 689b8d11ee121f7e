//! Range-valid state: one value per inclusive integer key range
//!
//! Key layout: `[from][to]`, both sortable longs, so records sort by start
//! then end. A point lookup returns the containing range with the greatest
//! start; ties go to the narrower range.

use std::ops::Bound;

use crate::codec::sortable;
use crate::codec::{CodecResult, Val};
use crate::env::{Txn, WriteTxn};

use super::db::{Db, DATA_TABLE};
use super::errors::StoreResult;
use super::schema::{join_value, split_value, Columns, Schema, SchemaInfo};

const FIELDS: &[&str] = &["keyStart", "keyEnd", "value", "insertTime"];

/// Inclusive key range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub from: i64,
    pub to: i64,
}

impl KeyRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, key: i64) -> bool {
        self.from <= key && key <= self.to
    }
}

#[derive(Debug, Clone)]
pub struct RangeStateSchema {
    columns: Columns,
}

impl Schema for RangeStateSchema {
    type Key = KeyRange;
    type Value = Val;

    fn from_info(info: &SchemaInfo) -> Self {
        Self {
            columns: Columns::new(info),
        }
    }

    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn write_key(&self, _txn: &mut WriteTxn, key: &KeyRange) -> CodecResult<Vec<u8>> {
        Ok(encode_range(key))
    }

    fn key_for_get(&self, _txn: &dyn Txn, key: &KeyRange) -> CodecResult<Option<Vec<u8>>> {
        Ok(Some(encode_range(key)))
    }

    fn read_key(&self, _txn: &dyn Txn, bytes: &[u8]) -> CodecResult<KeyRange> {
        decode_range(bytes)
    }

    fn record_time(&self, _key: &[u8]) -> CodecResult<Option<i64>> {
        Ok(None)
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
        matches!(field, "keyStart" | "keyEnd")
    }

    fn key_field(&self, key: &KeyRange, field: &str) -> Option<Val> {
        match field {
            "keyStart" => Some(Val::Long(key.from)),
            "keyEnd" => Some(Val::Long(key.to)),
            _ => None,
        }
    }

    fn value_field(&self, value: &Val, field: &str) -> Option<Val> {
        (field == "value").then(|| value.clone())
    }

    /// Merges runs of abutting ranges that hold the same value into one
    /// range.
    ///
    /// A run qualifies when every member was inserted before `cutoff` and no
    /// record outside the run overlaps its span, so every key in the span
    /// reads the same value before and after.
    fn condense(db: &Db<Self>, cutoff: i64) -> StoreResult<u64> {
        let mut writer = db.writer()?;
        let read = db.env().begin_read();

        let mut records = Vec::new();
        for (key, stored) in read.iter(DATA_TABLE) {
            let (insert_time, column) = split_value(stored)?;
            records.push(RangeRecord {
                range: decode_range(key)?,
                insert_time,
                column,
            });
        }

        let mut removed = 0;
        // Greatest end among records before `i`
        let mut max_to = i64::MIN;
        let mut i = 0;
        while i < records.len() {
            let first = &records[i];
            if (i > 0 && first.range.from <= max_to) || first.insert_time >= cutoff {
                max_to = max_to.max(first.range.to);
                i += 1;
                continue;
            }

            let mut last = i;
            while let Some(next) = records.get(last + 1) {
                let current = &records[last];
                let abuts = current.range.to.checked_add(1) == Some(next.range.from);
                if !abuts || next.column != first.column || next.insert_time >= cutoff {
                    break;
                }
                last += 1;
            }
            let overlapped = records
                .get(last + 1)
                .is_some_and(|next| next.range.from <= records[last].range.to);
            if overlapped && last > i {
                // The record after the run overlaps its last member
                last -= 1;
            }

            if last > i {
                let txn = writer.txn()?;
                for record in &records[i..=last] {
                    txn.delete(DATA_TABLE, &encode_range(&record.range))?;
                }
                let merged = KeyRange::new(first.range.from, records[last].range.to);
                let insert_time = records[i..=last]
                    .iter()
                    .map(|r| r.insert_time)
                    .max()
                    .unwrap_or(first.insert_time);
                txn.put(
                    DATA_TABLE,
                    &encode_range(&merged),
                    &join_value(insert_time, first.column),
                )?;
                writer.try_commit()?;
                removed += (last - i) as u64;
            }

            max_to = records[i..=last]
                .iter()
                .fold(max_to, |acc, r| acc.max(r.range.to));
            i = last + 1;
        }

        writer.close()?;
        Ok(removed)
    }
}

struct RangeRecord<'a> {
    range: KeyRange,
    insert_time: i64,
    column: &'a [u8],
}

fn encode_range(range: &KeyRange) -> Vec<u8> {
    sortable::append_longs(Vec::with_capacity(16), &[range.from, range.to])
}

fn decode_range(bytes: &[u8]) -> CodecResult<KeyRange> {
    let (_, [from, to]) = sortable::split_longs::<2>(bytes)?;
    Ok(KeyRange { from, to })
}

pub type RangeStateDb = Db<RangeStateSchema>;

impl Db<RangeStateSchema> {
    /// Value of the range that holds `key`.
    pub fn get_containing(&self, key: i64) -> StoreResult<Option<Val>> {
        Ok(self.get_range_containing(key)?.map(|(_, value)| value))
    }

    /// Range and value that answer a lookup of `key`.
    pub fn get_range_containing(&self, key: i64) -> StoreResult<Option<(KeyRange, Val)>> {
        let read = self.env().begin_read();
        let end = encode_range(&KeyRange::new(key, i64::MAX));

        let mut best: Option<(KeyRange, &[u8])> = None;
        for (k, stored) in read
            .range(DATA_TABLE, Bound::Unbounded, Bound::Included(end.as_slice()))
            .rev()
        {
            let range = decode_range(k)?;
            if let Some((found, _)) = best {
                if range.from < found.from {
                    break;
                }
            }
            if range.contains(key) {
                // Same start, narrower range
                best = Some((range, stored));
            }
        }

        match best {
            Some((range, stored)) => Ok(Some((range, self.decode_stored(&read, stored)?.0))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataType;
    use crate::doc::{StoreDoc, StoreKind};
    use tempfile::TempDir;

    fn open(temp_dir: &TempDir) -> RangeStateDb {
        let doc = StoreDoc::new(
            "ranges",
            StoreKind::RangeState,
            DataType::Variable,
            DataType::Variable,
        );
        RangeStateDb::open(temp_dir.path(), &doc, false).unwrap()
    }

    fn insert(db: &RangeStateDb, entries: &[(i64, i64, &str, i64)]) {
        let mut writer = db.writer().unwrap();
        for (from, to, value, insert_time) in entries {
            db.insert_at(&mut writer, &KeyRange::new(*from, *to), &Val::from(*value), *insert_time)
                .unwrap();
        }
        writer.close().unwrap();
    }

    fn answers(db: &RangeStateDb, keys: std::ops::RangeInclusive<i64>) -> Vec<Option<Val>> {
        keys.map(|k| db.get_containing(k).unwrap()).collect()
    }

    #[test]
    fn test_get_containing() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        insert(&db, &[(1, 100, "wide", 0), (10, 20, "inner", 0), (10, 15, "narrow", 0)]);

        assert_eq!(db.get_containing(0).unwrap(), None);
        assert_eq!(db.get_containing(5).unwrap(), Some(Val::from("wide")));
        assert_eq!(db.get_containing(12).unwrap(), Some(Val::from("narrow")));
        assert_eq!(db.get_containing(18).unwrap(), Some(Val::from("inner")));
        assert_eq!(db.get_containing(50).unwrap(), Some(Val::from("wide")));
        assert_eq!(db.get_containing(101).unwrap(), None);
    }

    #[test]
    fn test_condense_merges_abutting_runs() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        insert(
            &db,
            &[
                (1, 10, "a", 0),
                (11, 20, "a", 0),
                (21, 30, "a", 0),
                (31, 40, "b", 0),
                (41, 50, "b", 500),
                (60, 70, "c", 0),
                (71, 80, "c", 0),
            ],
        );
        let before = answers(&db, 0..=85);

        assert_eq!(db.condense(100).unwrap(), 3);
        assert_eq!(db.count(), 4);
        assert_eq!(
            db.get_range_containing(15).unwrap().map(|(r, _)| r),
            Some(KeyRange::new(1, 30))
        );
        assert_eq!(answers(&db, 0..=85), before);
    }

    #[test]
    fn test_condense_skips_overlapped_runs() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        insert(
            &db,
            &[
                (1, 10, "a", 0),
                (5, 6, "x", 0),
                (11, 20, "a", 0),
                (21, 30, "a", 0),
                (25, 26, "y", 0),
            ],
        );
        let before = answers(&db, 0..=35);

        db.condense(100).unwrap();
        assert_eq!(answers(&db, 0..=35), before);
    }
}
