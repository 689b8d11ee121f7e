//! Sessions: intervals during which a key was active
//!
//! Key layout: `[key column][start][end]`. Records carry no value column.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::codec::sortable;
use crate::codec::{CodecResult, Val};
use crate::env::{Txn, WriteTxn};

use super::db::{Db, DATA_TABLE};
use super::errors::StoreResult;
use super::schema::{has_exact_prefix, join_value, split_value, Columns, Schema, SchemaInfo};

const FIELDS: &[&str] = &["key", "start", "end", "insertTime"];
const SUFFIX_LEN: usize = 2 * sortable::LONG_LEN;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionKey {
    pub key: Val,
    pub start: i64,
    pub end: i64,
}

impl SessionKey {
    pub fn new(key: impl Into<Val>, start: i64, end: i64) -> Self {
        Self {
            key: key.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, time: i64) -> bool {
        self.start <= time && time <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct SessionSchema {
    columns: Columns,
}

impl Schema for SessionSchema {
    type Key = SessionKey;
    type Value = ();

    fn from_info(info: &SchemaInfo) -> Self {
        Self {
            columns: Columns::new(info),
        }
    }

    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn write_key(&self, txn: &mut WriteTxn, key: &SessionKey) -> CodecResult<Vec<u8>> {
        let prefix = self.columns.key()?.write(txn, &key.key)?;
        Ok(sortable::append_longs(prefix, &[key.start, key.end]))
    }

    fn key_for_get(&self, txn: &dyn Txn, key: &SessionKey) -> CodecResult<Option<Vec<u8>>> {
        Ok(self
            .columns
            .key()?
            .to_buffer_for_get(txn, &key.key)?
            .map(|prefix| sortable::append_longs(prefix, &[key.start, key.end])))
    }

    fn read_key(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<SessionKey> {
        let (prefix, [start, end]) = sortable::split_longs::<2>(bytes)?;
        Ok(SessionKey {
            key: self.columns.key()?.read(txn, prefix)?,
            start,
            end,
        })
    }

    fn key_column_bytes<'k>(&self, key: &'k [u8]) -> CodecResult<&'k [u8]> {
        Ok(sortable::split_longs::<2>(key)?.0)
    }

    /// A session ages by its end.
    fn record_time(&self, key: &[u8]) -> CodecResult<Option<i64>> {
        let (_, [_, end]) = sortable::split_longs::<2>(key)?;
        Ok(Some(end))
    }

    fn write_value(&self, _txn: &mut WriteTxn, _value: &()) -> CodecResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn read_value(&self, _txn: &dyn Txn, _bytes: &[u8]) -> CodecResult<()> {
        Ok(())
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn is_key_field(&self, field: &str) -> bool {
        matches!(field, "key" | "start" | "end")
    }

    fn key_field(&self, key: &SessionKey, field: &str) -> Option<Val> {
        match field {
            "key" => Some(key.key.clone()),
            "start" => Some(Val::Long(key.start)),
            "end" => Some(Val::Long(key.end)),
            _ => None,
        }
    }

    fn value_field(&self, _value: &(), _field: &str) -> Option<Val> {
        None
    }

    /// Merges overlapping sessions of one key that ended before `cutoff`.
    /// The union of a key's sessions is unchanged.
    fn condense(db: &Db<Self>, cutoff: i64) -> StoreResult<u64> {
        let mut writer = db.writer()?;
        let read = db.env().begin_read();

        let mut by_prefix: BTreeMap<&[u8], Vec<Session>> = BTreeMap::new();
        for (key, stored) in read.iter(DATA_TABLE) {
            let (prefix, [start, end]) = sortable::split_longs::<2>(key)?;
            let (insert_time, _) = split_value(stored)?;
            by_prefix.entry(prefix).or_default().push(Session {
                start,
                end,
                insert_time,
            });
        }

        let mut removed = 0;
        for (prefix, sessions) in by_prefix {
            let mut runs: Vec<Vec<Session>> = Vec::new();
            for session in sessions {
                match runs.last_mut() {
                    Some(run) if mergeable(run, &session, cutoff) => run.push(session),
                    _ => runs.push(vec![session]),
                }
            }

            for run in runs.iter().filter(|run| run.len() > 1) {
                let txn = writer.txn()?;
                for session in run {
                    txn.delete(DATA_TABLE, &session_key(prefix, session.start, session.end))?;
                }
                let start = run[0].start;
                let end = run.iter().map(|s| s.end).max().unwrap_or(run[0].end);
                let insert_time = run.iter().map(|s| s.insert_time).max().unwrap_or(0);
                txn.put(
                    DATA_TABLE,
                    &session_key(prefix, start, end),
                    &join_value(insert_time, &[]),
                )?;
                writer.try_commit()?;
                removed += (run.len() - 1) as u64;
            }
        }

        writer.close()?;
        Ok(removed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    start: i64,
    end: i64,
    insert_time: i64,
}

/// Sessions arrive ordered by start.
fn mergeable(run: &[Session], next: &Session, cutoff: i64) -> bool {
    let run_end = run.iter().map(|s| s.end).max().unwrap_or(i64::MIN);
    next.start <= run_end && run_end < cutoff && next.end < cutoff
}

fn session_key(prefix: &[u8], start: i64, end: i64) -> Vec<u8> {
    sortable::append_longs(prefix.to_vec(), &[start, end])
}

pub type SessionDb = Db<SessionSchema>;

impl Db<SessionSchema> {
    /// Whether some session of `key` covers `time`.
    pub fn in_session(&self, key: &Val, time: i64) -> StoreResult<bool> {
        Ok(self.session_at(key, time)?.is_some())
    }

    /// A session of `key` covering `time`.
    pub fn session_at(&self, key: &Val, time: i64) -> StoreResult<Option<SessionKey>> {
        let read = self.env().begin_read();
        let Some(prefix) = self.schema().columns().key()?.to_buffer_for_get(&read, key)? else {
            return Ok(None);
        };
        let end = session_key(&prefix, time, i64::MAX);

        for (k, _) in read
            .range(DATA_TABLE, Bound::Included(prefix.as_slice()), Bound::Included(end.as_slice()))
            .rev()
        {
            if !has_exact_prefix(k, &prefix, SUFFIX_LEN) {
                continue;
            }
            let (_, [start, end]) = sortable::split_longs::<2>(k)?;
            if start <= time && time <= end {
                return Ok(Some(SessionKey {
                    key: key.clone(),
                    start,
                    end,
                }));
            }
        }
        Ok(None)
    }
}
