//! Read and write transactions
//!
//! A read transaction pins an immutable `Arc` snapshot of every table, so it
//! never observes later commits and never blocks a writer. A write
//! transaction keeps only its pending puts and deletions, laid over the
//! snapshot it started from; commit applies them to the published tables in
//! place. A table is copied at commit only while a reader still pins it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use super::errors::{EnvError, EnvResult};
use super::record::LogOp;
use super::{Env, MAX_KEY_LENGTH};

/// One named table: sorted byte keys to byte values
pub type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Iterator over `(key, value)` pairs in key order
pub type KvIter<'a> = Box<dyn DoubleEndedIterator<Item = (&'a [u8], &'a [u8])> + 'a>;

/// Called after a successful commit with the new commit id, while the
/// commit lock is still held
pub type CommitHook = Box<dyn FnOnce(u64) + Send>;

/// Pending changes to one table; `None` deletes the key
type Changes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

type ChangeIter<'a> = Box<dyn DoubleEndedIterator<Item = (&'a [u8], Option<&'a [u8]>)> + 'a>;

/// Published state of an environment
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvState {
    pub(crate) tables: BTreeMap<String, Arc<Table>>,
    pub(crate) commit_id: u64,
    pub(crate) data_size: u64,
}

impl EnvState {
    pub(crate) fn new(tables: BTreeMap<String, Table>, commit_id: u64) -> Self {
        let data_size = tables
            .values()
            .flat_map(|t| t.iter())
            .map(|(k, v)| entry_size(k, v))
            .sum();
        Self {
            tables: tables.into_iter().map(|(n, t)| (n, Arc::new(t))).collect(),
            commit_id,
            data_size,
        }
    }

    /// Applies one committed operation, copying the table only if a
    /// snapshot still shares it.
    pub(crate) fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Put { table, key, value } => {
                Arc::make_mut(self.tables.entry(table).or_default()).insert(key, value);
            }
            LogOp::Delete { table, key } => {
                if let Some(t) = self.tables.get_mut(&table) {
                    Arc::make_mut(t).remove(&key);
                }
            }
        }
    }
}

pub(crate) fn entry_size(key: &[u8], value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

/// Read access shared by read and write transactions
pub trait Txn {
    fn get(&self, table: &str, key: &[u8]) -> Option<&[u8]>;

    /// Entries between two bounds in key order; inverted bounds yield nothing.
    fn range<'a>(&'a self, table: &str, start: Bound<&[u8]>, end: Bound<&[u8]>) -> KvIter<'a>;

    /// Number of entries in a table.
    fn entries(&self, table: &str) -> usize;

    fn contains(&self, table: &str, key: &[u8]) -> bool {
        self.get(table, key).is_some()
    }

    /// All entries of a table in key order.
    fn iter<'a>(&'a self, table: &str) -> KvIter<'a> {
        self.range(table, Bound::Unbounded, Bound::Unbounded)
    }

    /// Entries whose key starts with `prefix`, in key order.
    fn prefix<'a>(&'a self, table: &str, prefix: &[u8]) -> KvIter<'a> {
        match prefix_successor(prefix) {
            Some(end) => self.range(table, Bound::Included(prefix), Bound::Excluded(end.as_slice())),
            None => self.range(table, Bound::Included(prefix), Bound::Unbounded),
        }
    }
}

fn table_range<'a>(table: Option<&'a Table>, start: Bound<&[u8]>, end: Bound<&[u8]>) -> KvIter<'a> {
    match table {
        Some(t) if valid_bounds(start, end) => Box::new(
            t.range::<[u8], _>((start, end))
                .map(|(k, v)| (k.as_slice(), v.as_slice())),
        ),
        _ => Box::new(std::iter::empty()),
    }
}

fn changes_range<'a>(changes: Option<&'a Changes>, start: Bound<&[u8]>, end: Bound<&[u8]>) -> ChangeIter<'a> {
    match changes {
        Some(c) if valid_bounds(start, end) => Box::new(
            c.range::<[u8], _>((start, end))
                .map(|(k, v)| (k.as_slice(), v.as_deref())),
        ),
        _ => Box::new(std::iter::empty()),
    }
}

fn valid_bounds(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    let (s, e) = match (start, end) {
        (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => (s, e),
        _ => return true,
    };
    match s.cmp(e) {
        Ordering::Less => true,
        Ordering::Equal => !(matches!(start, Bound::Excluded(_)) && matches!(end, Bound::Excluded(_))),
        Ordering::Greater => false,
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// A double-ended iterator that can look at its next item from either end
struct Ends<I: DoubleEndedIterator> {
    iter: I,
    front: Option<I::Item>,
    back: Option<I::Item>,
}

impl<I: DoubleEndedIterator> Ends<I> {
    fn new(iter: I) -> Self {
        Self {
            iter,
            front: None,
            back: None,
        }
    }

    fn peek_front(&mut self) -> Option<&I::Item> {
        if self.front.is_none() {
            self.front = self.iter.next().or_else(|| self.back.take());
        }
        self.front.as_ref()
    }

    fn peek_back(&mut self) -> Option<&I::Item> {
        if self.back.is_none() {
            self.back = self.iter.next_back().or_else(|| self.front.take());
        }
        self.back.as_ref()
    }

    fn take_front(&mut self) -> Option<I::Item> {
        self.peek_front();
        self.front.take()
    }

    fn take_back(&mut self) -> Option<I::Item> {
        self.peek_back();
        self.back.take()
    }
}

/// Snapshot entries with pending changes laid over them
struct Overlay<'a> {
    base: Ends<KvIter<'a>>,
    changes: Ends<ChangeIter<'a>>,
}

impl<'a> Iterator for Overlay<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let base = self.base.peek_front().map(|(k, _)| *k);
            let change = self.changes.peek_front().map(|(k, _)| *k);
            let order = match (base, change) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(b), Some(c)) => b.cmp(c),
            };
            if order == Ordering::Less {
                return self.base.take_front();
            }
            if order == Ordering::Equal {
                self.base.take_front();
            }
            if let Some((key, Some(value))) = self.changes.take_front() {
                return Some((key, value));
            }
        }
    }
}

impl<'a> DoubleEndedIterator for Overlay<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let base = self.base.peek_back().map(|(k, _)| *k);
            let change = self.changes.peek_back().map(|(k, _)| *k);
            let order = match (base, change) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (Some(b), Some(c)) => b.cmp(c),
            };
            if order == Ordering::Greater {
                return self.base.take_back();
            }
            if order == Ordering::Equal {
                self.base.take_back();
            }
            if let Some((key, Some(value))) = self.changes.take_back() {
                return Some((key, value));
            }
        }
    }
}

/// Point-in-time view of an environment
#[derive(Debug, Clone)]
pub struct ReadTxn {
    state: Arc<EnvState>,
}

impl ReadTxn {
    pub(crate) fn new(state: Arc<EnvState>) -> Self {
        Self { state }
    }

    /// Commit id this snapshot was taken at.
    pub fn commit_id(&self) -> u64 {
        self.state.commit_id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<EnvState> {
        &self.state
    }
}

impl Txn for ReadTxn {
    fn get(&self, table: &str, key: &[u8]) -> Option<&[u8]> {
        self.state.tables.get(table)?.get(key).map(Vec::as_slice)
    }

    fn range<'a>(&'a self, table: &str, start: Bound<&[u8]>, end: Bound<&[u8]>) -> KvIter<'a> {
        table_range(self.state.tables.get(table).map(|t| &**t), start, end)
    }

    fn entries(&self, table: &str) -> usize {
        self.state.tables.get(table).map_or(0, |t| t.len())
    }
}

/// The single open write transaction of an environment
pub struct WriteTxn {
    env: Arc<Env>,
    base: Arc<EnvState>,
    pending: BTreeMap<String, Changes>,
    data_size: u64,
    hooks: Vec<CommitHook>,
}

impl WriteTxn {
    pub(crate) fn new(env: Arc<Env>, base: Arc<EnvState>) -> Self {
        Self {
            env,
            data_size: base.data_size,
            base,
            pending: BTreeMap::new(),
            hooks: Vec::new(),
        }
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> EnvResult<()> {
        check_key(key)?;

        let previous = self.get(table, key).map_or(0, |v| entry_size(key, v));
        let size = self.data_size - previous + entry_size(key, value);
        self.check_size(size)?;

        self.changes_mut(table).insert(key.to_vec(), Some(value.to_vec()));
        self.data_size = size;
        Ok(())
    }

    /// Inserts a value only if the key is absent. Returns whether it was written.
    pub fn put_if_absent(&mut self, table: &str, key: &[u8], value: &[u8]) -> EnvResult<bool> {
        check_key(key)?;
        if self.contains(table, key) {
            return Ok(false);
        }
        self.put(table, key, value)?;
        Ok(true)
    }

    /// Removes a key. Returns whether it existed.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> EnvResult<bool> {
        let Some(size) = self.get(table, key).map(|v| entry_size(key, v)) else {
            return Ok(false);
        };

        if self.base_table(table).is_some_and(|t| t.contains_key(key)) {
            self.changes_mut(table).insert(key.to_vec(), None);
        } else if let Some(changes) = self.pending.get_mut(table) {
            // Written by this transaction only
            changes.remove(key);
        }
        self.data_size -= size;
        Ok(true)
    }

    /// Registers a hook to run after this transaction commits.
    pub fn on_commit(&mut self, hook: impl FnOnce(u64) + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Whether any change is pending.
    pub fn is_dirty(&self) -> bool {
        self.pending.values().any(|c| !c.is_empty())
    }

    /// Number of keys with a pending put or deletion.
    pub fn pending_ops(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Commits every pending change. Returns the new commit id.
    pub fn commit(self) -> EnvResult<u64> {
        let env = Arc::clone(&self.env);
        env.commit(self)
    }

    /// Releases the snapshot and turns the pending changes into log
    /// operations in table then key order.
    pub(crate) fn into_parts(self) -> TxnParts {
        let base_commit_id = self.base.commit_id;
        let ops = self
            .pending
            .into_iter()
            .flat_map(|(table, changes)| {
                changes.into_iter().map(move |(key, value)| match value {
                    Some(value) => LogOp::Put {
                        table: table.clone(),
                        key,
                        value,
                    },
                    None => LogOp::Delete {
                        table: table.clone(),
                        key,
                    },
                })
            })
            .collect();

        TxnParts {
            base_commit_id,
            data_size: self.data_size,
            ops,
            hooks: self.hooks,
        }
    }

    fn base_table(&self, table: &str) -> Option<&Table> {
        self.base.tables.get(table).map(|t| &**t)
    }

    fn changes_mut(&mut self, table: &str) -> &mut Changes {
        self.pending.entry(table.to_string()).or_default()
    }

    fn check_size(&self, size: u64) -> EnvResult<()> {
        let max = self.env.settings().max_store_size;
        if size > max && size > self.data_size {
            return Err(EnvError::MapFull { size, max });
        }
        Ok(())
    }
}

impl Txn for WriteTxn {
    fn get(&self, table: &str, key: &[u8]) -> Option<&[u8]> {
        match self.pending.get(table).and_then(|c| c.get(key)) {
            Some(change) => change.as_deref(),
            None => self.base_table(table)?.get(key).map(Vec::as_slice),
        }
    }

    fn range<'a>(&'a self, table: &str, start: Bound<&[u8]>, end: Bound<&[u8]>) -> KvIter<'a> {
        let base = table_range(self.base_table(table), start, end);
        match self.pending.get(table) {
            Some(changes) if !changes.is_empty() => Box::new(Overlay {
                base: Ends::new(base),
                changes: Ends::new(changes_range(Some(changes), start, end)),
            }),
            _ => base,
        }
    }

    fn entries(&self, table: &str) -> usize {
        let base = self.base_table(table);
        let mut count = base.map_or(0, BTreeMap::len);
        for (key, change) in self.pending.get(table).into_iter().flatten() {
            match (base.is_some_and(|t| t.contains_key(key)), change.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        count
    }
}

pub(crate) struct TxnParts {
    pub(crate) base_commit_id: u64,
    pub(crate) data_size: u64,
    pub(crate) ops: Vec<LogOp>,
    pub(crate) hooks: Vec<CommitHook>,
}

fn check_key(key: &[u8]) -> EnvResult<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(EnvError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LENGTH,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvSettings;
    use tempfile::TempDir;

    fn state_with(entries: &[(&[u8], &[u8])]) -> EnvState {
        let mut table = Table::new();
        for (k, v) in entries {
            table.insert(k.to_vec(), v.to_vec());
        }
        let mut tables = BTreeMap::new();
        tables.insert("db".to_string(), table);
        EnvState::new(tables, 1)
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_successor(&[]), None);
    }

    #[test]
    fn test_prefix_scan() {
        let txn = ReadTxn::new(Arc::new(state_with(&[
            (b"aa", b"1"),
            (b"ab", b"2"),
            (b"abc", b"3"),
            (b"b", b"4"),
        ])));

        let keys: Vec<_> = txn.prefix("db", b"ab").map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"ab".to_vec(), b"abc".to_vec()]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let txn = ReadTxn::new(Arc::new(state_with(&[(b"a", b"1"), (b"b", b"2")])));
        let count = txn
            .range("db", Bound::Included(b"z".as_slice()), Bound::Excluded(b"a".as_slice()))
            .count();
        assert_eq!(count, 0);

        let count = txn
            .range("db", Bound::Excluded(b"a".as_slice()), Bound::Excluded(b"a".as_slice()))
            .count();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reverse_iteration() {
        let txn = ReadTxn::new(Arc::new(state_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")])));
        let last = txn
            .range("db", Bound::Unbounded, Bound::Included(b"b".as_slice()))
            .next_back()
            .unwrap();
        assert_eq!(last.0, b"b");
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let txn = ReadTxn::new(Arc::new(EnvState::default()));
        assert!(txn.get("db", b"a").is_none());
        assert_eq!(txn.iter("db").count(), 0);
        assert_eq!(txn.entries("db"), 0);
    }

    #[test]
    fn test_data_size_counts_keys_and_values() {
        let state = state_with(&[(b"ab", b"123"), (b"c", b"")]);
        assert_eq!(state.data_size, 6);
    }

    fn keys(iter: KvIter<'_>) -> Vec<Vec<u8>> {
        iter.map(|(k, _)| k.to_vec()).collect()
    }

    /// Env holding `a b c d e`, plus an open write txn that rewrites `b`,
    /// deletes `c` and `e`, and adds `ba` and `f`
    fn overlaid(temp_dir: &TempDir, check: impl FnOnce(&WriteTxn)) {
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        for k in ["a", "b", "c", "d", "e"] {
            txn.put("db", k.as_bytes(), b"1").unwrap();
        }
        txn.commit().unwrap();

        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"b", b"2").unwrap();
        assert!(txn.delete("db", b"c").unwrap());
        assert!(txn.delete("db", b"e").unwrap());
        txn.put("db", b"ba", b"2").unwrap();
        txn.put("db", b"f", b"2").unwrap();
        txn.put("db", b"g", b"2").unwrap();
        assert!(txn.delete("db", b"g").unwrap());
        assert!(!txn.delete("db", b"zz").unwrap());
        check(&txn);
    }

    #[test]
    fn test_write_txn_reads_through_pending_changes() {
        let temp_dir = TempDir::new().unwrap();
        overlaid(&temp_dir, |txn| {
            assert_eq!(txn.get("db", b"a"), Some(b"1".as_slice()));
            assert_eq!(txn.get("db", b"b"), Some(b"2".as_slice()));
            assert!(txn.get("db", b"c").is_none());
            assert!(txn.get("db", b"g").is_none());
            assert_eq!(txn.entries("db"), 5);
            assert_eq!(txn.pending_ops(), 5);
            assert_eq!(
                keys(txn.iter("db")),
                vec![b"a".to_vec(), b"b".to_vec(), b"ba".to_vec(), b"d".to_vec(), b"f".to_vec()]
            );
            assert_eq!(keys(txn.prefix("db", b"b")), vec![b"b".to_vec(), b"ba".to_vec()]);
        });
    }

    #[test]
    fn test_write_txn_iterates_from_both_ends() {
        let temp_dir = TempDir::new().unwrap();
        overlaid(&temp_dir, |txn| {
            let reversed: Vec<_> = txn.iter("db").rev().map(|(k, _)| k.to_vec()).collect();
            assert_eq!(
                reversed,
                vec![b"f".to_vec(), b"d".to_vec(), b"ba".to_vec(), b"b".to_vec(), b"a".to_vec()]
            );

            let last = txn
                .range("db", Bound::Unbounded, Bound::Excluded(b"d".as_slice()))
                .next_back()
                .unwrap();
            assert_eq!(last, (b"ba".as_slice(), b"2".as_slice()));

            // Meeting in the middle yields every entry once
            let mut iter = txn.iter("db");
            let mut seen = Vec::new();
            while let Some((k, _)) = iter.next() {
                seen.push(k.to_vec());
                if let Some((k, _)) = iter.next_back() {
                    seen.push(k.to_vec());
                }
            }
            seen.sort();
            assert_eq!(seen.len(), 5);
            seen.dedup();
            assert_eq!(seen.len(), 5);
        });
    }

    #[test]
    fn test_write_txn_data_size_tracks_pending_changes() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"ab", b"123").unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"ab", b"1").unwrap();
        txn.put("db", b"c", b"").unwrap();
        assert!(txn.delete("db", b"c").unwrap());
        assert!(txn.is_dirty());
        txn.commit().unwrap();
        assert_eq!(env.data_size(), 3);
    }
}
