//! Environment: one physical store directory
//!
//! An environment holds named tables of sorted byte keys and provides:
//! - point-in-time read transactions that never block and are never blocked
//! - a single write transaction at a time, gated by a [`lock::WritePermit`]
//! - durability on commit via an fsynced commit log
//!
//! On disk:
//! - `commit.log`: one checksummed record per commit since the last checkpoint
//! - `data.chk`: every table as of the last checkpoint
//!
//! Open loads the checkpoint and replays newer commits. A torn final commit
//! is discarded; any other damage is fatal corruption.
//!
//! There is at most one `Env` per directory per process; opening a directory
//! that is already open returns the existing instance.

pub mod checkpoint;
pub mod checksum;
pub mod errors;
pub(crate) mod lock;
pub mod log;
pub mod record;
pub mod txn;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::observability::{metrics, Event};

pub use errors::{EnvError, EnvResult, Severity};
pub use txn::{prefix_successor, CommitHook, KvIter, ReadTxn, Table, Txn, WriteTxn};

use checkpoint::{read_checkpoint, write_checkpoint, CHECKPOINT_FILE};
use lock::{WriteGate, WritePermit};
use log::{replay, CommitLog};
use record::{CommitRecord, LogOp};
use txn::EnvState;

/// Longest key any table accepts
pub const MAX_KEY_LENGTH: usize = 511;

/// Commit log size that triggers a checkpoint after a commit
pub const CHECKPOINT_LOG_BYTES: u64 = 64 * 1024 * 1024;

pub const COMMIT_LOG_FILE: &str = "commit.log";

const DEFAULT_MAX_STORE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Options for opening an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSettings {
    /// Upper bound on the summed size of every key and value
    pub max_store_size: u64,
    pub read_only: bool,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            max_store_size: DEFAULT_MAX_STORE_SIZE,
            read_only: false,
        }
    }
}

impl EnvSettings {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_max_store_size(max_store_size: u64) -> Self {
        Self {
            max_store_size,
            ..Self::default()
        }
    }
}

/// Entry count of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableStat {
    pub name: String,
    pub entries: usize,
}

/// Summary of an environment for inspection
#[derive(Debug, Clone, Serialize)]
pub struct EnvStat {
    pub path: PathBuf,
    pub commit_id: u64,
    pub data_size: u64,
    pub log_size: u64,
    pub tables: Vec<TableStat>,
}

pub struct Env {
    path: PathBuf,
    settings: EnvSettings,
    state: RwLock<Arc<EnvState>>,
    /// Commit lock. `None` for read-only environments.
    log: Mutex<Option<CommitLog>>,
    gate: Arc<WriteGate>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("commit_id", &self.commit_id())
            .finish()
    }
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<Env>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<Env>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Env {
    /// Opens the environment in `dir`, creating it unless read-only.
    ///
    /// Returns the already-open instance when this process has one.
    pub fn open(dir: &Path, settings: EnvSettings) -> EnvResult<Arc<Env>> {
        if !settings.read_only {
            fs::create_dir_all(dir).map_err(|e| EnvError::io_error_at_path(dir, e))?;
        }
        let path = fs::canonicalize(dir).map_err(|e| EnvError::io_error_at_path(dir, e))?;

        let mut open = registry().lock();
        open.retain(|_, env| env.strong_count() > 0);

        if let Some(existing) = open.get(&path).and_then(Weak::upgrade) {
            if existing.settings.read_only && !settings.read_only {
                return Err(EnvError::AlreadyOpenReadOnly {
                    path: path.display().to_string(),
                });
            }
            return Ok(existing);
        }

        let env = Arc::new(Self::recover(path.clone(), settings)?);
        open.insert(path, Arc::downgrade(&env));
        Ok(env)
    }

    fn recover(path: PathBuf, settings: EnvSettings) -> EnvResult<Self> {
        let (mut tables, checkpoint_id) = match read_checkpoint(&path)? {
            Some(checkpoint) => (checkpoint.tables, checkpoint.commit_id),
            None => (BTreeMap::new(), 0),
        };

        let log_path = path.join(COMMIT_LOG_FILE);
        let replay = replay(&log_path)?;

        let mut commit_id = checkpoint_id;
        let mut replayed = 0usize;
        for record in replay.records {
            if record.commit_id <= checkpoint_id {
                continue;
            }
            if record.commit_id != commit_id + 1 {
                return Err(EnvError::corruption(format!(
                    "Commit log gap in {}: expected commit {}, found {}",
                    log_path.display(),
                    commit_id + 1,
                    record.commit_id
                )));
            }
            for op in record.ops {
                apply(&mut tables, op);
            }
            commit_id = record.commit_id;
            replayed += 1;
        }

        let log = if settings.read_only {
            None
        } else {
            let mut log = CommitLog::open(&log_path)?;
            if replay.torn {
                warn!(
                    event = %Event::EnvTornCommit,
                    path = %log_path.display(),
                    valid_len = replay.valid_len,
                    "Discarding torn commit at end of log"
                );
                log.truncate_to(replay.valid_len)?;
            }
            Some(log)
        };

        let state = EnvState::new(tables, commit_id);
        info!(
            event = %Event::EnvOpen,
            path = %path.display(),
            commit_id,
            replayed,
            data_size = state.data_size,
            read_only = settings.read_only,
            "Environment opened"
        );

        Ok(Self {
            path,
            settings,
            state: RwLock::new(Arc::new(state)),
            log: Mutex::new(log),
            gate: Arc::new(WriteGate::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    pub fn is_read_only(&self) -> bool {
        self.settings.read_only
    }

    /// Id of the latest commit.
    pub fn commit_id(&self) -> u64 {
        self.state.read().commit_id
    }

    /// Summed size of every key and value.
    pub fn data_size(&self) -> u64 {
        self.state.read().data_size
    }

    /// Starts a read transaction on the latest committed state.
    pub fn begin_read(&self) -> ReadTxn {
        ReadTxn::new(Arc::clone(&self.state.read()))
    }

    pub(crate) fn write_gate(&self) -> &Arc<WriteGate> {
        &self.gate
    }

    /// Starts the write transaction that `permit` entitles its holder to.
    pub(crate) fn begin_write(self: &Arc<Self>, permit: &WritePermit) -> EnvResult<WriteTxn> {
        if self.settings.read_only {
            return Err(self.read_only_error());
        }
        debug_assert!(permit.belongs_to(&self.gate));
        let base = Arc::clone(&self.state.read());
        Ok(WriteTxn::new(Arc::clone(self), base))
    }

    pub(crate) fn commit(&self, txn: WriteTxn) -> EnvResult<u64> {
        let parts = txn.into_parts();

        let mut guard = self.log.lock();
        let Some(log) = guard.as_mut() else {
            return Err(self.read_only_error());
        };

        let current = self.commit_id();
        if parts.ops.is_empty() {
            for hook in parts.hooks {
                hook(current);
            }
            return Ok(current);
        }

        if parts.base_commit_id != current {
            return Err(EnvError::corruption(format!(
                "Write transaction began at commit {} but {} is at commit {}",
                parts.base_commit_id,
                self.path.display(),
                current
            )));
        }

        let commit_id = current + 1;
        let op_count = parts.ops.len();
        let record = CommitRecord {
            commit_id,
            ops: parts.ops,
        };
        let bytes = log.append(&record)?;

        {
            // Copies tables only while a reader still pins them
            let mut published = self.state.write();
            let state = Arc::make_mut(&mut published);
            for op in record.ops {
                state.apply(op);
            }
            state.commit_id = commit_id;
            state.data_size = parts.data_size;
        }

        metrics().record_commit(bytes);
        debug!(
            event = %Event::Commit,
            path = %self.path.display(),
            commit_id,
            ops = op_count,
            bytes,
            "Committed"
        );

        for hook in parts.hooks {
            hook(commit_id);
        }

        if log.size() > CHECKPOINT_LOG_BYTES {
            if let Err(e) = self.checkpoint(log) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Checkpoint after commit failed; commit log retained"
                );
            }
        }

        Ok(commit_id)
    }

    /// Writes a checkpoint and empties the commit log.
    ///
    /// Leaves the directory holding a single up-to-date checkpoint, which is
    /// the form shard archives are built from.
    pub fn compact(&self) -> EnvResult<()> {
        let mut guard = self.log.lock();
        let Some(log) = guard.as_mut() else {
            return Err(self.read_only_error());
        };
        if log.size() == 0 && self.path.join(CHECKPOINT_FILE).exists() {
            return Ok(());
        }
        self.checkpoint(log)
    }

    /// Caller holds the commit lock.
    fn checkpoint(&self, log: &mut CommitLog) -> EnvResult<()> {
        let state = Arc::clone(&self.state.read());
        let bytes = write_checkpoint(
            &self.path,
            state.commit_id,
            state.tables.iter().map(|(name, table)| (name, &**table)),
        )?;
        log.truncate()?;

        metrics().increment_checkpoints();
        info!(
            event = %Event::Checkpoint,
            path = %self.path.display(),
            commit_id = state.commit_id,
            bytes,
            "Checkpoint complete"
        );
        Ok(())
    }

    pub fn stat(&self) -> EnvStat {
        let state = Arc::clone(&self.state.read());
        let log_size = self.log.lock().as_ref().map_or_else(
            || {
                fs::metadata(self.path.join(COMMIT_LOG_FILE))
                    .map(|m| m.len())
                    .unwrap_or(0)
            },
            CommitLog::size,
        );

        EnvStat {
            path: self.path.clone(),
            commit_id: state.commit_id,
            data_size: state.data_size,
            log_size,
            tables: state
                .tables
                .iter()
                .map(|(name, table)| TableStat {
                    name: name.clone(),
                    entries: table.len(),
                })
                .collect(),
        }
    }

    fn read_only_error(&self) -> EnvError {
        EnvError::ReadOnly {
            path: self.path.display().to_string(),
        }
    }
}

fn apply(tables: &mut BTreeMap<String, Table>, op: LogOp) {
    match op {
        LogOp::Put { table, key, value } => {
            tables.entry(table).or_default().insert(key, value);
        }
        LogOp::Delete { table, key } => {
            if let Some(t) = tables.get_mut(&table) {
                t.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(env: &Arc<Env>, entries: &[(&str, &str)]) -> u64 {
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        for (k, v) in entries {
            txn.put("db", k.as_bytes(), v.as_bytes()).unwrap();
        }
        txn.commit().unwrap()
    }

    #[test]
    fn test_open_returns_same_instance() {
        let temp_dir = TempDir::new().unwrap();
        let a = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let b = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_commits_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
            write(&env, &[("a", "1"), ("b", "2")]);
            write(&env, &[("c", "3")]);
        }

        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let txn = env.begin_read();
        assert_eq!(txn.get("db", b"a"), Some(b"1".as_slice()));
        assert_eq!(txn.get("db", b"c"), Some(b"3".as_slice()));
        assert_eq!(env.commit_id(), 2);
    }

    #[test]
    fn test_reopen_after_compact() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
            write(&env, &[("a", "1")]);
            env.compact().unwrap();
            write(&env, &[("b", "2")]);
            assert!(env.stat().log_size > 0);
        }

        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let txn = env.begin_read();
        assert_eq!(txn.entries("db"), 2);
        assert_eq!(env.commit_id(), 2);
    }

    #[test]
    fn test_snapshot_isolation() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        write(&env, &[("a", "1")]);

        let before = env.begin_read();
        write(&env, &[("a", "2"), ("b", "3")]);

        assert_eq!(before.get("db", b"a"), Some(b"1".as_slice()));
        assert!(before.get("db", b"b").is_none());
        assert_eq!(env.begin_read().get("db", b"a"), Some(b"2".as_slice()));
    }

    fn table_ptr(env: &Env, name: &str) -> *const Table {
        Arc::as_ptr(&env.state.read().tables[name])
    }

    #[test]
    fn test_small_commit_updates_large_table_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        for i in 0u32..50_000 {
            txn.put("db", &i.to_be_bytes(), b"v").unwrap();
        }
        txn.commit().unwrap();

        let table = table_ptr(&env, "db");
        for i in 0u32..200 {
            let mut txn = env.begin_write(&permit).unwrap();
            txn.put("db", &(1_000_000 + i).to_be_bytes(), b"w").unwrap();
            assert!(txn.delete("db", &i.to_be_bytes()).unwrap());
            txn.commit().unwrap();
        }

        // No reader pinned the table, so no commit copied it
        assert_eq!(table_ptr(&env, "db"), table);
        assert_eq!(env.begin_read().entries("db"), 50_000);
        assert_eq!(env.commit_id(), 201);
    }

    #[test]
    fn test_commit_copies_only_pinned_tables() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"a", b"1").unwrap();
        txn.put("other", b"x", b"1").unwrap();
        txn.commit().unwrap();

        let snapshot = env.begin_read();
        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"a", b"2").unwrap();
        txn.commit().unwrap();

        let state = Arc::clone(&env.state.read());
        assert!(!Arc::ptr_eq(&state.tables["db"], &snapshot.state().tables["db"]));
        assert!(Arc::ptr_eq(&state.tables["other"], &snapshot.state().tables["other"]));
        assert_eq!(snapshot.get("db", b"a"), Some(b"1".as_slice()));
    }

    #[test]
    fn test_replay_matches_in_place_commits() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
            write(&env, &[("a", "1"), ("b", "2"), ("c", "3")]);
            let permit = env.write_gate().acquire().unwrap();
            let mut txn = env.begin_write(&permit).unwrap();
            txn.delete("db", b"b").unwrap();
            txn.put("db", b"a", b"9").unwrap();
            txn.put("db", b"d", b"4").unwrap();
            txn.delete("db", b"d").unwrap();
            txn.commit().unwrap();
        }

        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let read = env.begin_read();
        let entries: Vec<_> = read.iter("db").map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(
            entries,
            vec![(b"a".to_vec(), b"9".to_vec()), (b"c".to_vec(), b"3".to_vec())]
        );
        assert_eq!(env.data_size(), 4);
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        txn.put("db", b"a", b"1").unwrap();

        assert_eq!(txn.get("db", b"a"), Some(b"1".as_slice()));
        assert!(env.begin_read().get("db", b"a").is_none());

        drop(txn);
        assert!(env.begin_read().get("db", b"a").is_none());
    }

    #[test]
    fn test_key_too_long() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();

        txn.put("db", &[1u8; MAX_KEY_LENGTH], b"ok").unwrap();
        let err = txn.put("db", &[1u8; MAX_KEY_LENGTH + 1], b"x").unwrap_err();
        assert!(matches!(err, EnvError::KeyTooLong { len: 512, max: 511 }));
    }

    #[test]
    fn test_map_full() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::with_max_store_size(10)).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();

        txn.put("db", b"k", b"12345678").unwrap();
        let err = txn.put("db", b"j", b"12").unwrap_err();
        assert_eq!(err.code(), "PLANB_ENV_MAP_FULL");

        // Shrinking is always allowed
        txn.put("db", b"k", b"1").unwrap();
        assert!(txn.delete("db", b"k").unwrap());
    }

    #[test]
    fn test_torn_commit_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
            write(&env, &[("a", "1")]);
        }

        let log_path = temp_dir.path().join(COMMIT_LOG_FILE);
        let mut partial = CommitRecord {
            commit_id: 2,
            ops: vec![LogOp::Put {
                table: "db".to_string(),
                key: b"b".to_vec(),
                value: b"2".to_vec(),
            }],
        }
        .serialize();
        partial.truncate(partial.len() - 2);
        let mut contents = fs::read(&log_path).unwrap();
        let good_len = contents.len() as u64;
        contents.extend_from_slice(&partial);
        fs::write(&log_path, contents).unwrap();

        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        assert_eq!(env.commit_id(), 1);
        assert!(env.begin_read().get("db", b"b").is_none());
        assert_eq!(fs::metadata(&log_path).unwrap().len(), good_len);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
            write(&env, &[("a", "1")]);
        }

        let env = Env::open(temp_dir.path(), EnvSettings::read_only()).unwrap();
        assert_eq!(env.begin_read().get("db", b"a"), Some(b"1".as_slice()));

        let permit = env.write_gate().acquire().unwrap();
        assert!(matches!(
            env.begin_write(&permit),
            Err(EnvError::ReadOnly { .. })
        ));
        assert!(matches!(env.compact(), Err(EnvError::ReadOnly { .. })));

        let err = Env::open(temp_dir.path(), EnvSettings::default()).unwrap_err();
        assert!(matches!(err, EnvError::AlreadyOpenReadOnly { .. }));
    }

    #[test]
    fn test_commit_hooks_run_with_commit_id() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        txn.put("db", b"a", b"1").unwrap();
        txn.on_commit(move |id| *sink.lock() = Some(id));
        let id = txn.commit().unwrap();

        assert_eq!(*seen.lock(), Some(id));
    }

    #[test]
    fn test_stat() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        write(&env, &[("ab", "123")]);

        let stat = env.stat();
        assert_eq!(stat.commit_id, 1);
        assert_eq!(stat.data_size, 5);
        assert_eq!(stat.tables.len(), 1);
        assert_eq!(stat.tables[0].entries, 1);
    }
}
