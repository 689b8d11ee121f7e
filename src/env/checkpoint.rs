//! Checkpoint file: every table of an environment at one commit
//!
//! ```text
//! +------------------+
//! | Magic            | "PLBCHK01"
//! +------------------+
//! | Commit Id        | (u64 LE)
//! +------------------+
//! | Table Count      | (u32 LE)
//! +------------------+
//! | Tables           | name (u16 LE len + utf8) | entry count (u64 LE)
//! |                  | entries: key, value (u32 LE len + bytes each)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Written to `data.chk.tmp`, fsynced, then renamed over `data.chk` and the
//! directory fsynced, so a reader only ever sees a complete checkpoint.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use super::checksum::compute_checksum;
use super::errors::{EnvError, EnvResult};
use super::record::{read_bytes, read_name, read_u32, read_u64, write_bytes, write_name};
use super::txn::Table;

pub const CHECKPOINT_FILE: &str = "data.chk";
const CHECKPOINT_TMP_FILE: &str = "data.chk.tmp";
const MAGIC: &[u8; 8] = b"PLBCHK01";

/// Tables restored from a checkpoint
#[derive(Debug, Default)]
pub struct Checkpoint {
    pub commit_id: u64,
    pub tables: BTreeMap<String, Table>,
}

/// Writes a checkpoint of `tables` at `commit_id` into `dir`.
pub fn write_checkpoint<'a, I>(dir: &Path, commit_id: u64, tables: I) -> EnvResult<u64>
where
    I: IntoIterator<Item = (&'a String, &'a Table)>,
{
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&commit_id.to_le_bytes());

    let tables: Vec<_> = tables.into_iter().collect();
    buf.extend_from_slice(&(tables.len() as u32).to_le_bytes());
    for (name, table) in tables {
        write_name(&mut buf, name);
        buf.extend_from_slice(&(table.len() as u64).to_le_bytes());
        for (key, value) in table {
            write_bytes(&mut buf, key);
            write_bytes(&mut buf, value);
        }
    }

    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    let tmp_path = dir.join(CHECKPOINT_TMP_FILE);
    let final_path = dir.join(CHECKPOINT_FILE);

    let mut file = File::create(&tmp_path).map_err(|e| EnvError::io_error_at_path(&tmp_path, e))?;
    file.write_all(&buf)
        .and_then(|_| file.sync_all())
        .map_err(|e| EnvError::io_error_at_path(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, &final_path).map_err(|e| {
        EnvError::io_error(
            format!(
                "Failed to move checkpoint into place: {} -> {}",
                tmp_path.display(),
                final_path.display()
            ),
            e,
        )
    })?;

    fsync_dir(dir)?;
    Ok(buf.len() as u64)
}

/// Reads the checkpoint in `dir`, if one exists.
pub fn read_checkpoint(dir: &Path) -> EnvResult<Option<Checkpoint>> {
    let path = dir.join(CHECKPOINT_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EnvError::io_error_at_path(&path, e)),
    };

    if data.len() < MAGIC.len() + 8 + 4 + 4 || &data[..MAGIC.len()] != MAGIC {
        return Err(EnvError::corruption(format!(
            "Not a checkpoint file: {}",
            path.display()
        )));
    }

    let checksum_offset = data.len() - 4;
    let stored = u32::from_le_bytes([
        data[checksum_offset],
        data[checksum_offset + 1],
        data[checksum_offset + 2],
        data[checksum_offset + 3],
    ]);
    let computed = compute_checksum(&data[..checksum_offset]);
    if stored != computed {
        return Err(EnvError::corruption(format!(
            "Checkpoint checksum mismatch: computed {:08x}, stored {:08x} ({})",
            computed,
            stored,
            path.display()
        )));
    }

    parse_body(&data[MAGIC.len()..checksum_offset])
        .map(Some)
        .map_err(|e| EnvError::corruption(format!("Malformed checkpoint {}: {}", path.display(), e)))
}

fn parse_body(body: &[u8]) -> io::Result<Checkpoint> {
    let mut cursor = Cursor::new(body);
    let commit_id = read_u64(&mut cursor)?;
    let table_count = read_u32(&mut cursor)?;

    let mut tables = BTreeMap::new();
    for _ in 0..table_count {
        let name = read_name(&mut cursor)?;
        let entries = read_u64(&mut cursor)?;
        let mut table = Table::new();
        for _ in 0..entries {
            let key = read_bytes(&mut cursor)?;
            let value = read_bytes(&mut cursor)?;
            table.insert(key, value);
        }
        tables.insert(name, table);
    }

    let mut rest = Vec::new();
    cursor.read_to_end(&mut rest)?;
    if !rest.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} trailing bytes", rest.len()),
        ));
    }

    Ok(Checkpoint { commit_id, tables })
}

/// fsync a directory so a rename inside it is durable.
pub fn fsync_dir(path: &Path) -> EnvResult<()> {
    let dir = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| EnvError::io_error_at_path(path, e))?;

    dir.sync_all().map_err(|e| {
        EnvError::io_error(format!("fsync directory failed: {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tables() -> BTreeMap<String, Table> {
        let mut db = Table::new();
        db.insert(b"a".to_vec(), b"1".to_vec());
        db.insert(b"b".to_vec(), b"2".to_vec());
        let mut uid = Table::new();
        uid.insert(vec![0, 0, 0, 1], b"long value".to_vec());

        let mut tables = BTreeMap::new();
        tables.insert("db".to_string(), db);
        tables.insert("value_uid_v".to_string(), uid);
        tables
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let tables = sample_tables();

        write_checkpoint(temp_dir.path(), 42, &tables).unwrap();
        let checkpoint = read_checkpoint(temp_dir.path()).unwrap().unwrap();

        assert_eq!(checkpoint.commit_id, 42);
        assert_eq!(checkpoint.tables, tables);
        assert!(!temp_dir.path().join(CHECKPOINT_TMP_FILE).exists());
    }

    #[test]
    fn test_missing_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_checkpoint(temp_dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        write_checkpoint(temp_dir.path(), 1, &sample_tables()).unwrap();

        let path = temp_dir.path().join(CHECKPOINT_FILE);
        let mut contents = fs::read(&path).unwrap();
        let mid = contents.len() / 2;
        contents[mid] ^= 0xFF;
        fs::write(&path, contents).unwrap();

        let err = read_checkpoint(temp_dir.path()).unwrap_err();
        assert!(err.is_fatal());
    }
}
