//! Identity of a shipped shard archive

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::lookup::hash::hex;

use super::errors::{ShardError, ShardResult};

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub create_time_ms: i64,
    pub owner_id: String,
    /// Hex SHA-256 of the archive
    pub content_hash: String,
}

impl FileDescriptor {
    /// Describes the archive at `path`, hashing its content.
    pub fn for_file(path: &Path, create_time_ms: i64, owner_id: impl Into<String>) -> ShardResult<Self> {
        Ok(Self {
            create_time_ms,
            owner_id: owner_id.into(),
            content_hash: hash_file(path)?,
        })
    }

    /// Fails unless the archive at `path` has the described content.
    pub fn verify(&self, path: &Path) -> ShardResult<()> {
        let found = hash_file(path)?;
        if found != self.content_hash {
            return Err(ShardError::HashMismatch {
                path: path.display().to_string(),
                expected: self.content_hash.clone(),
                found,
            });
        }
        Ok(())
    }

    /// File name stem unique per shard: `<create time>_<owner>`.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.create_time_ms, self.owner_id)
    }
}

/// Hex SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> ShardResult<String> {
    let file = File::open(path).map_err(|e| ShardError::io_error_at_path(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| ShardError::io_error_at_path(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_and_verify() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.tar.gz");
        std::fs::write(&path, b"abc").unwrap();

        let descriptor = FileDescriptor::for_file(&path, 1_000, "batch-1").unwrap();
        assert_eq!(
            descriptor.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        descriptor.verify(&path).unwrap();

        std::fs::write(&path, b"abd").unwrap();
        let err = descriptor.verify(&path).unwrap_err();
        assert_eq!(err.code(), "PLANB_SHARD_HASH_MISMATCH");
    }

    #[test]
    fn test_json_form() {
        let descriptor = FileDescriptor {
            create_time_ms: 5,
            owner_id: "b".to_string(),
            content_hash: "00".to_string(),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["createTimeMs"], 5);
        assert_eq!(json["ownerId"], "b");
        assert_eq!(descriptor.stem(), "5_b");
    }
}
