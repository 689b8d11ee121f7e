//! Hash lookup: byte strings to content-hash surrogates
//!
//! A surrogate is the first `hash_len` bytes of the SHA-256 digest followed
//! by a 2-byte big-endian clash sequence. One table, `<name>_hash`, maps
//! surrogate -> raw bytes.
//!
//! Clash handling:
//! - Every lookup compares the stored raw bytes, never the digest alone
//! - The first string with a given digest takes sequence 0
//! - A different string with the same digest takes the highest sequence in
//!   use plus one, so sequences of live entries are never handed out twice
//! - Running out of sequences is an error; two strings never share a surrogate

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::codec::errors::{CodecError, CodecResult};
use crate::env::{Txn, WriteTxn};
use crate::observability::{metrics, Event};

use crate::codec::HashLength;

pub const SEQ_LEN: usize = 2;

#[derive(Debug, Clone)]
pub struct HashLookupDb {
    table: String,
    hash_len: usize,
}

impl HashLookupDb {
    pub fn new(name: &str, hash_length: HashLength) -> Self {
        Self::with_hash_len(name, hash_length.bytes())
    }

    /// Hash lookup with an arbitrary digest width (1..=32 bytes).
    pub fn with_hash_len(name: &str, hash_len: usize) -> Self {
        Self {
            table: format!("{}_hash", name),
            hash_len: hash_len.clamp(1, 32),
        }
    }

    /// Width in bytes of a surrogate.
    pub fn surrogate_len(&self) -> usize {
        self.hash_len + SEQ_LEN
    }

    fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        Sha256::digest(bytes)[..self.hash_len].to_vec()
    }

    /// Returns the surrogate of `bytes`, assigning one if it is new.
    pub fn put(&self, txn: &mut WriteTxn, bytes: &[u8]) -> CodecResult<Vec<u8>> {
        let hash = self.digest(bytes);

        let mut max_seq = None;
        for (surrogate, stored) in txn.prefix(&self.table, &hash) {
            if stored == bytes {
                return Ok(surrogate.to_vec());
            }
            let seq = self.sequence(surrogate)?;
            max_seq = max_seq.max(Some(seq));
        }

        let seq = match max_seq {
            None => 0,
            Some(max) => max.checked_add(1).ok_or_else(|| CodecError::HashClashExhausted {
                table: self.table.clone(),
                hash: hex(&hash),
            })?,
        };

        let mut surrogate = hash;
        surrogate.extend_from_slice(&seq.to_be_bytes());
        txn.put(&self.table, &surrogate, bytes)?;
        metrics().increment_lookups_created();

        if seq > 0 {
            let table = self.table.clone();
            let hash = hex(&surrogate[..self.hash_len]);
            txn.on_commit(move |commit_id| {
                metrics().increment_hash_clashes();
                warn!(
                    event = %Event::HashClash,
                    table = %table,
                    hash = %hash,
                    seq,
                    commit_id,
                    "Hash clash resolved with new sequence"
                );
            });
        }

        Ok(surrogate)
    }

    /// Returns the surrogate of `bytes` without assigning one.
    pub fn get(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Option<Vec<u8>>> {
        let hash = self.digest(bytes);
        Ok(txn
            .prefix(&self.table, &hash)
            .find(|(_, stored)| *stored == bytes)
            .map(|(surrogate, _)| surrogate.to_vec()))
    }

    /// Returns the bytes a surrogate stands for.
    pub fn get_value<'t>(&self, txn: &'t dyn Txn, surrogate: &[u8]) -> CodecResult<&'t [u8]> {
        txn.get(&self.table, surrogate)
            .ok_or_else(|| CodecError::MissingLookup {
                table: self.table.clone(),
                surrogate: hex(surrogate),
            })
    }

    pub fn len(&self, txn: &dyn Txn) -> usize {
        txn.entries(&self.table)
    }

    /// Every live surrogate, in order.
    pub fn surrogates(&self, txn: &dyn Txn) -> Vec<Vec<u8>> {
        txn.iter(&self.table).map(|(k, _)| k.to_vec()).collect()
    }

    /// Removes every entry whose surrogate is not in `used`. Returns the count removed.
    pub fn delete_unused(&self, txn: &mut WriteTxn, used: &HashSet<Vec<u8>>) -> CodecResult<u64> {
        let unused: Vec<Vec<u8>> = txn
            .iter(&self.table)
            .filter(|(k, _)| !used.contains(*k))
            .map(|(k, _)| k.to_vec())
            .collect();

        for surrogate in &unused {
            txn.delete(&self.table, surrogate)?;
        }

        if !unused.is_empty() {
            debug!(table = %self.table, removed = unused.len(), "Removed unused hash lookups");
        }
        Ok(unused.len() as u64)
    }

    fn sequence(&self, surrogate: &[u8]) -> CodecResult<u16> {
        let seq: [u8; SEQ_LEN] = surrogate
            .get(self.hash_len..)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                CodecError::decode(
                    "hash surrogate",
                    format!("{} bytes in {}", surrogate.len(), self.table),
                )
            })?;
        Ok(u16::from_be_bytes(seq))
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Env, EnvSettings};
    use tempfile::TempDir;

    /// Finds two distinct strings whose one-byte digests collide.
    fn colliding_pair(lookup: &HashLookupDb) -> (Vec<u8>, Vec<u8>) {
        let first = b"value-0".to_vec();
        let target = lookup.digest(&first);
        let second = (1..)
            .map(|i| format!("value-{}", i).into_bytes())
            .find(|candidate| lookup.digest(candidate) == target)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_put_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        let lookup = HashLookupDb::new("value", HashLength::Long);

        let a = lookup.put(&mut txn, b"some long string").unwrap();
        assert_eq!(a.len(), 10);
        assert_eq!(lookup.put(&mut txn, b"some long string").unwrap(), a);
        assert_eq!(lookup.get(&txn, b"some long string").unwrap(), Some(a.clone()));
        assert_eq!(lookup.get_value(&txn, &a).unwrap(), b"some long string");
        assert!(lookup.get(&txn, b"other").unwrap().is_none());
    }

    #[test]
    fn test_clashing_strings_get_distinct_surrogates() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        let lookup = HashLookupDb::with_hash_len("value", 1);
        let (first, second) = colliding_pair(&lookup);

        let a = lookup.put(&mut txn, &first).unwrap();
        let b = lookup.put(&mut txn, &second).unwrap();
        assert_ne!(a, b);
        assert_eq!(a[..1], b[..1]);
        assert_eq!(lookup.sequence(&a).unwrap(), 0);
        assert_eq!(lookup.sequence(&b).unwrap(), 1);

        assert_eq!(lookup.put(&mut txn, &second).unwrap(), b);
        assert_eq!(lookup.get_value(&txn, &a).unwrap(), first.as_slice());
        assert_eq!(lookup.get_value(&txn, &b).unwrap(), second.as_slice());
        txn.commit().unwrap();
    }

    #[test]
    fn test_sequence_not_reused_after_gap() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        let lookup = HashLookupDb::with_hash_len("value", 1);
        let (first, second) = colliding_pair(&lookup);

        let a = lookup.put(&mut txn, &first).unwrap();
        let b = lookup.put(&mut txn, &second).unwrap();

        // Remove sequence 0; the survivor keeps sequence 1
        lookup.delete_unused(&mut txn, &HashSet::from([b.clone()])).unwrap();
        assert!(lookup.get(&txn, &first).unwrap().is_none());
        assert_eq!(lookup.get(&txn, &second).unwrap(), Some(b.clone()));

        // The returning string takes a fresh sequence above the survivor
        let again = lookup.put(&mut txn, &first).unwrap();
        assert_ne!(again, a);
        assert_eq!(lookup.sequence(&again).unwrap(), 2);
    }

    #[test]
    fn test_clash_sequences_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let env = Env::open(temp_dir.path(), EnvSettings::default()).unwrap();
        let permit = env.write_gate().acquire().unwrap();
        let mut txn = env.begin_write(&permit).unwrap();
        let lookup = HashLookupDb::with_hash_len("value", 1);
        let (first, second) = colliding_pair(&lookup);

        // An entry already holding the last sequence for this digest
        let mut last = lookup.digest(&first);
        last.extend_from_slice(&u16::MAX.to_be_bytes());
        txn.put("value_hash", &last, &first).unwrap();

        let err = lookup.put(&mut txn, &second).unwrap_err();
        assert_eq!(err.code(), "PLANB_CODEC_HASH_CLASH_EXHAUSTED");
        assert!(err.to_string().contains("value_hash"));

        // Nothing was written and the existing entry still resolves
        assert_eq!(lookup.len(&txn), 1);
        assert!(lookup.get(&txn, &second).unwrap().is_none());
        assert_eq!(lookup.get(&txn, &first).unwrap(), Some(last.clone()));
        assert_eq!(lookup.get_value(&txn, &last).unwrap(), first.as_slice());
        assert_eq!(lookup.put(&mut txn, &first).unwrap(), last);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xAB, 0x10]), "00ab10");
    }
}
