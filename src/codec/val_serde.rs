//! Encoding of one key or value column
//!
//! | Type          | Encoded form                                         |
//! |---------------|------------------------------------------------------|
//! | fixed numeric | sortable fixed-width bytes                           |
//! | BOOLEAN       | one byte, 0 or 1                                     |
//! | STRING        | utf8 bytes                                           |
//! | UID_LOOKUP    | 8-byte id into the uid lookup                        |
//! | HASH_LOOKUP   | hash + clash sequence into the hash lookup           |
//! | VARIABLE      | tag byte, then inline bytes, a uid or a hash surrogate |
//!
//! Lookup-backed types store [`Val::to_bytes`] in the lookup table.
//!
//! `VARIABLE` picks its form from the length L of the value's byte form:
//! - L <= [`UID_LOOKUP_THRESHOLD`]: [`VariableTag::Direct`], bytes inline
//! - L <= [`USE_HASH_LOOKUP_THRESHOLD`]: [`VariableTag::UidLookup`]
//! - otherwise: [`VariableTag::HashLookup`]

use std::collections::HashSet;

use crate::env::{Txn, WriteTxn, MAX_KEY_LENGTH};
use crate::lookup::uid::{decode_uid, UID_LEN};
use crate::lookup::{HashLookupDb, UidLookupDb};

use super::data_type::{DataType, HashLength};
use super::errors::{CodecError, CodecResult};
use super::sortable;
use super::val::Val;

/// Longest byte form stored inline by `VARIABLE`
pub const UID_LOOKUP_THRESHOLD: usize = 32;

/// Longest byte form `VARIABLE` sends to the uid lookup; it becomes a key there
pub const USE_HASH_LOOKUP_THRESHOLD: usize = MAX_KEY_LENGTH;

/// Leading byte of a `VARIABLE` encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariableTag {
    Direct = 0,
    UidLookup = 1,
    HashLookup = 2,
}

impl VariableTag {
    pub fn from_byte(b: u8) -> CodecResult<Self> {
        match b {
            0 => Ok(VariableTag::Direct),
            1 => Ok(VariableTag::UidLookup),
            2 => Ok(VariableTag::HashLookup),
            other => Err(CodecError::decode(
                "variable",
                format!("unknown tag {}", other),
            )),
        }
    }
}

/// Codec for one key or value column, with its lookup tables
#[derive(Debug, Clone)]
pub struct ValSerde {
    data_type: DataType,
    uid: UidLookupDb,
    hash: HashLookupDb,
}

impl ValSerde {
    /// `name` prefixes the lookup tables; keys and values use separate ones.
    pub fn new(data_type: DataType, hash_length: HashLength, name: &str) -> Self {
        Self {
            data_type,
            uid: UidLookupDb::new(name),
            hash: HashLookupDb::new(name, hash_length),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn uid_lookup(&self) -> &UidLookupDb {
        &self.uid
    }

    pub fn hash_lookup(&self) -> &HashLookupDb {
        &self.hash
    }

    /// Encodes `val`, adding lookup entries as needed.
    pub fn write(&self, txn: &mut WriteTxn, val: &Val) -> CodecResult<Vec<u8>> {
        match self.data_type {
            DataType::UidLookup => {
                let id = self.uid.put(txn, &val.to_bytes())?;
                Ok(id.to_be_bytes().to_vec())
            }
            DataType::HashLookup => self.hash.put(txn, &val.to_bytes()),
            DataType::Variable => {
                let bytes = val.to_bytes();
                let tag = variable_tag_for(bytes.len());
                let body = match tag {
                    VariableTag::Direct => bytes,
                    VariableTag::UidLookup => self.uid.put(txn, &bytes)?.to_be_bytes().to_vec(),
                    VariableTag::HashLookup => self.hash.put(txn, &bytes)?,
                };
                Ok(tagged(tag, &body))
            }
            fixed => encode_fixed(fixed, val),
        }
    }

    /// Encodes `val` for a lookup without adding lookup entries.
    ///
    /// `None` means no lookup entry exists, so no record can hold `val`.
    pub fn to_buffer_for_get(&self, txn: &dyn Txn, val: &Val) -> CodecResult<Option<Vec<u8>>> {
        match self.data_type {
            DataType::UidLookup => Ok(self
                .uid
                .get(txn, &val.to_bytes())?
                .map(|id| id.to_be_bytes().to_vec())),
            DataType::HashLookup => self.hash.get(txn, &val.to_bytes()),
            DataType::Variable => {
                let bytes = val.to_bytes();
                let tag = variable_tag_for(bytes.len());
                let body = match tag {
                    VariableTag::Direct => Some(bytes),
                    VariableTag::UidLookup => self
                        .uid
                        .get(txn, &bytes)?
                        .map(|id| id.to_be_bytes().to_vec()),
                    VariableTag::HashLookup => self.hash.get(txn, &bytes)?,
                };
                Ok(body.map(|body| tagged(tag, &body)))
            }
            fixed => encode_fixed(fixed, val).map(Some),
        }
    }

    /// Decodes bytes produced by [`ValSerde::write`].
    pub fn read(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        match self.data_type {
            DataType::UidLookup => self.read_uid(txn, bytes),
            DataType::HashLookup => self.read_hash(txn, bytes),
            DataType::Variable => {
                let (&tag, body) = bytes
                    .split_first()
                    .ok_or_else(|| CodecError::decode("variable", "empty buffer"))?;
                match VariableTag::from_byte(tag)? {
                    VariableTag::Direct => Val::from_bytes(body),
                    VariableTag::UidLookup => self.read_uid(txn, body),
                    VariableTag::HashLookup => self.read_hash(txn, body),
                }
            }
            fixed => decode_fixed(fixed, bytes),
        }
    }

    /// Whether `bytes` reference a lookup table.
    pub fn uses_lookup(&self, bytes: &[u8]) -> bool {
        match self.data_type {
            DataType::UidLookup | DataType::HashLookup => true,
            DataType::Variable => bytes.first() != Some(&(VariableTag::Direct as u8)),
            _ => false,
        }
    }

    pub fn used_lookups_recorder(&self) -> UsedLookupsRecorder {
        UsedLookupsRecorder {
            serde: self.clone(),
            uids: HashSet::new(),
            hashes: HashSet::new(),
        }
    }

    fn read_uid(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        let id = decode_uid(bytes, "uid surrogate")?;
        Val::from_bytes(self.uid.get_value(txn, id)?)
    }

    fn read_hash(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        self.check_hash_len(bytes)?;
        Val::from_bytes(self.hash.get_value(txn, bytes)?)
    }

    fn check_hash_len(&self, bytes: &[u8]) -> CodecResult<()> {
        if bytes.len() != self.hash.surrogate_len() {
            return Err(CodecError::decode(
                "hash surrogate",
                format!("expected {} bytes, got {}", self.hash.surrogate_len(), bytes.len()),
            ));
        }
        Ok(())
    }
}

/// Which `VARIABLE` form a byte form of `len` bytes takes.
pub fn variable_tag_for(len: usize) -> VariableTag {
    if len <= UID_LOOKUP_THRESHOLD {
        VariableTag::Direct
    } else if len <= USE_HASH_LOOKUP_THRESHOLD {
        VariableTag::UidLookup
    } else {
        VariableTag::HashLookup
    }
}

fn tagged(tag: VariableTag, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tag as u8);
    out.extend_from_slice(body);
    out
}

fn mismatch(data_type: DataType, val: &Val) -> CodecError {
    CodecError::TypeMismatch {
        expected: data_type.as_str(),
        found: val.val_type().as_str(),
    }
}

fn encode_fixed(data_type: DataType, val: &Val) -> CodecResult<Vec<u8>> {
    Ok(match (data_type, val) {
        (DataType::Boolean, Val::Boolean(v)) => vec![u8::from(*v)],
        (DataType::Byte, Val::Byte(v)) => sortable::encode_i8(*v).to_vec(),
        (DataType::Short, Val::Short(v)) => sortable::encode_i16(*v).to_vec(),
        (DataType::Int, Val::Int(v)) => sortable::encode_i32(*v).to_vec(),
        (DataType::Long, Val::Long(v)) => sortable::encode_i64(*v).to_vec(),
        (DataType::Float, Val::Float(v)) => sortable::encode_f32(*v).to_vec(),
        (DataType::Double, Val::Double(v)) => sortable::encode_f64(*v).to_vec(),
        (DataType::String, Val::String(s)) => s.as_bytes().to_vec(),
        _ => return Err(mismatch(data_type, val)),
    })
}

fn decode_fixed(data_type: DataType, bytes: &[u8]) -> CodecResult<Val> {
    let wrong_len = || {
        CodecError::decode(
            data_type.as_str(),
            format!("unexpected length {}", bytes.len()),
        )
    };
    Ok(match data_type {
        DataType::Boolean => match bytes {
            [0] => Val::Boolean(false),
            [1] => Val::Boolean(true),
            _ => return Err(wrong_len()),
        },
        DataType::Byte => Val::Byte(sortable::decode_i8(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::Short => Val::Short(sortable::decode_i16(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::Int => Val::Int(sortable::decode_i32(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::Long => Val::Long(sortable::decode_i64(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::Float => Val::Float(sortable::decode_f32(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::Double => Val::Double(sortable::decode_f64(bytes.try_into().map_err(|_| wrong_len())?)),
        DataType::String => Val::String(
            String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::decode("string", e.to_string()))?,
        ),
        DataType::UidLookup | DataType::HashLookup | DataType::Variable => {
            return Err(CodecError::decode(data_type.as_str(), "not a fixed type"))
        }
    })
}

/// Mark-and-sweep bookkeeping for one column's lookup tables
///
/// Retention marks the surrogates of every surviving record, then removes
/// every lookup entry left unmarked.
#[derive(Debug)]
pub struct UsedLookupsRecorder {
    serde: ValSerde,
    uids: HashSet<u64>,
    hashes: HashSet<Vec<u8>>,
}

impl UsedLookupsRecorder {
    /// Marks the surrogate referenced by encoded column bytes, if any.
    pub fn record_used(&mut self, bytes: &[u8]) -> CodecResult<()> {
        match self.serde.data_type {
            DataType::UidLookup => self.mark_uid(bytes),
            DataType::HashLookup => self.mark_hash(bytes),
            DataType::Variable => {
                let (&tag, body) = bytes
                    .split_first()
                    .ok_or_else(|| CodecError::decode("variable", "empty buffer"))?;
                match VariableTag::from_byte(tag)? {
                    VariableTag::Direct => Ok(()),
                    VariableTag::UidLookup => self.mark_uid(body),
                    VariableTag::HashLookup => self.mark_hash(body),
                }
            }
            _ => Ok(()),
        }
    }

    /// Number of distinct surrogates marked so far.
    pub fn marked(&self) -> usize {
        self.uids.len() + self.hashes.len()
    }

    /// Removes every lookup entry not marked. Returns the count removed.
    pub fn delete_unused(&self, txn: &mut WriteTxn) -> CodecResult<u64> {
        let serde = &self.serde;
        Ok(match serde.data_type {
            DataType::UidLookup => serde.uid.delete_unused(txn, &self.uids)?,
            DataType::HashLookup => serde.hash.delete_unused(txn, &self.hashes)?,
            DataType::Variable => {
                serde.uid.delete_unused(txn, &self.uids)?
                    + serde.hash.delete_unused(txn, &self.hashes)?
            }
            _ => 0,
        })
    }

    fn mark_uid(&mut self, bytes: &[u8]) -> CodecResult<()> {
        if bytes.len() != UID_LEN {
            return Err(CodecError::decode("uid surrogate", format!("{} bytes", bytes.len())));
        }
        self.uids.insert(decode_uid(bytes, "uid surrogate")?);
        Ok(())
    }

    fn mark_hash(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.serde.check_hash_len(bytes)?;
        self.hashes.insert(bytes.to_vec());
        Ok(())
    }
}
