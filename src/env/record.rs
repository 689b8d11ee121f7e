//! Commit log record format
//!
//! One record per committed write transaction:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, whole record including this field)
//! +------------------+
//! | Commit Id        | (u64 LE)
//! +------------------+
//! | Op Count         | (u32 LE)
//! +------------------+
//! | Ops              | kind (u8) | table (u16 LE len + utf8)
//! |                  | key (u32 LE len + bytes) | value (put only)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum covers all bytes except the checksum itself.

use std::io::{self, Cursor, Read};

use super::checksum::compute_checksum;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Length + commit id + op count + checksum
const MIN_RECORD_SIZE: usize = 4 + 8 + 4 + 4;

/// A single table mutation inside a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: String,
        key: Vec<u8>,
    },
}

/// All mutations of one committed write transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub commit_id: u64,
    pub ops: Vec<LogOp>,
}

impl CommitRecord {
    /// Serialize the complete record to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.commit_id.to_le_bytes());
        body.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());

        for op in &self.ops {
            match op {
                LogOp::Put { table, key, value } => {
                    body.push(OP_PUT);
                    write_name(&mut body, table);
                    write_bytes(&mut body, key);
                    write_bytes(&mut body, value);
                }
                LogOp::Delete { table, key } => {
                    body.push(OP_DELETE);
                    write_name(&mut body, table);
                    write_bytes(&mut body, key);
                }
            }
        }

        let record_length = (4 + body.len() + 4) as u32;

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&body);
        let checksum = compute_checksum(&record);
        record.extend_from_slice(&checksum.to_le_bytes());

        record
    }

    /// Deserialize a record from the front of `data`, verifying its checksum.
    ///
    /// Returns the record and the number of bytes consumed. Truncation is
    /// reported as `UnexpectedEof`, a bad checksum or body as `InvalidData`.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Record too short",
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record length: {}", record_length),
            ));
        }

        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed_checksum = compute_checksum(&data[..checksum_offset]);

        if computed_checksum != stored_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: computed {:08x}, stored {:08x}",
                    computed_checksum, stored_checksum
                ),
            ));
        }

        let mut cursor = Cursor::new(&data[4..checksum_offset]);
        let commit_id = read_u64(&mut cursor)?;
        let op_count = read_u32(&mut cursor)? as usize;

        let mut ops = Vec::with_capacity(op_count.min(1 << 16));
        for _ in 0..op_count {
            let kind = read_u8(&mut cursor)?;
            let table = read_name(&mut cursor)?;
            let key = read_bytes(&mut cursor)?;
            let op = match kind {
                OP_PUT => LogOp::Put {
                    table,
                    key,
                    value: read_bytes(&mut cursor)?,
                },
                OP_DELETE => LogOp::Delete { table, key },
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Unknown op kind: {}", other),
                    ))
                }
            };
            ops.push(op);
        }

        Ok((Self { commit_id, ops }, record_length))
    }
}

pub(crate) fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
}

pub(crate) fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_name<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = u16::from_le_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    String::from_utf8(buf).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
    })
}

pub(crate) fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
