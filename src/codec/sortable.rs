//! Fixed-width encodings whose byte order matches numeric order
//!
//! Integers are big-endian with the sign bit flipped. Floats flip the sign
//! bit of positive values and every bit of negative ones. Keys built from
//! these iterate in numeric order.

use super::errors::{CodecError, CodecResult};

pub const LONG_LEN: usize = 8;

pub fn encode_i8(v: i8) -> [u8; 1] {
    [(v as u8) ^ 0x80]
}

pub fn decode_i8(b: [u8; 1]) -> i8 {
    (b[0] ^ 0x80) as i8
}

pub fn encode_i16(v: i16) -> [u8; 2] {
    ((v as u16) ^ (1 << 15)).to_be_bytes()
}

pub fn decode_i16(b: [u8; 2]) -> i16 {
    (u16::from_be_bytes(b) ^ (1 << 15)) as i16
}

pub fn encode_i32(v: i32) -> [u8; 4] {
    ((v as u32) ^ (1 << 31)).to_be_bytes()
}

pub fn decode_i32(b: [u8; 4]) -> i32 {
    (u32::from_be_bytes(b) ^ (1 << 31)) as i32
}

pub fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_i64(b: [u8; 8]) -> i64 {
    (u64::from_be_bytes(b) ^ (1 << 63)) as i64
}

pub fn encode_f32(v: f32) -> [u8; 4] {
    let bits = v.to_bits();
    let flipped = if bits & (1 << 31) != 0 { !bits } else { bits | (1 << 31) };
    flipped.to_be_bytes()
}

pub fn decode_f32(b: [u8; 4]) -> f32 {
    let bits = u32::from_be_bytes(b);
    let original = if bits & (1 << 31) != 0 { bits & !(1 << 31) } else { !bits };
    f32::from_bits(original)
}

pub fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let flipped = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
    flipped.to_be_bytes()
}

pub fn decode_f64(b: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(b);
    let original = if bits & (1 << 63) != 0 { bits & !(1 << 63) } else { !bits };
    f64::from_bits(original)
}

/// Reads a sortable `i64` from exactly eight bytes.
pub fn read_i64(bytes: &[u8]) -> CodecResult<i64> {
    let b: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CodecError::decode("long", format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(decode_i64(b))
}

/// Splits `n` trailing sortable longs off an encoded key.
pub fn split_longs<const N: usize>(bytes: &[u8]) -> CodecResult<(&[u8], [i64; N])> {
    let suffix_len = N * LONG_LEN;
    if bytes.len() < suffix_len {
        return Err(CodecError::decode(
            "key",
            format!("{} bytes is shorter than its {} byte suffix", bytes.len(), suffix_len),
        ));
    }
    let (prefix, suffix) = bytes.split_at(bytes.len() - suffix_len);
    let mut longs = [0i64; N];
    for (i, chunk) in suffix.chunks_exact(LONG_LEN).enumerate() {
        longs[i] = read_i64(chunk)?;
    }
    Ok((prefix, longs))
}

/// Appends sortable longs to an encoded key.
pub fn append_longs(mut bytes: Vec<u8>, longs: &[i64]) -> Vec<u8> {
    for v in longs {
        bytes.extend_from_slice(&encode_i64(*v));
    }
    bytes
}
