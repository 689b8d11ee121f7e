//! Logical values
//!
//! [`Val`] is the value every store reads and writes. Its self-describing
//! byte form (`[type id][payload]`) is what lookup tables and `VARIABLE`
//! encodings store. Type ids are fixed and never reordered.

use std::fmt;

use serde::Serialize;

use super::errors::{CodecError, CodecResult};

/// Stable on-disk type id of a [`Val`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValType {
    Null = 0,
    Boolean = 1,
    Byte = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    String = 8,
}

impl ValType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> CodecResult<Self> {
        Ok(match id {
            0 => ValType::Null,
            1 => ValType::Boolean,
            2 => ValType::Byte,
            3 => ValType::Short,
            4 => ValType::Int,
            5 => ValType::Long,
            6 => ValType::Float,
            7 => ValType::Double,
            8 => ValType::String,
            other => {
                return Err(CodecError::decode(
                    "value",
                    format!("unknown type id {}", other),
                ))
            }
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValType::Null => "null",
            ValType::Boolean => "boolean",
            ValType::Byte => "byte",
            ValType::Short => "short",
            ValType::Int => "int",
            ValType::Long => "long",
            ValType::Float => "float",
            ValType::Double => "double",
            ValType::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Val {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl Val {
    pub fn val_type(&self) -> ValType {
        match self {
            Val::Null => ValType::Null,
            Val::Boolean(_) => ValType::Boolean,
            Val::Byte(_) => ValType::Byte,
            Val::Short(_) => ValType::Short,
            Val::Int(_) => ValType::Int,
            Val::Long(_) => ValType::Long,
            Val::Float(_) => ValType::Float,
            Val::Double(_) => ValType::Double,
            Val::String(_) => ValType::String,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Val::String(s.into())
    }

    /// Self-describing byte form: type id followed by the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.val_type().id()];
        match self {
            Val::Null => {}
            Val::Boolean(b) => out.push(u8::from(*b)),
            Val::Byte(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
            Val::String(s) => out.extend_from_slice(s.as_bytes()),
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let (&id, payload) = bytes
            .split_first()
            .ok_or_else(|| CodecError::decode("value", "empty buffer"))?;

        let val = match ValType::from_id(id)? {
            ValType::Null => {
                fixed::<0>(payload)?;
                Val::Null
            }
            ValType::Boolean => match fixed::<1>(payload)? {
                [0] => Val::Boolean(false),
                [1] => Val::Boolean(true),
                [other] => {
                    return Err(CodecError::decode(
                        "boolean",
                        format!("invalid byte {}", other),
                    ))
                }
            },
            ValType::Byte => Val::Byte(i8::from_be_bytes(fixed(payload)?)),
            ValType::Short => Val::Short(i16::from_be_bytes(fixed(payload)?)),
            ValType::Int => Val::Int(i32::from_be_bytes(fixed(payload)?)),
            ValType::Long => Val::Long(i64::from_be_bytes(fixed(payload)?)),
            ValType::Float => Val::Float(f32::from_be_bytes(fixed(payload)?)),
            ValType::Double => Val::Double(f64::from_be_bytes(fixed(payload)?)),
            ValType::String => Val::String(
                String::from_utf8(payload.to_vec())
                    .map_err(|e| CodecError::decode("string", e.to_string()))?,
            ),
        };
        Ok(val)
    }

    /// Numeric view used by comparisons; `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Byte(v) => Some(f64::from(*v)),
            Val::Short(v) => Some(f64::from(*v)),
            Val::Int(v) => Some(f64::from(*v)),
            Val::Long(v) => Some(*v as f64),
            Val::Float(v) => Some(f64::from(*v)),
            Val::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Byte(v) => Some(i64::from(*v)),
            Val::Short(v) => Some(i64::from(*v)),
            Val::Int(v) => Some(i64::from(*v)),
            Val::Long(v) => Some(*v),
            _ => None,
        }
    }
}

fn fixed<const N: usize>(payload: &[u8]) -> CodecResult<[u8; N]> {
    payload.try_into().map_err(|_| {
        CodecError::decode(
            "value",
            format!("expected {} payload bytes, got {}", N, payload.len()),
        )
    })
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Boolean(v) => write!(f, "{}", v),
            Val::Byte(v) => write!(f, "{}", v),
            Val::Short(v) => write!(f, "{}", v),
            Val::Int(v) => write!(f, "{}", v),
            Val::Long(v) => write!(f, "{}", v),
            Val::Float(v) => write!(f, "{}", v),
            Val::Double(v) => write!(f, "{}", v),
            Val::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::String(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::String(s)
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::Int(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::Long(v)
    }
}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::Boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids_are_stable() {
        assert_eq!(ValType::Null.id(), 0);
        assert_eq!(ValType::Long.id(), 5);
        assert_eq!(ValType::String.id(), 8);
        assert_eq!(Val::Long(1).to_bytes()[0], 5);
    }

    #[test]
    fn test_byte_form() {
        assert_eq!(Val::string("ab").to_bytes(), vec![8, b'a', b'b']);
        assert_eq!(Val::Boolean(true).to_bytes(), vec![1, 1]);
        assert_eq!(Val::Null.to_bytes(), vec![0]);
        assert_eq!(Val::Short(-2).to_bytes(), vec![3, 0xFF, 0xFE]);
    }

    #[test]
    fn test_every_type_decodes() {
        let vals = [
            Val::Null,
            Val::Boolean(false),
            Val::Byte(-7),
            Val::Short(300),
            Val::Int(-70_000),
            Val::Long(i64::MIN),
            Val::Float(1.5),
            Val::Double(-0.25),
            Val::string("héllo"),
        ];
        for val in vals {
            assert_eq!(Val::from_bytes(&val.to_bytes()).unwrap(), val);
        }
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(Val::from_bytes(&[]).is_err());
        assert!(Val::from_bytes(&[42]).is_err());
        assert!(Val::from_bytes(&[5, 0, 0]).is_err());
        assert!(Val::from_bytes(&[1, 2]).is_err());
        assert!(Val::from_bytes(&[8, 0xFF]).is_err());
    }

    #[test]
    fn test_json_form() {
        let json = serde_json::to_string(&vec![Val::Null, Val::Long(3), Val::string("x")]).unwrap();
        assert_eq!(json, r#"[null,3,"x"]"#);
    }
}
