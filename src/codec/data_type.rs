//! Key and value types a store document can declare

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::{CodecError, CodecResult};
use super::val::Val;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    UidLookup,
    HashLookup,
    Variable,
}

pub type KeyType = DataType;
pub type ValueType = DataType;

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Byte => "BYTE",
            DataType::Short => "SHORT",
            DataType::Int => "INT",
            DataType::Long => "LONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::String => "STRING",
            DataType::UidLookup => "UID_LOOKUP",
            DataType::HashLookup => "HASH_LOOKUP",
            DataType::Variable => "VARIABLE",
        }
    }

    /// Whether encodings of this type can reference a lookup table.
    pub fn may_use_lookup(self) -> bool {
        matches!(
            self,
            DataType::UidLookup | DataType::HashLookup | DataType::Variable
        )
    }

    /// Parses text typed on the command line into a value of this type.
    ///
    /// Lookup-backed types hold strings.
    pub fn parse_val(self, text: &str) -> CodecResult<Val> {
        let invalid = |e: &dyn fmt::Display| {
            CodecError::decode("argument", format!("'{}' is not a valid {}: {}", text, self, e))
        };
        Ok(match self {
            DataType::Boolean => Val::Boolean(text.parse().map_err(|e| invalid(&e))?),
            DataType::Byte => Val::Byte(text.parse().map_err(|e| invalid(&e))?),
            DataType::Short => Val::Short(text.parse().map_err(|e| invalid(&e))?),
            DataType::Int => Val::Int(text.parse().map_err(|e| invalid(&e))?),
            DataType::Long => Val::Long(text.parse().map_err(|e| invalid(&e))?),
            DataType::Float => Val::Float(text.parse().map_err(|e| invalid(&e))?),
            DataType::Double => Val::Double(text.parse().map_err(|e| invalid(&e))?),
            DataType::String
            | DataType::UidLookup
            | DataType::HashLookup
            | DataType::Variable => Val::string(text),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase()))
            .map_err(|_| format!("unknown data type: {}", s))
    }
}

/// Width of the digest used by hash lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashLength {
    Integer,
    #[default]
    Long,
}

impl HashLength {
    pub fn bytes(self) -> usize {
        match self {
            HashLength::Integer => 4,
            HashLength::Long => 8,
        }
    }
}
