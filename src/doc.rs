//! Store documents: the schema and settings of one named store
//!
//! Documents are read from JSON in camelCase with defaults for every
//! setting:
//!
//! ```json
//! {
//!   "name": "hosts",
//!   "kind": "STATE",
//!   "keyType": "STRING",
//!   "valueType": "VARIABLE",
//!   "settings": { "retention": { "enabled": true, "duration": { "time": 30, "timeUnit": "DAYS" } } }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{DataType, HashLength};

fn default_max_store_size() -> u64 {
    10 * 1024 * 1024 * 1024
} // 10GiB
fn default_overwrite() -> bool {
    true
}
fn default_key_type() -> DataType {
    DataType::Variable
}
fn default_value_type() -> DataType {
    DataType::Variable
}

/// Shape of the records a store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreKind {
    State,
    TemporalState,
    RangeState,
    TemporalRangeState,
    Session,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::State => "STATE",
            StoreKind::TemporalState => "TEMPORAL_STATE",
            StoreKind::RangeState => "RANGE_STATE",
            StoreKind::TemporalRangeState => "TEMPORAL_RANGE_STATE",
            StoreKind::Session => "SESSION",
        }
    }

    /// Whether records carry a typed key column. Range kinds key on longs.
    pub fn has_key_column(self) -> bool {
        matches!(
            self,
            StoreKind::State | StoreKind::TemporalState | StoreKind::Session
        )
    }

    /// Whether records carry a typed value column. Sessions have none.
    pub fn has_value_column(self) -> bool {
        self != StoreKind::Session
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

/// A count of calendar or clock units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleDuration {
    pub time: u32,
    pub time_unit: TimeUnit,
}

impl SimpleDuration {
    pub fn new(time: u32, time_unit: TimeUnit) -> Self {
        Self { time, time_unit }
    }

    /// The instant this duration before `now_ms`, in epoch milliseconds.
    ///
    /// Months and years step back by calendar months in UTC.
    pub fn before(&self, now_ms: i64) -> i64 {
        let now = DateTime::<Utc>::from_timestamp_millis(now_ms).unwrap_or_default();
        let t = i64::from(self.time);
        let cutoff = match self.time_unit {
            TimeUnit::Milliseconds => now.checked_sub_signed(TimeDelta::milliseconds(t)),
            TimeUnit::Seconds => now.checked_sub_signed(TimeDelta::seconds(t)),
            TimeUnit::Minutes => now.checked_sub_signed(TimeDelta::minutes(t)),
            TimeUnit::Hours => now.checked_sub_signed(TimeDelta::hours(t)),
            TimeUnit::Days => now.checked_sub_signed(TimeDelta::days(t)),
            TimeUnit::Weeks => now.checked_sub_signed(TimeDelta::weeks(t)),
            TimeUnit::Months => now.checked_sub_months(Months::new(self.time)),
            TimeUnit::Years => self
                .time
                .checked_mul(12)
                .and_then(|m| now.checked_sub_months(Months::new(m))),
        };
        cutoff.map_or(i64::MIN, |c| c.timestamp_millis())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSettings {
    #[serde(default)]
    pub enabled: bool,
    pub duration: SimpleDuration,
    /// Age records by insert time rather than their own time field
    #[serde(default)]
    pub use_alternate_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CondenseSettings {
    #[serde(default)]
    pub enabled: bool,
    pub duration: SimpleDuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    #[serde(default = "default_max_store_size")]
    pub max_store_size: u64,

    /// Replace existing records on insert and merge
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,

    /// Merge shards on receipt instead of queueing them
    #[serde(default)]
    pub synchronise_merge: bool,

    #[serde(default)]
    pub retention: Option<RetentionSettings>,

    #[serde(default)]
    pub condense: Option<CondenseSettings>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_store_size: default_max_store_size(),
            overwrite: default_overwrite(),
            synchronise_merge: false,
            retention: None,
            condense: None,
        }
    }
}

/// A named store with a fixed schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDoc {
    pub name: String,
    pub kind: StoreKind,
    #[serde(default = "default_key_type")]
    pub key_type: DataType,
    #[serde(default = "default_value_type")]
    pub value_type: DataType,
    #[serde(default)]
    pub hash_length: HashLength,
    #[serde(default)]
    pub settings: StoreSettings,
}

impl StoreDoc {
    pub fn new(name: impl Into<String>, kind: StoreKind, key_type: DataType, value_type: DataType) -> Self {
        Self {
            name: name.into(),
            kind,
            key_type,
            value_type,
            hash_length: HashLength::default(),
            settings: StoreSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checks the name is usable as a directory name.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("store name must not be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "store name '{}' may only contain letters, digits, '_' and '-'",
                self.name
            ));
        }
        Ok(())
    }
}

/// Resolves a document name to its schema and settings
pub trait DocResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<StoreDoc>;
}

/// In-memory set of documents keyed by name
#[derive(Debug, Clone, Default)]
pub struct DocRegistry {
    docs: HashMap<String, StoreDoc>,
}

impl DocRegistry {
    pub fn new(docs: impl IntoIterator<Item = StoreDoc>) -> Self {
        Self {
            docs: docs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    pub fn insert(&mut self, doc: StoreDoc) {
        self.docs.insert(doc.name.clone(), doc);
    }

    pub fn docs(&self) -> impl Iterator<Item = &StoreDoc> {
        self.docs.values()
    }
}

impl DocResolver for DocRegistry {
    fn resolve(&self, name: &str) -> Option<StoreDoc> {
        self.docs.get(name).cloned()
    }
}
