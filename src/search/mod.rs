//! Full-scan search over a store
//!
//! Every record is visited under one read transaction. A [`LazyKv`] row
//! decodes its key and its value at most once, and only when a field from
//! that side is asked for. Rows the predicate accepts are handed to the
//! consumer as values in [`FieldIndex`] order.

pub mod expression;
pub mod lazy;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::codec::Val;
use crate::store::{StoreError, StoreResult};

pub use expression::{Condition, Expression, ExpressionPredicateFactory};
pub use lazy::LazyKv;

/// Fields that hold epoch-millisecond times
pub const TIME_FIELDS: &[&str] = &["effectiveTime", "insertTime", "start", "end"];

pub fn is_time_field(field: &str) -> bool {
    TIME_FIELDS.contains(&field)
}

/// Named field access to one record
pub trait Row {
    /// Value of `field`, or `None` if the record has no such field.
    fn value(&self, field: &str) -> Option<Val>;
}

/// Row filter evaluated per record
pub trait Predicate {
    fn matches(&self, row: &dyn Row) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&dyn Row) -> bool,
{
    fn matches(&self, row: &dyn Row) -> bool {
        self(row)
    }
}

/// Builds predicates from query criteria, so hosts can plug in their own
/// filter language
pub trait PredicateFactory {
    fn create(
        &self,
        criteria: &Expression,
        settings: &DateTimeSettings,
    ) -> StoreResult<Box<dyn Predicate>>;
}

/// Fields to return for each match, in output order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldIndex {
    fields: Vec<String>,
}

impl FieldIndex {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Values of every indexed field; missing fields read as `Null`.
    pub fn values(&self, row: &dyn Row) -> Vec<Val> {
        self.fields
            .iter()
            .map(|f| row.value(f).unwrap_or(Val::Null))
            .collect()
    }
}

/// How time literals in queries are read
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeSettings {
    /// Offset applied to literals that carry no zone, in minutes east of UTC
    #[serde(default)]
    pub offset_minutes: i32,
}

impl DateTimeSettings {
    /// Parses an ISO-8601 date, date-time or epoch-millisecond literal.
    pub fn parse_millis(&self, text: &str) -> StoreResult<i64> {
        let text = text.trim();
        if let Ok(ms) = text.parse::<i64>() {
            return Ok(ms);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.timestamp_millis());
        }

        let offset = FixedOffset::east_opt(self.offset_minutes * 60).ok_or_else(|| {
            StoreError::invalid_query(format!("invalid offset of {} minutes", self.offset_minutes))
        })?;

        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| StoreError::invalid_query(format!("'{}' is not a date-time", text)))?;

        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| StoreError::invalid_query(format!("'{}' is ambiguous", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapRow(HashMap<&'static str, Val>);

    impl Row for MapRow {
        fn value(&self, field: &str) -> Option<Val> {
            self.0.get(field).cloned()
        }
    }

    #[test]
    fn test_field_index_order() {
        let row = MapRow(HashMap::from([("key", Val::string("a")), ("value", Val::Int(1))]));
        let index = FieldIndex::new(["value", "missing", "key"]);
        assert_eq!(
            index.values(&row),
            vec![Val::Int(1), Val::Null, Val::string("a")]
        );
        assert_eq!(index.position("key"), Some(2));
    }

    #[test]
    fn test_closure_predicate() {
        let row = MapRow(HashMap::from([("value", Val::Int(5))]));
        let predicate = |row: &dyn Row| row.value("value") == Some(Val::Int(5));
        assert!(predicate.matches(&row));
    }

    #[test]
    fn test_parse_millis() {
        let utc = DateTimeSettings::default();
        assert_eq!(utc.parse_millis("1000").unwrap(), 1000);
        assert_eq!(utc.parse_millis("1970-01-01T00:00:01Z").unwrap(), 1000);
        assert_eq!(utc.parse_millis("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(utc.parse_millis("1970-01-01T00:01:00.5").unwrap(), 60_500);

        let plus_one = DateTimeSettings { offset_minutes: 60 };
        assert_eq!(plus_one.parse_millis("1970-01-01T01:00:00").unwrap(), 0);
        assert_eq!(plus_one.parse_millis("1970-01-01T00:00:00Z").unwrap(), 0);

        assert!(utc.parse_millis("yesterday").is_err());
    }
}
