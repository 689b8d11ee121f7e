//! Store variants
//!
//! Every store kind shares the generic engine in [`db`]; the kinds differ
//! in key layout, lookup semantics and condensing. [`PlanBDb`] is the closed
//! set of kinds behind one interface, chosen from a store document.

pub mod db;
pub mod errors;
pub mod range_state;
pub mod schema;
pub mod session;
pub mod source;
pub mod state;
pub mod temporal_range_state;
pub mod temporal_state;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::codec::Val;
use crate::doc::{StoreDoc, StoreKind};
use crate::env::Env;
use crate::search::{
    DateTimeSettings, Expression, ExpressionPredicateFactory, FieldIndex, PredicateFactory,
};
use crate::writer::Writer;

pub use db::{Db, MergeStats, RetentionStats, DATA_TABLE};
pub use errors::{StoreError, StoreResult};
pub use range_state::{KeyRange, RangeStateDb, RangeStateSchema};
pub use schema::{Schema, SchemaInfo, SCHEMA_FILE};
pub use session::{SessionDb, SessionKey, SessionSchema};
pub use source::SourceDir;
pub use state::{StateDb, StateSchema};
pub use temporal_range_state::{TemporalRangeKey, TemporalRangeStateDb, TemporalRangeStateSchema};
pub use temporal_state::{TemporalKey, TemporalStateDb, TemporalStateSchema};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One record of any store kind
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    State { key: Val, value: Val },
    TemporalState { key: TemporalKey, value: Val },
    RangeState { key: KeyRange, value: Val },
    TemporalRangeState { key: TemporalRangeKey, value: Val },
    Session(SessionKey),
}

impl Record {
    pub fn kind(&self) -> StoreKind {
        match self {
            Record::State { .. } => StoreKind::State,
            Record::TemporalState { .. } => StoreKind::TemporalState,
            Record::RangeState { .. } => StoreKind::RangeState,
            Record::TemporalRangeState { .. } => StoreKind::TemporalRangeState,
            Record::Session(_) => StoreKind::Session,
        }
    }
}

/// A store of any kind
pub enum PlanBDb {
    State(StateDb),
    TemporalState(TemporalStateDb),
    RangeState(RangeStateDb),
    TemporalRangeState(TemporalRangeStateDb),
    Session(SessionDb),
}

macro_rules! each_db {
    ($self:expr, $db:ident => $body:expr) => {
        match $self {
            PlanBDb::State($db) => $body,
            PlanBDb::TemporalState($db) => $body,
            PlanBDb::RangeState($db) => $body,
            PlanBDb::TemporalRangeState($db) => $body,
            PlanBDb::Session($db) => $body,
        }
    };
}

impl PlanBDb {
    /// Opens the store `doc` describes in `dir`.
    pub fn open(doc: &StoreDoc, dir: &Path, read_only: bool) -> StoreResult<Self> {
        Ok(match doc.kind {
            StoreKind::State => PlanBDb::State(Db::open(dir, doc, read_only)?),
            StoreKind::TemporalState => PlanBDb::TemporalState(Db::open(dir, doc, read_only)?),
            StoreKind::RangeState => PlanBDb::RangeState(Db::open(dir, doc, read_only)?),
            StoreKind::TemporalRangeState => {
                PlanBDb::TemporalRangeState(Db::open(dir, doc, read_only)?)
            }
            StoreKind::Session => PlanBDb::Session(Db::open(dir, doc, read_only)?),
        })
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            PlanBDb::State(_) => StoreKind::State,
            PlanBDb::TemporalState(_) => StoreKind::TemporalState,
            PlanBDb::RangeState(_) => StoreKind::RangeState,
            PlanBDb::TemporalRangeState(_) => StoreKind::TemporalRangeState,
            PlanBDb::Session(_) => StoreKind::Session,
        }
    }

    pub fn name(&self) -> &str {
        each_db!(self, db => db.name())
    }

    pub fn env(&self) -> &Arc<Env> {
        each_db!(self, db => db.env())
    }

    pub fn info(&self) -> &SchemaInfo {
        each_db!(self, db => db.info())
    }

    pub fn count(&self) -> usize {
        each_db!(self, db => db.count())
    }

    /// Searchable fields in display order.
    pub fn fields(&self) -> &'static [&'static str] {
        each_db!(self, db => db.schema().fields())
    }

    pub fn writer(&self) -> StoreResult<Writer> {
        each_db!(self, db => db.writer())
    }

    /// Inserts `record`, which must match the store kind.
    pub fn insert(&self, writer: &mut Writer, record: &Record) -> StoreResult<bool> {
        match (self, record) {
            (PlanBDb::State(db), Record::State { key, value }) => db.insert(writer, key, value),
            (PlanBDb::TemporalState(db), Record::TemporalState { key, value }) => {
                db.insert(writer, key, value)
            }
            (PlanBDb::RangeState(db), Record::RangeState { key, value }) => {
                db.insert(writer, key, value)
            }
            (PlanBDb::TemporalRangeState(db), Record::TemporalRangeState { key, value }) => {
                db.insert(writer, key, value)
            }
            (PlanBDb::Session(db), Record::Session(key)) => db.insert(writer, key, &()),
            _ => Err(StoreError::RecordMismatch {
                expected: self.kind().as_str(),
                found: record.kind().as_str(),
            }),
        }
    }

    /// Point lookup.
    ///
    /// Range kinds take an integer key. `time` defaults to now for the
    /// temporal kinds. Sessions answer `true` when a session covers `time`.
    pub fn get(&self, key: &Val, time: Option<i64>) -> StoreResult<Option<Val>> {
        match self {
            PlanBDb::State(db) => db.get(key),
            PlanBDb::TemporalState(db) => db.get_at(key, time.unwrap_or_else(now_ms)),
            PlanBDb::RangeState(db) => db.get_containing(range_key(key)?),
            PlanBDb::TemporalRangeState(db) => {
                db.get_at(range_key(key)?, time.unwrap_or_else(now_ms))
            }
            PlanBDb::Session(db) => Ok(db
                .in_session(key, time.unwrap_or_else(now_ms))?
                .then_some(Val::Boolean(true))),
        }
    }

    /// Searches with the built-in expression language.
    pub fn search(
        &self,
        criteria: &Expression,
        field_index: &FieldIndex,
        settings: &DateTimeSettings,
        consumer: &mut dyn FnMut(Vec<Val>),
    ) -> StoreResult<u64> {
        self.search_with(&ExpressionPredicateFactory, criteria, field_index, settings, consumer)
    }

    /// Searches with predicates built by `factory`.
    pub fn search_with(
        &self,
        factory: &dyn PredicateFactory,
        criteria: &Expression,
        field_index: &FieldIndex,
        settings: &DateTimeSettings,
        consumer: &mut dyn FnMut(Vec<Val>),
    ) -> StoreResult<u64> {
        let predicate = factory.create(criteria, settings)?;
        each_db!(self, db => db.search(predicate.as_ref(), field_index, consumer))
    }

    pub fn merge(&self, source: SourceDir) -> StoreResult<MergeStats> {
        each_db!(self, db => db.merge(source))
    }

    pub fn delete_old_data(&self, cutoff: i64, use_alternate_time: bool) -> StoreResult<RetentionStats> {
        each_db!(self, db => db.delete_old_data(cutoff, use_alternate_time))
    }

    pub fn condense(&self, cutoff: i64) -> StoreResult<u64> {
        each_db!(self, db => db.condense(cutoff))
    }
}

fn range_key(key: &Val) -> StoreResult<i64> {
    key.as_i64().ok_or_else(|| {
        StoreError::invalid_query(format!("range stores take integer keys, got '{}'", key))
    })
}
