//! Scheduled retention and condense over every configured store
//!
//! For each document with retention or condense enabled, opens
//! `stores/<name>` and:
//! 1. Deletes records older than the retention duration, then sweeps
//!    unreferenced lookup entries
//! 2. Condenses records older than the condense duration
//!
//! Stores that were never written are skipped. A failure in one store is
//! recorded in its report and does not stop the others.

use std::path::Path;

use serde::Serialize;
use tracing::{error, info};

use crate::doc::StoreDoc;
use crate::store::{PlanBDb, RetentionStats, StoreResult};

/// What maintenance did to one store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condensed: Option<u64>,
    /// No store directory exists yet
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs retention and condense for every document, as of `now_ms`.
pub fn run(docs: &[StoreDoc], stores_dir: &Path, now_ms: i64) -> Vec<MaintenanceReport> {
    docs.iter()
        .filter(|doc| wants_maintenance(doc))
        .map(|doc| {
            let mut report = MaintenanceReport {
                name: doc.name.clone(),
                ..MaintenanceReport::default()
            };
            let dir = stores_dir.join(&doc.name);
            if !dir.is_dir() {
                report.skipped = true;
                return report;
            }
            if let Err(e) = maintain(doc, &dir, now_ms, &mut report) {
                error!(doc = %doc.name, code = e.code(), error = %e, "Maintenance failed");
                report.error = Some(e.to_string());
            }
            report
        })
        .collect()
}

fn wants_maintenance(doc: &StoreDoc) -> bool {
    let settings = &doc.settings;
    settings.retention.as_ref().is_some_and(|r| r.enabled)
        || settings.condense.as_ref().is_some_and(|c| c.enabled)
}

fn maintain(doc: &StoreDoc, dir: &Path, now_ms: i64, report: &mut MaintenanceReport) -> StoreResult<()> {
    let db = PlanBDb::open(doc, dir, false)?;

    if let Some(retention) = doc.settings.retention.as_ref().filter(|r| r.enabled) {
        let cutoff = retention.duration.before(now_ms);
        report.retention = Some(db.delete_old_data(cutoff, retention.use_alternate_time)?);
    }
    if let Some(condense) = doc.settings.condense.as_ref().filter(|c| c.enabled) {
        let cutoff = condense.duration.before(now_ms);
        report.condensed = Some(db.condense(cutoff)?);
    }

    info!(doc = %doc.name, records = db.count(), "Maintenance complete");
    Ok(())
}
