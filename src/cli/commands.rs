//! CLI command implementations
//!
//! Each command returns the `data` of its JSON response; [`run_command`]
//! writes it, or the error, to stdout.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::codec::DataType;
use crate::config::PlanBConfig;
use crate::doc::StoreDoc;
use crate::maintenance;
use crate::observability::{init_logging, metrics};
use crate::search::{Expression, FieldIndex};
use crate::shard::{LoggingErrorSink, MergeProcessor};
use crate::store::{now_ms, PlanBDb, SchemaInfo, StoreError};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_error, write_response};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    init_logging(cli.log_json);
    run_command(cli.command)
}

/// Run a command and write its response
pub fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::Inspect { store_dir } => inspect(&store_dir),
        Command::Get {
            config,
            doc,
            key,
            time,
        } => get(&PlanBConfig::load(&config)?, &doc, &key, time.as_deref()),
        Command::Search {
            config,
            doc,
            fields,
            limit,
        } => {
            let config = PlanBConfig::load(&config)?;
            let criteria: Expression = serde_json::from_value(read_request()?)?;
            search(&config, &doc, &criteria, &fields, limit)
        }
        Command::MergePending { config } => merge_pending(&PlanBConfig::load(&config)?),
        Command::Maintain { config, now } => maintain(&PlanBConfig::load(&config)?, now.as_deref()),
    };

    match result {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code(), &e.to_string())?;
            Err(e)
        }
    }
}

/// Describes a store directory from its schema file alone.
pub fn inspect(store_dir: &Path) -> CliResult<Value> {
    let info = SchemaInfo::load(store_dir)?.ok_or_else(|| {
        CliError::invalid_argument(format!("{} holds no store", store_dir.display()))
    })?;
    let name = store_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut doc = StoreDoc::new(
        name,
        info.kind,
        info.key_type.unwrap_or(DataType::Variable),
        info.value_type.unwrap_or(DataType::Variable),
    );
    doc.hash_length = info.hash_length;

    let db = PlanBDb::open(&doc, store_dir, true)?;
    Ok(json!({
        "name": db.name(),
        "schema": db.info(),
        "records": db.count(),
        "fields": db.fields(),
        "env": db.env().stat(),
    }))
}

/// Looks up one key as of `time`.
pub fn get(config: &PlanBConfig, doc_name: &str, key: &str, time: Option<&str>) -> CliResult<Value> {
    let doc = find_doc(config, doc_name)?;
    let key_type = if doc.kind.has_key_column() {
        doc.key_type
    } else {
        DataType::Long
    };
    let key = key_type.parse_val(key).map_err(StoreError::from)?;
    let time = time
        .map(|t| config.date_time.parse_millis(t))
        .transpose()?;

    let dir = config.stores_dir().join(&doc.name);
    let value = if dir.is_dir() {
        PlanBDb::open(doc, &dir, true)?.get(&key, time)?
    } else {
        None
    };
    Ok(json!({ "doc": doc.name, "key": key, "value": value }))
}

/// Returns the rows of a store matching `criteria`.
pub fn search(
    config: &PlanBConfig,
    doc_name: &str,
    criteria: &Expression,
    fields: &[String],
    limit: Option<usize>,
) -> CliResult<Value> {
    let doc = find_doc(config, doc_name)?;
    let dir = config.stores_dir().join(&doc.name);
    if !dir.is_dir() {
        return Ok(json!({ "doc": doc.name, "fields": fields, "matched": 0, "rows": [] }));
    }

    let db = PlanBDb::open(doc, &dir, true)?;
    let field_index = if fields.is_empty() {
        FieldIndex::new(db.fields().iter().copied())
    } else {
        FieldIndex::new(fields.iter().cloned())
    };

    let mut rows = Vec::new();
    let matched = db.search(criteria, &field_index, &config.date_time, &mut |row| {
        if limit.map_or(true, |l| rows.len() < l) {
            rows.push(row);
        }
    })?;
    Ok(json!({
        "doc": doc.name,
        "fields": field_index.fields(),
        "matched": matched,
        "rows": rows,
    }))
}

/// Merges every staged archive under the receive directory.
pub fn merge_pending(config: &PlanBConfig) -> CliResult<Value> {
    let processor = MergeProcessor::new(
        config.stores_dir(),
        config.receive_dir(),
        config.staging_dir(),
        Arc::new(config.registry()),
        Arc::new(LoggingErrorSink),
    );
    let report = processor.merge_pending()?;
    info!(
        node = %config.node_id,
        archives = report.archives.len(),
        failed = report.failed,
        "Pending merge complete"
    );
    Ok(json!({ "report": report, "metrics": metrics().snapshot() }))
}

/// Applies retention and condense as of `now`.
pub fn maintain(config: &PlanBConfig, now: Option<&str>) -> CliResult<Value> {
    let now = match now {
        Some(text) => config.date_time.parse_millis(text)?,
        None => now_ms(),
    };
    let reports = maintenance::run(&config.docs, &config.stores_dir(), now);
    info!(node = %config.node_id, stores = reports.len(), "Maintenance run complete");
    Ok(json!({ "now": now, "stores": reports }))
}

fn find_doc<'a>(config: &'a PlanBConfig, name: &str) -> CliResult<&'a StoreDoc> {
    config
        .doc(name)
        .ok_or_else(|| CliError::UnknownDoc(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Val;
    use crate::doc::StoreKind;
    use crate::search::Condition;
    use crate::store::{KeyRange, Record};
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> PlanBConfig {
        PlanBConfig {
            data_dir: temp_dir.path().to_path_buf(),
            docs: vec![
                StoreDoc::new("hosts", StoreKind::State, DataType::String, DataType::Int),
                StoreDoc::new("ranges", StoreKind::RangeState, DataType::Long, DataType::String),
            ],
            ..PlanBConfig::default()
        }
    }

    fn populate(config: &PlanBConfig) {
        let hosts = PlanBDb::open(&config.docs[0], &config.stores_dir().join("hosts"), false).unwrap();
        let mut writer = hosts.writer().unwrap();
        for (key, value) in [("web-1", 1), ("web-2", 2), ("db-1", 3)] {
            let record = Record::State {
                key: Val::from(key),
                value: Val::Int(value),
            };
            hosts.insert(&mut writer, &record).unwrap();
        }
        writer.close().unwrap();

        let ranges = PlanBDb::open(&config.docs[1], &config.stores_dir().join("ranges"), false).unwrap();
        let mut writer = ranges.writer().unwrap();
        let record = Record::RangeState {
            key: KeyRange::new(10, 20),
            value: Val::from("teens"),
        };
        ranges.insert(&mut writer, &record).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_get() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        populate(&config);

        let data = get(&config, "hosts", "web-2", None).unwrap();
        assert_eq!(data["value"], 2);
        let data = get(&config, "ranges", "15", None).unwrap();
        assert_eq!(data["value"], "teens");
        let data = get(&config, "hosts", "nope", None).unwrap();
        assert!(data["value"].is_null());

        let err = get(&config, "ranges", "fifteen", None).unwrap_err();
        assert_eq!(err.code(), "PLANB_CODEC_DECODE");
        let err = get(&config, "missing", "a", None).unwrap_err();
        assert_eq!(err.code(), "PLANB_CLI_UNKNOWN_DOC");
    }

    #[test]
    fn test_search_with_limit() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        populate(&config);

        let criteria = Expression::term("key", Condition::Contains, "web");
        let data = search(&config, "hosts", &criteria, &["key".to_string()], None).unwrap();
        assert_eq!(data["matched"], 2);
        assert_eq!(data["rows"], json!([["web-1"], ["web-2"]]));

        let data = search(&config, "hosts", &Expression::All, &[], Some(1)).unwrap();
        assert_eq!(data["matched"], 3);
        assert_eq!(data["rows"].as_array().unwrap().len(), 1);
        assert_eq!(data["fields"][0], "key");
    }

    #[test]
    fn test_inspect() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        populate(&config);

        let data = inspect(&config.stores_dir().join("hosts")).unwrap();
        assert_eq!(data["name"], "hosts");
        assert_eq!(data["records"], 3);
        assert_eq!(data["schema"]["kind"], "STATE");

        let err = inspect(temp_dir.path()).unwrap_err();
        assert_eq!(err.code(), "PLANB_CLI_INVALID_ARGUMENT");
    }

    #[test]
    fn test_merge_pending_and_maintain_on_empty_node() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);

        let data = merge_pending(&config).unwrap();
        assert_eq!(data["report"]["failed"], 0);
        assert_eq!(data["report"]["archives"], json!([]));

        let data = maintain(&config, Some("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(data["now"], 1_704_067_200_000i64);
        assert_eq!(data["stores"], json!([]));
    }
}
