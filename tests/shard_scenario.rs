//! Shard Ingest, Ship and Merge Tests
//!
//! End to end: records are written into shards, each shard is archived and
//! handed to a transport, and the receiving side merges the archives into
//! its stores.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use planb::codec::{DataType, Val};
use planb::doc::{DocRegistry, StoreDoc, StoreKind, StoreSettings};
use planb::shard::{
    CollectingErrorSink, DirectoryTransport, FileDescriptor, MergeProcessor, ShardManager,
    ShardResult, ShardTransport,
};
use planb::store::{KeyRange, PlanBDb, Record, SessionKey, TemporalKey};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Copies each archive somewhere else, as a network hop would
struct CopyingTransport {
    outbox: PathBuf,
    calls: Mutex<Vec<(FileDescriptor, PathBuf, bool)>>,
}

impl ShardTransport for CopyingTransport {
    fn store_part(&self, descriptor: &FileDescriptor, archive: &Path, sync: bool) -> ShardResult<()> {
        fs::create_dir_all(&self.outbox).unwrap();
        let copy = self.outbox.join(format!("{}.tar.gz", descriptor.stem()));
        fs::copy(archive, &copy).unwrap();
        self.calls.lock().push((descriptor.clone(), copy, sync));
        Ok(())
    }
}

fn docs() -> Vec<StoreDoc> {
    vec![
        StoreDoc::new("hosts", StoreKind::State, DataType::Variable, DataType::Variable),
        StoreDoc::new("prices", StoreKind::TemporalState, DataType::String, DataType::Double),
        StoreDoc::new("ports", StoreKind::RangeState, DataType::Long, DataType::String),
        StoreDoc::new("logins", StoreKind::Session, DataType::String, DataType::Variable),
    ]
}

fn registry() -> Arc<DocRegistry> {
    Arc::new(DocRegistry::new(docs()))
}

fn long_name(i: usize) -> Val {
    Val::String(format!("{:0>600}", i))
}

fn batch_records(batch: usize) -> Vec<(&'static str, Record)> {
    let mut records = Vec::new();
    for i in 0..5 {
        let n = batch * 10 + i;
        records.push((
            "hosts",
            Record::State {
                key: long_name(n),
                value: Val::from(format!("host {}", n)),
            },
        ));
        records.push((
            "prices",
            Record::TemporalState {
                key: TemporalKey::new("gbp", n as i64 * 1_000),
                value: Val::Double(n as f64 / 10.0),
            },
        ));
    }
    records.push((
        "ports",
        Record::RangeState {
            key: KeyRange::new(batch as i64 * 100, batch as i64 * 100 + 99),
            value: Val::from(format!("block {}", batch)),
        },
    ));
    records.push(("logins", Record::Session(SessionKey::new("alice", batch as i64 * 10, batch as i64 * 10 + 5))));
    records
}

fn open_store(stores_dir: &Path, name: &str) -> PlanBDb {
    let doc = docs().into_iter().find(|d| d.name == name).unwrap();
    PlanBDb::open(&doc, &stores_dir.join(name), true).unwrap()
}

fn assert_batches_merged(stores_dir: &Path, batches: usize) {
    let hosts = open_store(stores_dir, "hosts");
    let prices = open_store(stores_dir, "prices");
    let ports = open_store(stores_dir, "ports");
    let logins = open_store(stores_dir, "logins");

    assert_eq!(hosts.count(), batches * 5);
    assert_eq!(prices.count(), batches * 5);
    assert_eq!(ports.count(), batches);
    assert_eq!(logins.count(), batches);

    for batch in 0..batches {
        let n = batch * 10 + 4;
        assert_eq!(
            hosts.get(&long_name(n), None).unwrap(),
            Some(Val::from(format!("host {}", n)))
        );
        assert_eq!(
            prices.get(&Val::from("gbp"), Some(n as i64 * 1_000 + 500)).unwrap(),
            Some(Val::Double(n as f64 / 10.0))
        );
        assert_eq!(
            ports.get(&Val::Long(batch as i64 * 100 + 50), None).unwrap(),
            Some(Val::from(format!("block {}", batch)))
        );
        assert_eq!(
            logins.get(&Val::from("alice"), Some(batch as i64 * 10 + 3)).unwrap(),
            Some(Val::Boolean(true))
        );
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map_or(true, |mut entries| entries.next().is_none())
}

// =============================================================================
// Ingest, Ship, Merge
// =============================================================================

#[test]
fn test_ingest_ship_merge() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let sink = Arc::new(CollectingErrorSink::new());
    let transport = Arc::new(CopyingTransport {
        outbox: root.join("outbox"),
        calls: Mutex::new(Vec::new()),
    });
    let manager = ShardManager::new(root.join("shards"), registry(), transport.clone(), sink.clone());

    let mut shard = manager.create_writer("batch-0").unwrap();
    for (doc, record) in batch_records(0) {
        assert!(shard.write(doc, &record).unwrap());
    }
    let descriptor = shard.close().unwrap().unwrap();

    // Shipped once, without a synchronous merge, and nothing left behind
    let calls = transport.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, descriptor);
    assert!(!calls[0].2);
    assert!(is_empty_dir(&root.join("shards")));

    let processor = MergeProcessor::new(
        root.join("stores"),
        root.join("receive"),
        root.join("staging"),
        registry(),
        sink.clone(),
    );
    let report = processor.merge_archive(&descriptor, &calls[0].1).unwrap();
    assert_eq!(report.owner_id, "batch-0");
    assert_eq!(report.merged.len(), 4);
    assert!(report.rejected.is_empty());
    assert!(report.merged["hosts"].slow > 0);
    assert_eq!(report.merged["ports"].quick, 1);

    assert!(is_empty_dir(&root.join("staging")));
    assert!(sink.reports().is_empty());
    assert_batches_merged(&root.join("stores"), 1);
}

#[test]
fn test_directory_transport_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let sink = Arc::new(CollectingErrorSink::new());
    let processor = Arc::new(MergeProcessor::new(
        root.join("stores"),
        root.join("receive"),
        root.join("staging"),
        registry(),
        sink.clone(),
    ));
    let manager = ShardManager::new(
        root.join("shards"),
        registry(),
        Arc::new(DirectoryTransport::new(processor.clone())),
        sink.clone(),
    );

    for batch in 0..3 {
        let mut shard = manager.create_writer(&format!("batch-{}", batch)).unwrap();
        for (doc, record) in batch_records(batch) {
            shard.write(doc, &record).unwrap();
        }
        // Unknown documents are reported and skipped
        assert!(!shard
            .write("unknown", &Record::Session(SessionKey::new("x", 0, 1)))
            .unwrap());
        shard.close().unwrap();
    }
    assert_eq!(processor.pending().unwrap().len(), 3);
    assert_eq!(sink.reports().len(), 3);

    let report = processor.merge_pending().unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(
        report.archives.iter().map(|a| a.owner_id.as_str()).collect::<Vec<_>>(),
        vec!["batch-0", "batch-1", "batch-2"]
    );

    assert!(processor.pending().unwrap().is_empty());
    assert!(is_empty_dir(&root.join("receive")));
    assert!(is_empty_dir(&root.join("staging")));
    assert!(is_empty_dir(&root.join("shards")));
    assert_batches_merged(&root.join("stores"), 3);
}

#[test]
fn test_synchronised_documents_merge_on_receipt() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut docs = docs();
    docs[0].settings = StoreSettings {
        synchronise_merge: true,
        ..StoreSettings::default()
    };
    let registry = Arc::new(DocRegistry::new(docs));
    let sink = Arc::new(CollectingErrorSink::new());
    let processor = Arc::new(MergeProcessor::new(
        root.join("stores"),
        root.join("receive"),
        root.join("staging"),
        registry.clone(),
        sink.clone(),
    ));
    let manager = ShardManager::new(
        root.join("shards"),
        registry,
        Arc::new(DirectoryTransport::new(processor.clone())),
        sink,
    );

    let mut shard = manager.create_writer("now").unwrap();
    for (doc, record) in batch_records(0) {
        shard.write(doc, &record).unwrap();
    }
    shard.close().unwrap();

    assert!(processor.pending().unwrap().is_empty());
    assert_batches_merged(&root.join("stores"), 1);
}

#[test]
fn test_unknown_store_in_archive_goes_to_sink() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let sink = Arc::new(CollectingErrorSink::new());
    let transport = Arc::new(CopyingTransport {
        outbox: root.join("outbox"),
        calls: Mutex::new(Vec::new()),
    });
    let manager = ShardManager::new(root.join("shards"), registry(), transport.clone(), sink.clone());

    let mut shard = manager.create_writer("batch-0").unwrap();
    for (doc, record) in batch_records(0) {
        shard.write(doc, &record).unwrap();
    }
    let descriptor = shard.close().unwrap().unwrap();
    let archive = transport.calls.lock()[0].1.clone();

    // The receiver only knows two of the four documents
    let known: Vec<StoreDoc> = docs().into_iter().take(2).collect();
    let processor = MergeProcessor::new(
        root.join("stores"),
        root.join("receive"),
        root.join("staging"),
        Arc::new(DocRegistry::new(known)),
        sink.clone(),
    );
    let report = processor.merge_archive(&descriptor, &archive).unwrap();

    assert_eq!(report.merged.keys().collect::<Vec<_>>(), vec!["hosts", "prices"]);
    assert_eq!(report.rejected, vec!["logins".to_string(), "ports".to_string()]);
    let reported: Vec<String> = sink.reports().into_iter().map(|(doc, _)| doc).collect();
    assert_eq!(reported, vec!["logins".to_string(), "ports".to_string()]);
    assert!(is_empty_dir(&root.join("staging")));
}
