//! Point state: one value per key

use crate::codec::{CodecResult, Val};
use crate::env::{Txn, WriteTxn};

use super::db::Db;
use super::schema::{Columns, Schema, SchemaInfo};

const FIELDS: &[&str] = &["key", "value", "insertTime"];

#[derive(Debug, Clone)]
pub struct StateSchema {
    columns: Columns,
}

impl Schema for StateSchema {
    type Key = Val;
    type Value = Val;

    fn from_info(info: &SchemaInfo) -> Self {
        Self {
            columns: Columns::new(info),
        }
    }

    fn columns(&self) -> &Columns {
        &self.columns
    }

    fn write_key(&self, txn: &mut WriteTxn, key: &Val) -> CodecResult<Vec<u8>> {
        self.columns.key()?.write(txn, key)
    }

    fn key_for_get(&self, txn: &dyn Txn, key: &Val) -> CodecResult<Option<Vec<u8>>> {
        self.columns.key()?.to_buffer_for_get(txn, key)
    }

    fn read_key(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        self.columns.key()?.read(txn, bytes)
    }

    fn record_time(&self, _key: &[u8]) -> CodecResult<Option<i64>> {
        Ok(None)
    }

    fn write_value(&self, txn: &mut WriteTxn, value: &Val) -> CodecResult<Vec<u8>> {
        self.columns.value()?.write(txn, value)
    }

    fn read_value(&self, txn: &dyn Txn, bytes: &[u8]) -> CodecResult<Val> {
        self.columns.value()?.read(txn, bytes)
    }

    fn fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    fn is_key_field(&self, field: &str) -> bool {
        field == "key"
    }

    fn key_field(&self, key: &Val, field: &str) -> Option<Val> {
        (field == "key").then(|| key.clone())
    }

    fn value_field(&self, value: &Val, field: &str) -> Option<Val> {
        (field == "value").then(|| value.clone())
    }
}

pub type StateDb = Db<StateSchema>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataType;
    use crate::doc::{StoreDoc, StoreKind, StoreSettings};
    use crate::search::{FieldIndex, Row};
    use crate::store::db::DATA_TABLE;
    use crate::store::SourceDir;
    use tempfile::TempDir;

    fn doc(key_type: DataType, value_type: DataType) -> StoreDoc {
        StoreDoc::new("state", StoreKind::State, key_type, value_type)
    }

    fn open(dir: &std::path::Path, doc: &StoreDoc) -> StateDb {
        StateDb::open(dir, doc, false).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::Variable, DataType::Int));

        let mut writer = db.writer().unwrap();
        assert!(db.insert(&mut writer, &Val::from("a"), &Val::Int(1)).unwrap());
        assert!(db.insert(&mut writer, &Val::from("b"), &Val::Int(2)).unwrap());
        writer.close().unwrap();

        assert_eq!(db.get(&Val::from("a")).unwrap(), Some(Val::Int(1)));
        assert_eq!(db.get(&Val::from("b")).unwrap(), Some(Val::Int(2)));
        assert_eq!(db.get(&Val::from("c")).unwrap(), None);
        assert_eq!(db.count(), 2);
    }

    #[test]
    fn test_overwrite_policy() {
        let temp_dir = TempDir::new().unwrap();
        let keep = doc(DataType::String, DataType::Int).with_settings(StoreSettings {
            overwrite: false,
            ..StoreSettings::default()
        });
        let db = open(temp_dir.path(), &keep);

        let mut writer = db.writer().unwrap();
        assert!(db.insert(&mut writer, &Val::from("a"), &Val::Int(1)).unwrap());
        assert!(!db.insert(&mut writer, &Val::from("a"), &Val::Int(2)).unwrap());
        writer.close().unwrap();

        assert_eq!(db.get(&Val::from("a")).unwrap(), Some(Val::Int(1)));
    }

    #[test]
    fn test_long_key_goes_through_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::Variable, DataType::Variable));
        let long_key = Val::string("k".repeat(2_000));

        let mut writer = db.writer().unwrap();
        db.insert(&mut writer, &long_key, &Val::from("v")).unwrap();
        writer.close().unwrap();

        assert_eq!(db.get(&long_key).unwrap(), Some(Val::from("v")));
    }

    #[test]
    fn test_fixed_string_key_too_long() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::String, DataType::Int));

        let mut writer = db.writer().unwrap();
        let err = db
            .insert(&mut writer, &Val::string("k".repeat(600)), &Val::Int(1))
            .unwrap_err();
        assert_eq!(err.code(), "PLANB_ENV_KEY_TOO_LONG");
    }

    #[test]
    fn test_writer_from_other_store_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let a = open(&temp_dir.path().join("a"), &doc(DataType::String, DataType::Int));
        let b = open(&temp_dir.path().join("b"), &doc(DataType::String, DataType::Int));

        let mut writer = a.writer().unwrap();
        let err = b.insert(&mut writer, &Val::from("x"), &Val::Int(1)).unwrap_err();
        assert_eq!(err.code(), "PLANB_STORE_WRITER_MISMATCH");
    }

    #[test]
    fn test_reopen_with_other_schema_fails() {
        let temp_dir = TempDir::new().unwrap();
        drop(open(temp_dir.path(), &doc(DataType::String, DataType::Int)));

        let err = StateDb::open(temp_dir.path(), &doc(DataType::String, DataType::Long), false)
            .err()
            .unwrap();
        assert_eq!(err.code(), "PLANB_STORE_SCHEMA_MISMATCH");
    }

    #[test]
    fn test_search_decodes_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::String, DataType::Int));

        let mut writer = db.writer().unwrap();
        for (k, v) in [("web-1", 1), ("web-2", 2), ("db-1", 3)] {
            db.insert(&mut writer, &Val::from(k), &Val::Int(v)).unwrap();
        }
        writer.close().unwrap();

        let predicate = |row: &dyn Row| {
            row.value("key")
                .is_some_and(|k| k.to_string().starts_with("web"))
        };
        let mut rows = Vec::new();
        let matched = db
            .search(&predicate, &FieldIndex::new(["value"]), &mut |r| rows.push(r))
            .unwrap();
        assert_eq!(matched, 2);
        assert_eq!(rows, vec![vec![Val::Int(1)], vec![Val::Int(2)]]);
    }

    #[test]
    fn test_merge_quick_path_honours_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let doc = doc(DataType::String, DataType::Int).with_settings(StoreSettings {
            overwrite: false,
            ..StoreSettings::default()
        });
        let source_path = temp_dir.path().join("source");
        {
            let source = open(&source_path, &doc);
            let mut writer = source.writer().unwrap();
            source.insert(&mut writer, &Val::from("a"), &Val::Int(10)).unwrap();
            source.insert(&mut writer, &Val::from("b"), &Val::Int(20)).unwrap();
        }

        let dest = open(&temp_dir.path().join("dest"), &doc);
        let mut writer = dest.writer().unwrap();
        dest.insert(&mut writer, &Val::from("a"), &Val::Int(1)).unwrap();
        writer.close().unwrap();

        let stats = dest.merge(SourceDir::new(&source_path)).unwrap();
        assert_eq!(stats.quick, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.slow, 0);
        assert!(!source_path.exists());

        assert_eq!(dest.get(&Val::from("a")).unwrap(), Some(Val::Int(1)));
        assert_eq!(dest.get(&Val::from("b")).unwrap(), Some(Val::Int(20)));
    }

    #[test]
    fn test_merge_rejects_other_schema() {
        let temp_dir = TempDir::new().unwrap();
        let source_path = temp_dir.path().join("source");
        drop(open(&source_path, &doc(DataType::String, DataType::Long)));

        let dest = open(&temp_dir.path().join("dest"), &doc(DataType::String, DataType::Int));
        let err = dest.merge(SourceDir::new(&source_path)).unwrap_err();
        assert_eq!(err.code(), "PLANB_STORE_SCHEMA_MISMATCH");
        assert!(source_path.exists());
    }

    #[test]
    fn test_retention_by_insert_time() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::Variable, DataType::Variable));

        let old_value = Val::string("o".repeat(100));
        let new_value = Val::string("n".repeat(100));
        let mut writer = db.writer().unwrap();
        db.insert_at(&mut writer, &Val::from("old"), &old_value, 1_000).unwrap();
        db.insert_at(&mut writer, &Val::from("new"), &new_value, 5_000).unwrap();
        writer.close().unwrap();

        let stats = db.delete_old_data(2_000, false).unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.swept, 1);
        assert_eq!(db.get(&Val::from("old")).unwrap(), None);
        assert_eq!(db.get(&Val::from("new")).unwrap(), Some(new_value));

        let read = db.env().begin_read();
        assert_eq!(read.entries(DATA_TABLE), 1);
        assert_eq!(db.schema().columns().value.as_ref().unwrap().uid_lookup().len(&read), 1);
    }

    #[test]
    fn test_condense_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(temp_dir.path(), &doc(DataType::String, DataType::Int));
        let mut writer = db.writer().unwrap();
        db.insert_at(&mut writer, &Val::from("a"), &Val::Int(1), 0).unwrap();
        writer.close().unwrap();

        assert_eq!(db.condense(i64::MAX).unwrap(), 0);
        assert_eq!(db.count(), 1);
    }
}
