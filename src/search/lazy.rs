//! Row over an encoded record that decodes on demand

use std::cell::{OnceCell, RefCell};

use crate::codec::{CodecError, CodecResult, Val};
use crate::env::Txn;
use crate::store::schema::{split_value, Schema, INSERT_TIME_FIELD};

use super::Row;

/// One stored record seen through its schema
///
/// The key is decoded at most once, on the first key field read, and the
/// value likewise. The first decode failure is kept for the caller.
pub struct LazyKv<'a, S: Schema> {
    schema: &'a S,
    txn: &'a dyn Txn,
    key_bytes: &'a [u8],
    stored: &'a [u8],
    key: OnceCell<Option<S::Key>>,
    value: OnceCell<Option<S::Value>>,
    error: RefCell<Option<CodecError>>,
}

impl<'a, S: Schema> LazyKv<'a, S> {
    pub fn new(schema: &'a S, txn: &'a dyn Txn, key_bytes: &'a [u8], stored: &'a [u8]) -> Self {
        Self {
            schema,
            txn,
            key_bytes,
            stored,
            key: OnceCell::new(),
            value: OnceCell::new(),
            error: RefCell::new(None),
        }
    }

    pub fn decoded_key(&self) -> Option<&S::Key> {
        self.key
            .get_or_init(|| self.keep(self.schema.read_key(self.txn, self.key_bytes)))
            .as_ref()
    }

    pub fn decoded_value(&self) -> Option<&S::Value> {
        self.value
            .get_or_init(|| {
                let decoded = split_value(self.stored)
                    .and_then(|(_, column)| self.schema.read_value(self.txn, column));
                self.keep(decoded)
            })
            .as_ref()
    }

    pub fn insert_time(&self) -> Option<i64> {
        let decoded = split_value(self.stored).map(|(time, _)| time);
        self.keep(decoded)
    }

    pub fn is_key_decoded(&self) -> bool {
        self.key.get().is_some()
    }

    pub fn is_value_decoded(&self) -> bool {
        self.value.get().is_some()
    }

    /// The first decode failure, if any.
    pub fn take_error(&self) -> CodecResult<()> {
        match self.error.borrow_mut().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn keep<T>(&self, result: CodecResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.error.borrow_mut().get_or_insert(e);
                None
            }
        }
    }
}

impl<S: Schema> Row for LazyKv<'_, S> {
    fn value(&self, field: &str) -> Option<Val> {
        if field == INSERT_TIME_FIELD {
            return self.insert_time().map(Val::Long);
        }
        if self.schema.is_key_field(field) {
            return self.schema.key_field(self.decoded_key()?, field);
        }
        self.schema.value_field(self.decoded_value()?, field)
    }
}
