//! Binary encoding of keys and values
//!
//! Every store column has a [`DataType`]. [`ValSerde`] turns [`Val`]s of that
//! type into bytes and back, routing long values through the lookup tables.

pub mod data_type;
pub mod errors;
pub mod sortable;
pub mod val;
pub mod val_serde;

pub use data_type::{DataType, HashLength, KeyType, ValueType};
pub use errors::{CodecError, CodecResult};
pub use val::{Val, ValType};
pub use val_serde::{
    variable_tag_for, UsedLookupsRecorder, ValSerde, VariableTag, UID_LOOKUP_THRESHOLD,
    USE_HASH_LOOKUP_THRESHOLD,
};
