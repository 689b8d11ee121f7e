//! Lookup tables: deduplicated storage for byte strings referenced by
//! fixed-width surrogates
//!
//! Entries are only ever added by writes and only ever removed by the
//! retention sweep. Every lookup mutation happens inside the write
//! transaction of the record mutation that needed it.

pub mod hash;
pub mod uid;

pub use hash::HashLookupDb;
pub use uid::UidLookupDb;

/// Table holding per-lookup sequence counters
pub const META_TABLE: &str = "lookup_meta";
