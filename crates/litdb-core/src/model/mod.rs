//! Domain types shared by the store and the search crate.

pub mod record;

pub use record::{
    Candidate, Record, StoredRecord, normalize_identifier, validate_vector,
};
