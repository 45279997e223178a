//! Versioned metadata index for Strata.
//!
//! The index is the single source of truth for which
//! (FileRef, version, provider) triples exist. It is backed by SQLite and
//! never retries on its own: failures surface to the caller as they happen.

pub mod index;
mod schema;

pub use index::{IndexLocation, VersionedIndex};
pub use schema::validate_namespace;
