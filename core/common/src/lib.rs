//! Common types shared across the Strata crates.
//!
//! This crate holds the error taxonomy, the file record model and the
//! path canonicalization rules that every other layer builds on.

pub mod error;
pub mod mime;
pub mod path;
pub mod types;

pub use error::{Error, Result};
pub use path::PathInfo;
pub use types::{DiscoveredFile, FileRecord, FileRef, ProviderKind};
