//! Versioned multi-provider file store.
//!
//! [`FileStore`] is the public surface: it writes content once under a
//! stable [`FileRef`](strata_common::FileRef), keeps its version history in
//! the index, and can later fetch, relocate, migrate or delete it without
//! the caller knowing which backend currently holds the bytes.
//!
//! # Example
//! ```no_run
//! use strata_store::{FileStore, StoreConfig, UpsertRequest};
//!
//! # async fn example() -> strata_common::Result<()> {
//! let store = FileStore::open_default(StoreConfig::default())?;
//! let file_ref = store
//!     .upsert(UpsertRequest::new("A/B/report.pdf", b"%PDF".to_vec()))
//!     .await?;
//! if let Some(file_ref) = file_ref {
//!     let latest = store.fetch(&file_ref, 0).await?;
//!     assert!(latest.is_some());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod report;
pub mod store;


pub use config::{ProviderConfig, StoreConfig};
pub use report::{OperationReport, ReindexSummary};
pub use store::{FileStore, UpsertRequest};
