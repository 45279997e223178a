//! Storage provider abstraction for Strata.
//!
//! This crate defines the capability contract every physical backend
//! implements (filesystem share, object store, document vault) and the
//! registry that brings configured backends online lazily.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific logic above this crate
//! - Async operations: all I/O operations are async
//! - One fallible factory per kind: a handle is either ready or absent
//! - Unified error semantics: whole-backend outages surface as
//!   `Error::ProviderUnavailable`

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{DiscoveryStream, ProviderSettings, StorageProvider};
pub use registry::{
    create_default_registry, provider_factory, InitOutcome, ProviderFactory, ProviderRegistry,
};
