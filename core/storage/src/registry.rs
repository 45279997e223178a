//! Provider registry with lazy, memoized initialization.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use strata_common::{Error, ProviderKind, Result};

use crate::local::LocalProvider;
use crate::provider::{ProviderSettings, StorageProvider};

/// Factory function type for creating ready providers.
///
/// A factory performs whatever readiness probe its backend needs and
/// either returns a usable handle or an error; there is no separate
/// initialization step.
pub type ProviderFactory =
    Box<dyn Fn(ProviderSettings) -> BoxFuture<'static, Result<Arc<dyn StorageProvider>>> + Send + Sync>;

/// Wrap an async constructor into a [`ProviderFactory`].
pub fn provider_factory<F, Fut>(build: F) -> ProviderFactory
where
    F: Fn(ProviderSettings) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn StorageProvider>>> + Send + 'static,
{
    Box::new(move |settings| build(settings).boxed())
}

/// Memoized result of bringing a provider online.
#[derive(Clone)]
pub struct InitOutcome {
    handle: Option<Arc<dyn StorageProvider>>,
    diagnostics: Vec<String>,
}

impl InitOutcome {
    /// Whether the provider came up.
    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    /// Messages explaining why initialization failed.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

impl fmt::Debug for InitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitOutcome")
            .field("ready", &self.is_ready())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// A registered provider and its one-shot initialization result.
struct ProviderSlot {
    settings: ProviderSettings,
    outcome: OnceCell<InitOutcome>,
}

/// Registry of configured storage providers.
///
/// Factories are looked up in an explicit kind-to-factory map. Slots are
/// plain data until first use: the first [`ProviderRegistry::resolve`] for a
/// kind runs its factory once and caches the outcome for the lifetime of
/// the registry. A failed initialization is not retried.
///
/// The index-embedded `Database` backend needs no handle and is always
/// available.
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, ProviderFactory>,
    slots: HashMap<ProviderKind, ProviderSlot>,
}

impl ProviderRegistry {
    /// Create a new registry with no factories.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            slots: HashMap::new(),
        }
    }

    /// Register the factory that builds handles for `kind`.
    ///
    /// # Errors
    /// - `kind` is `Database`
    /// - A factory for `kind` is already registered
    pub fn register_factory(&mut self, kind: ProviderKind, factory: ProviderFactory) -> Result<()> {
        if kind.is_embedded() {
            return Err(Error::InvalidInput(
                "The database provider is built in".to_string(),
            ));
        }
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Factory for '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Register a provider configuration. Performs no I/O.
    ///
    /// # Errors
    /// - `kind` is `Database`
    /// - `kind` is already registered
    pub fn register(
        &mut self,
        kind: ProviderKind,
        config: Value,
        max_versions: Option<u32>,
        app_prefix: Option<String>,
    ) -> Result<()> {
        if kind.is_embedded() {
            return Err(Error::InvalidInput(
                "The database provider is always available".to_string(),
            ));
        }
        if self.slots.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                kind
            )));
        }

        let settings = ProviderSettings {
            kind,
            config,
            max_versions,
            app_prefix,
        };
        self.slots.insert(
            kind,
            ProviderSlot {
                settings,
                outcome: OnceCell::new(),
            },
        );
        Ok(())
    }

    /// Check if a provider has been brought online successfully.
    pub fn is_available(&self, kind: ProviderKind) -> bool {
        if kind.is_embedded() {
            return true;
        }
        self.slots
            .get(&kind)
            .and_then(|slot| slot.outcome.get())
            .map_or(false, InitOutcome::is_ready)
    }

    /// Resolve a ready handle for `kind`, initializing it on first use.
    ///
    /// Returns `None` for `Database` (no handle needed), for unregistered
    /// kinds, and for providers whose initialization failed.
    pub async fn resolve(&self, kind: ProviderKind) -> Option<Arc<dyn StorageProvider>> {
        let slot = self.slots.get(&kind)?;
        let outcome = slot
            .outcome
            .get_or_init(|| self.initialize(&slot.settings))
            .await;
        outcome.handle.clone()
    }

    /// Like [`ProviderRegistry::resolve`], but explains a missing handle.
    pub async fn require(&self, kind: ProviderKind) -> Result<Arc<dyn StorageProvider>> {
        if kind.is_embedded() {
            return Err(Error::InvalidInput(
                "The database provider has no external handle".to_string(),
            ));
        }
        match self.resolve(kind).await {
            Some(handle) => Ok(handle),
            None => {
                let diagnostics = self.diagnostics(kind);
                let reason = if diagnostics.is_empty() {
                    "not registered".to_string()
                } else {
                    diagnostics.join("; ")
                };
                Err(Error::ProviderUnavailable(format!("{}: {}", kind, reason)))
            }
        }
    }

    async fn initialize(&self, settings: &ProviderSettings) -> InitOutcome {
        let kind = settings.kind;
        let Some(factory) = self.factories.get(&kind) else {
            warn!(provider = %kind, "No factory registered for provider");
            return InitOutcome {
                handle: None,
                diagnostics: vec![format!("no factory registered for '{}'", kind)],
            };
        };

        match factory(settings.clone()).await {
            Ok(handle) => {
                info!(provider = %kind, backend = handle.name(), "Provider initialized");
                InitOutcome {
                    handle: Some(handle),
                    diagnostics: Vec::new(),
                }
            }
            Err(e) => {
                warn!(provider = %kind, error = %e, "Provider initialization failed");
                InitOutcome {
                    handle: None,
                    diagnostics: vec![e.to_string()],
                }
            }
        }
    }

    /// Diagnostics recorded by the initialization attempt, if any.
    pub fn diagnostics(&self, kind: ProviderKind) -> Vec<String> {
        self.slots
            .get(&kind)
            .and_then(|slot| slot.outcome.get())
            .map(|outcome| outcome.diagnostics.clone())
            .unwrap_or_default()
    }

    /// Settings a kind was registered with.
    pub fn settings(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.slots.get(&kind).map(|slot| &slot.settings)
    }

    /// Retention count configured for a kind.
    pub fn slot_max_versions(&self, kind: ProviderKind) -> Option<u32> {
        self.settings(kind).and_then(|settings| settings.max_versions)
    }

    /// Kinds with a registered configuration.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.slots.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.id());
        kinds
    }

    /// Check if a factory exists for a kind.
    pub fn has_factory(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in factories.
///
/// Only the filesystem provider ships with the crate; object-store and
/// document-vault integrations are registered by the deployer through
/// [`ProviderRegistry::register_factory`].
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.factories.insert(
        ProviderKind::FileSystem,
        provider_factory(|settings| async move {
            let provider = LocalProvider::connect(settings).await?;
            Ok::<_, Error>(Arc::new(provider) as Arc<dyn StorageProvider>)
        }),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn memory_factory(calls: Arc<AtomicUsize>) -> ProviderFactory {
        provider_factory(move |settings| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let provider: Arc<dyn StorageProvider> =
                    Arc::new(MemoryProvider::from_settings(&settings));
                Ok::<_, Error>(provider)
            }
        })
    }

    fn failing_factory(calls: Arc<AtomicUsize>) -> ProviderFactory {
        provider_factory(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<Arc<dyn StorageProvider>, _>(Error::Configuration(
                    "missing credentials".to_string(),
                ))
            }
        })
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();
        registry
            .register_factory(ProviderKind::ObjectStore, memory_factory(calls.clone()))
            .unwrap();
        registry
            .register(ProviderKind::ObjectStore, json!({}), Some(3), None)
            .unwrap();

        assert!(!registry.is_available(ProviderKind::ObjectStore));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let provider = registry.resolve(ProviderKind::ObjectStore).await.unwrap();
        assert_eq!(provider.name(), "memory");
        assert!(registry.is_available(ProviderKind::ObjectStore));
        assert_eq!(registry.slot_max_versions(ProviderKind::ObjectStore), Some(3));

        registry.resolve(ProviderKind::ObjectStore).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();
        registry
            .register_factory(ProviderKind::DocumentVault, failing_factory(calls.clone()))
            .unwrap();
        registry
            .register(ProviderKind::DocumentVault, json!({}), None, None)
            .unwrap();

        assert!(registry.resolve(ProviderKind::DocumentVault).await.is_none());
        assert!(registry.resolve(ProviderKind::DocumentVault).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_available(ProviderKind::DocumentVault));

        let diagnostics = registry.diagnostics(ProviderKind::DocumentVault);
        assert!(diagnostics[0].contains("missing credentials"));

        let err = registry.require(ProviderKind::DocumentVault).await.err().unwrap();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderKind::FileSystem, json!({}), None, None)
            .unwrap();
        let result = registry.register(ProviderKind::FileSystem, json!({}), None, None);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register_factory(ProviderKind::ObjectStore, memory_factory(calls.clone()))
            .unwrap();
        let result = registry.register_factory(ProviderKind::ObjectStore, memory_factory(calls));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_database_is_builtin() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_available(ProviderKind::Database));
        assert!(registry.resolve(ProviderKind::Database).await.is_none());
        assert!(registry
            .register(ProviderKind::Database, json!({}), None, None)
            .is_err());
    }

    #[tokio::test]
    async fn test_unregistered_kind() {
        let registry = create_default_registry();
        assert!(registry.resolve(ProviderKind::ObjectStore).await.is_none());
        assert!(!registry.is_available(ProviderKind::ObjectStore));
        let err = registry.require(ProviderKind::ObjectStore).await.err().unwrap();
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn test_missing_factory_reported() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderKind::ObjectStore, json!({}), None, None)
            .unwrap();
        assert!(registry.resolve(ProviderKind::ObjectStore).await.is_none());
        assert!(registry.diagnostics(ProviderKind::ObjectStore)[0].contains("no factory"));
    }

    #[tokio::test]
    async fn test_default_registry_filesystem() {
        let temp = TempDir::new().unwrap();
        let mut registry = create_default_registry();
        assert!(registry.has_factory(ProviderKind::FileSystem));
        registry
            .register(
                ProviderKind::FileSystem,
                json!({ "root": temp.path().to_string_lossy() }),
                None,
                None,
            )
            .unwrap();

        let provider = registry.resolve(ProviderKind::FileSystem).await.unwrap();
        assert_eq!(provider.kind(), ProviderKind::FileSystem);
        assert_eq!(registry.kinds(), vec![ProviderKind::FileSystem]);
    }

    #[tokio::test]
    async fn test_filesystem_bad_config_marks_unavailable() {
        let mut registry = create_default_registry();
        registry
            .register(ProviderKind::FileSystem, json!({}), None, None)
            .unwrap();

        assert!(registry.resolve(ProviderKind::FileSystem).await.is_none());
        assert!(!registry.is_available(ProviderKind::FileSystem));
        assert!(registry.diagnostics(ProviderKind::FileSystem)[0].contains("root"));
    }
}
