//! Plugin code resolution.
//!
//! Plugin code is resolved by name from a catalog of factories. Compiled-in
//! plugins register a factory at startup; with the `dynamic` feature a
//! factory can also be backed by a shared library.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

use crate::host::panic_message;
use crate::traits::Plugin;

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Plugin name → factory.
#[derive(Default)]
pub struct PluginCatalog {
    factories: DashMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin name, replacing any earlier one.
    pub fn register(&self, name: impl Into<String>, factory: PluginFactory) {
        let name = name.into();
        debug!(plugin = %name, "Plugin factory registered");
        self.factories.insert(name, factory);
    }

    /// Register a closure as a factory.
    pub fn register_fn<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(factory));
    }

    /// Load a shared library exporting `plexus_plugin_create` and register
    /// it under `name`.
    ///
    /// # Safety
    /// Runs arbitrary code from the library. Only load trusted plugins built
    /// with the same compiler and `plexus-plugin` version as the host.
    #[cfg(feature = "dynamic")]
    pub unsafe fn register_library(
        &self,
        name: impl Into<String>,
        path: &std::path::Path,
    ) -> AppResult<()> {
        let name = name.into();
        let factory = unsafe { crate::loader::load_factory(path)? };
        info!(plugin = %name, path = %path.display(), "Dynamic plugin library loaded");
        self.register(name, factory);
        Ok(())
    }

    /// Whether a factory exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Build a plugin instance. A name without a factory has no setup entry
    /// point and is rejected. A panicking factory fails only this plugin.
    pub fn instantiate(&self, name: &str) -> AppResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| {
                AppError::plugin(format!("Plugin '{name}' has no setup entry point"))
            })?;
        let plugin = std::panic::catch_unwind(AssertUnwindSafe(|| factory())).map_err(|panic| {
            AppError::plugin(format!(
                "Plugin '{name}' constructor panicked: {}",
                panic_message(panic.as_ref())
            ))
        })?;
        info!(plugin = name, "Plugin code resolved");
        Ok(plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::hooks::HookApi;
    use async_trait::async_trait;
    use plexus_core::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        async fn setup(&self, _hooks: HookApi) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_plugin_has_no_entry_point() {
        let catalog = PluginCatalog::new();
        let err = catalog.instantiate("ns.billing.recon").err().unwrap();
        assert_eq!(err.kind, ErrorKind::Plugin);
        assert!(err.message.contains("setup entry point"));
    }

    #[test]
    fn test_factory_runs_per_instantiation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = PluginCatalog::new();
        let counter = calls.clone();
        catalog.register_fn("ns.billing.recon", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Noop) as Arc<dyn Plugin>
        });

        assert!(catalog.contains("ns.billing.recon"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        catalog.instantiate("ns.billing.recon").unwrap();
        catalog.instantiate("ns.billing.recon").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_factory_is_a_plugin_error() {
        let catalog = PluginCatalog::new();
        catalog.register_fn("ns.billing.recon", || -> Arc<dyn Plugin> {
            panic!("ledger handle missing")
        });

        let err = catalog.instantiate("ns.billing.recon").err().unwrap();
        assert_eq!(err.kind, ErrorKind::Plugin);
        assert!(err.message.contains("constructor panicked"));
        assert!(err.message.contains("ledger handle missing"));
    }
}
