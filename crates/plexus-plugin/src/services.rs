//! The shared service registry.
//!
//! Core infrastructure registers named singletons at bootstrap. Once the
//! host starts loading plugins the registry is sealed and becomes read-only.
//! Plugins never see it directly; they go through [`HookApi::get_service`],
//! which filters by the manifest's `required_services`.
//!
//! [`HookApi::get_service`]: crate::api::hooks::HookApi::get_service

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

/// A registered service instance.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Collects services before the registry exists.
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    entries: HashMap<String, ServiceInstance>,
}

impl std::fmt::Debug for ServiceRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistryBuilder")
            .field("services", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. A duplicate name is an error.
    pub fn register<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        instance: Arc<T>,
    ) -> AppResult<&mut Self> {
        self.register_instance(name, instance)
    }

    /// Add an already type-erased service.
    pub fn register_instance(
        &mut self,
        name: impl Into<String>,
        instance: ServiceInstance,
    ) -> AppResult<&mut Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(AppError::configuration("Service name must not be empty"));
        }
        if self.entries.contains_key(&name) {
            return Err(AppError::configuration(format!(
                "Service '{name}' is registered twice"
            )));
        }
        self.entries.insert(name, instance);
        Ok(self)
    }

    /// Build the registry.
    pub fn build(self) -> ServiceRegistry {
        let entries = DashMap::with_capacity(self.entries.len());
        for (name, instance) in self.entries {
            entries.insert(name, instance);
        }
        info!(services = entries.len(), "Service registry constructed");
        ServiceRegistry {
            entries,
            sealed: AtomicBool::new(false),
        }
    }
}

/// Named singletons shared with plugins.
pub struct ServiceRegistry {
    entries: DashMap<String, ServiceInstance>,
    sealed: AtomicBool,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl ServiceRegistry {
    /// Register a service before the registry is sealed.
    pub fn register(&self, name: &str, instance: ServiceInstance) -> AppResult<()> {
        if self.is_sealed() {
            return Err(AppError::conflict(format!(
                "Cannot register service '{name}': plugin loading has started"
            )));
        }
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(AppError::conflict(format!(
                "Service '{name}' is already registered"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                debug!(service = name, "Service registered");
                Ok(())
            }
        }
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<ServiceInstance> {
        self.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Look up a service and downcast it to its concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> AppResult<Arc<T>> {
        let instance = self
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("Service '{name}' is not registered")))?;
        instance.downcast::<T>().map_err(|_| {
            AppError::validation(format!(
                "Service '{name}' is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Make the registry read-only.
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::SeqCst) {
            debug!(services = self.entries.len(), "Service registry sealed");
        }
    }

    /// Whether the registry is read-only.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::error::ErrorKind;

    #[derive(Debug, PartialEq)]
    struct Ledger(u32);

    #[test]
    fn test_builder_rejects_duplicates() {
        let mut builder = ServiceRegistryBuilder::new();
        builder.register("ledger", Arc::new(Ledger(1))).unwrap();
        let err = builder.register("ledger", Arc::new(Ledger(2))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_typed_lookup() {
        let mut builder = ServiceRegistryBuilder::new();
        builder.register("ledger", Arc::new(Ledger(7))).unwrap();
        let registry = builder.build();

        let ledger = registry.get_as::<Ledger>("ledger").unwrap();
        assert_eq!(*ledger, Ledger(7));

        let err = registry.get_as::<String>("ledger").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = registry.get_as::<Ledger>("missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_sealed_registry_is_read_only() {
        let registry = ServiceRegistryBuilder::new().build();
        registry.register("clock", Arc::new(Ledger(0))).unwrap();
        registry.seal();

        let err = registry.register("late", Arc::new(Ledger(1))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(registry.get("late").is_none());
        assert_eq!(registry.names(), vec!["clock"]);
    }
}
