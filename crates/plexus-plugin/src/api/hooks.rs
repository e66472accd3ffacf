//! The hook API handed to each plugin.
//!
//! One `HookApi` exists per loaded plugin and carries that plugin's
//! identity. Every call checks the reserved namespace before touching the
//! event bus or task registry, so a rejected call has no side effects.
//! Service lookups are limited to the manifest's `required_services`.
//! Successful registrations are recorded so the host can undo them when
//! the plugin goes away.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use plexus_bus::{EventBus, EventHandler};
use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::types::id::{EventId, RunId, SubscriptionId};
use plexus_core::types::namespace::{IdentifierKind, NamespaceRoot};
use plexus_worker::{TaskHandler, TaskInfo, TaskRegistry};

use crate::manifest::PluginManifest;
use crate::services::{ServiceInstance, ServiceRegistry};

/// What a plugin has registered through its hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registrations {
    /// Cron task names, in registration order.
    pub cron_tasks: Vec<String>,
    /// Event subscriptions, in registration order.
    pub subscriptions: Vec<SubscriptionId>,
}

struct HookInner {
    manifest: Arc<PluginManifest>,
    namespace: NamespaceRoot,
    bus: Arc<EventBus>,
    tasks: Arc<TaskRegistry>,
    services: Arc<ServiceRegistry>,
    registrations: Mutex<Registrations>,
}

/// Capability-scoped access to the runtime for one plugin.
#[derive(Clone)]
pub struct HookApi {
    inner: Arc<HookInner>,
}

impl std::fmt::Debug for HookApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookApi")
            .field("plugin", &self.inner.manifest.name)
            .finish()
    }
}

impl HookApi {
    /// Bind a hook API to a plugin.
    pub fn new(
        manifest: Arc<PluginManifest>,
        namespace: NamespaceRoot,
        bus: Arc<EventBus>,
        tasks: Arc<TaskRegistry>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(HookInner {
                manifest,
                namespace,
                bus,
                tasks,
                services,
                registrations: Mutex::new(Registrations::default()),
            }),
        }
    }

    /// Name of the plugin this API is bound to.
    pub fn plugin_name(&self) -> &str {
        &self.inner.manifest.name
    }

    /// The plugin's manifest.
    pub fn manifest(&self) -> &PluginManifest {
        &self.inner.manifest
    }

    /// The plugin's configuration block from its manifest.
    pub fn config(&self) -> Option<&Value> {
        self.inner.manifest.config_schema.as_ref()
    }

    /// Whether the manifest declares `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.inner.manifest.has_capability(capability)
    }

    fn check(&self, kind: IdentifierKind, name: &str) -> AppResult<()> {
        self.inner.namespace.validate(kind, name).inspect_err(|e| {
            warn!(plugin = %self.plugin_name(), error = %e, "Hook call rejected");
        })
    }

    /// Tasks may only be toggled or triggered by the plugin that registered them.
    fn check_task_owner(&self, name: &str) -> AppResult<()> {
        self.check(IdentifierKind::Task, name)?;
        let owner = self.inner.tasks.task_owner(name)?;
        if owner != self.plugin_name() {
            warn!(
                plugin = %self.plugin_name(),
                task = name,
                owner = %owner,
                "Task control denied"
            );
            return Err(AppError::access_denied(format!(
                "Plugin '{}' does not own task '{name}'",
                self.plugin_name()
            )));
        }
        Ok(())
    }

    // -- Event bus ---------------------------------------------------------

    /// Publish an event.
    pub async fn publish(&self, topic: &str, payload: Value) -> AppResult<EventId> {
        self.check(IdentifierKind::Topic, topic)?;
        self.inner.bus.publish(topic, payload).await
    }

    /// Publish an event with a partition key.
    pub async fn publish_keyed(&self, topic: &str, key: &str, payload: Value) -> AppResult<EventId> {
        self.check(IdentifierKind::Topic, topic)?;
        self.inner.bus.publish_keyed(topic, key, payload).await
    }

    /// Subscribe to a topic. The consumer group is the plugin's name.
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<SubscriptionId> {
        let group = self.plugin_name().to_string();
        self.subscribe_with_group(topic, &group, handler).await
    }

    /// Subscribe to a topic under an explicit consumer group.
    pub async fn subscribe_with_group(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<SubscriptionId> {
        self.check(IdentifierKind::Topic, topic)?;
        if group.is_empty() {
            return Err(AppError::validation("Consumer group name must not be empty"));
        }

        let id = self
            .inner
            .bus
            .subscribe(topic, Some(group), self.plugin_name(), handler)
            .await?;
        self.inner.registrations.lock().await.subscriptions.push(id);
        Ok(id)
    }

    // -- Task registry -----------------------------------------------------

    /// Register a cron task, routed to a queue class by its name.
    pub async fn register_cron(
        &self,
        name: &str,
        cron_expr: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> AppResult<TaskInfo> {
        self.register_cron_with(name, cron_expr, handler, None).await
    }

    /// Register a cron task on an explicit queue class.
    pub async fn register_cron_with(
        &self,
        name: &str,
        cron_expr: &str,
        handler: Arc<dyn TaskHandler>,
        queue: Option<&str>,
    ) -> AppResult<TaskInfo> {
        self.check(IdentifierKind::Task, name)?;
        let info = self
            .inner
            .tasks
            .register_cron_with(name, cron_expr, handler, self.plugin_name(), queue)
            .await?;
        self.inner
            .registrations
            .lock()
            .await
            .cron_tasks
            .push(name.to_string());
        Ok(info)
    }

    /// Resume a disabled task owned by this plugin.
    pub fn enable_task(&self, name: &str) -> AppResult<()> {
        self.check_task_owner(name)?;
        self.inner.tasks.enable_task(name)
    }

    /// Skip a task owned by this plugin when it is due, keeping it registered.
    pub fn disable_task(&self, name: &str) -> AppResult<()> {
        self.check_task_owner(name)?;
        self.inner.tasks.disable_task(name)
    }

    /// Enqueue one immediate run of a task owned by this plugin.
    pub async fn trigger_now(&self, name: &str, args: Value) -> AppResult<RunId> {
        self.check_task_owner(name)?;
        self.inner.tasks.trigger_now(name, args).await
    }

    // -- Services ----------------------------------------------------------

    /// Pull a shared service declared in the manifest's `required_services`.
    pub fn get_service(&self, name: &str) -> AppResult<ServiceInstance> {
        if !self.inner.manifest.allows_service(name) {
            warn!(
                plugin = %self.plugin_name(),
                service = name,
                "Service access denied"
            );
            return Err(AppError::access_denied(format!(
                "Plugin '{}' did not declare service '{name}' in required_services",
                self.plugin_name()
            )));
        }
        debug!(plugin = %self.plugin_name(), service = name, "Service access granted");
        self.inner
            .services
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("Service '{name}' is not registered")))
    }

    /// Pull a declared service and downcast it to its concrete type.
    pub fn get_service_as<T: Any + Send + Sync>(&self, name: &str) -> AppResult<Arc<T>> {
        self.get_service(name)?;
        self.inner.services.get_as::<T>(name)
    }

    // -- Bookkeeping -------------------------------------------------------

    /// Snapshot of what this plugin has registered so far.
    pub async fn registrations(&self) -> Registrations {
        self.inner.registrations.lock().await.clone()
    }

    /// Take the plugin's registrations, leaving the record empty.
    pub(crate) async fn take_registrations(&self) -> Registrations {
        std::mem::take(&mut *self.inner.registrations.lock().await)
    }
}
