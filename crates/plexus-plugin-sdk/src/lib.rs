//! # plexus-plugin-sdk
//!
//! SDK for developing Plexus plugins.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plexus_plugin_sdk::prelude::*;
//!
//! struct MyPlugin;
//!
//! #[async_trait]
//! impl Plugin for MyPlugin {
//!     async fn setup(&self, hooks: HookApi) -> anyhow::Result<()> {
//!         hooks
//!             .subscribe(
//!                 "ns.orders.created",
//!                 handler_fn(|event| async move {
//!                     println!("order {}", event.payload["id"]);
//!                     Ok(())
//!                 }),
//!             )
//!             .await?;
//!         hooks
//!             .register_cron("ns.orders.digest.daily", "0 6 * * *", task_fn(|_ctx| async { Ok(()) }))
//!             .await?;
//!         Ok(())
//!     }
//! }
//! ```
//!
//! The plugin ships with a `manifest.json` at
//! `<plugin root>/ns/orders/digest/manifest.json` and is made available to
//! the host either by registering a factory in its `PluginCatalog` or, for
//! `cdylib` builds, with [`export_plugin!`].

pub use plexus_plugin::export_plugin;

/// Prelude for convenient imports.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};

    pub use plexus_bus::{EventHandler, handler_fn};
    pub use plexus_core::error::{AppError, ErrorKind};
    pub use plexus_core::events::Event;
    pub use plexus_core::result::AppResult;
    pub use plexus_core::types::id::{EventId, RunId, SubscriptionId};
    pub use plexus_plugin::{HookApi, Plugin, PluginManifest, ServiceInstance};
    pub use plexus_worker::{TaskContext, TaskHandler, TaskInfo, task_fn};
}
