//! # plexus-plugin
//!
//! Plugin host for Plexus. Provides:
//!
//! - Manifest parsing and on-disk discovery
//! - Plugin code resolution from a catalog of factories, with optional
//!   dynamic loading via `libloading`
//! - The shared service registry
//! - A per-plugin, capability-scoped hook API
//! - The runtime context wiring the event bus, task registry and workers

pub mod api;
pub mod catalog;
pub mod discovery;
pub mod flags;
pub mod host;
#[cfg(feature = "dynamic")]
pub mod loader;
mod macros;
pub mod manifest;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod services;
pub mod traits;

pub use api::hooks::{HookApi, Registrations};
pub use catalog::{PluginCatalog, PluginFactory};
pub use flags::FeatureFlags;
pub use host::{InitReport, PluginHost};
pub use manifest::PluginManifest;
pub use registry::{LoadedPlugin, PluginInfo, PluginRegistry};
pub use runtime::PluginRuntime;
pub use services::{ServiceInstance, ServiceRegistry, ServiceRegistryBuilder};
pub use traits::Plugin;
