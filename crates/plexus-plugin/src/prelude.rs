//! Prelude for convenient imports.

pub use async_trait::async_trait;

pub use crate::api::hooks::HookApi;
pub use crate::services::ServiceInstance;
pub use crate::traits::Plugin;

pub use plexus_bus::{EventHandler, handler_fn};
pub use plexus_core::error::{AppError, ErrorKind};
pub use plexus_core::events::Event;
pub use plexus_core::result::AppResult;
pub use plexus_worker::{TaskContext, TaskHandler, task_fn};
