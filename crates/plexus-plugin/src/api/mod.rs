//! Plugin API, the surface plugin code is allowed to call.

pub mod hooks;

pub use hooks::{HookApi, Registrations};
