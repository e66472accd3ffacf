//! # plexus-core
//!
//! Core crate for the Plexus plugin runtime. Contains the unified error
//! system, configuration schemas, typed identifiers, namespace validation,
//! the event envelope, and the traits for the two infrastructure
//! collaborators the runtime is built on: the durable log store and the
//! distributed task queue.
//!
//! This crate has **no** internal dependencies on other Plexus crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
