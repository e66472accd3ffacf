//! Core type definitions used across the Plexus workspace.

pub mod id;
pub mod namespace;

pub use id::*;
pub use namespace::{IdentifierKind, NamespaceRoot};
