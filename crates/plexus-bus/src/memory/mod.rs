//! In-memory log store.

pub mod store;

pub use store::MemoryLogStore;
