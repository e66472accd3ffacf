//! # plexus-bus
//!
//! Durable publish/subscribe event bus for Plexus.
//!
//! Every publish goes two ways: appended to a per-topic durable log read by
//! consumer groups (at-least-once, survives restarts), and fanned out
//! directly to in-process subscribers (low latency, best effort). Log store
//! backends:
//!
//! - **memory**: in-process log with consumer-group semantics
//! - **redis**: Redis Streams via the [redis](https://crates.io/crates/redis) crate
//!
//! The backend is selected at runtime based on configuration.

pub mod bus;
pub mod consumer;
pub mod dispatch;
pub mod handler;
pub mod keys;
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use bus::{EventBus, SubscriptionInfo};
pub use handler::{ClosureEventHandler, EventHandler, handler_fn};
pub use memory::MemoryLogStore;
pub use provider::build_log_store;
