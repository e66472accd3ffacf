//! Redis Streams log store.

pub mod client;
pub mod streams;

pub use client::RedisClient;
pub use streams::RedisStreamStore;
