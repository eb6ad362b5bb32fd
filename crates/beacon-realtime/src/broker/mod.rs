//! Broker adapters for cross-process message relay.
//!
//! A [`MessageBroker`] carries opaque string payloads between processes.
//! Channels passed to the adapter are logical names; the adapter applies
//! the configured namespace prefix on the wire and strips it again before
//! handing a [`Delivery`] to the registered handler.

pub mod memory;
#[cfg(feature = "redis-broker")]
pub mod redis;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use beacon_core::AppResult;

pub use self::memory::{MemoryBroker, MemoryBus};
#[cfg(feature = "redis-broker")]
pub use self::redis::RedisBroker;

/// Pattern matching every channel in the namespace.
pub const ALL_CHANNELS: &str = "*";

/// A payload received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Logical channel the payload was published on.
    pub channel: String,
    /// Raw payload.
    pub payload: String,
}

/// Callback invoked for each delivery on the adapter's delivery task.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Cross-process publish/subscribe transport.
#[async_trait]
pub trait MessageBroker: Send + Sync + fmt::Debug {
    /// Short adapter name for logs.
    fn name(&self) -> &'static str;

    /// Publish a payload on a logical channel.
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()>;

    /// Register `handler` for a channel name or a pattern ending in `*`.
    ///
    /// Registering the same key again replaces the handler.
    async fn subscribe(&self, channel: &str, handler: DeliveryHandler) -> AppResult<()>;

    /// Drop the handler for a channel name or pattern.
    async fn unsubscribe(&self, channel: &str) -> AppResult<()>;

    /// Stop delivering and release connections.
    async fn shutdown(&self);
}

/// Whether `channel` matches a subscription key.
///
/// A key ending in `*` matches every channel starting with the rest of the
/// key; any other key matches only itself.
pub fn matches_pattern(key: &str, channel: &str) -> bool {
    match key.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => key == channel,
    }
}

/// Whether a subscription key is a pattern.
pub fn is_pattern(key: &str) -> bool {
    key.ends_with('*')
}
