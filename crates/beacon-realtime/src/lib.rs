//! # beacon-realtime
//!
//! Real-time messaging layer for Beacon.
//!
//! Local WebSocket connections live in a [`ConnectionRegistry`]; every
//! event a client publishes is delivered to same-process subscribers
//! straight away and relayed through a [`MessageBroker`] so sibling
//! processes can deliver it to theirs. [`RealtimeEngine`] ties the pieces
//! together.

pub mod broker;
pub mod channel;
pub mod connection;
pub mod message;
pub mod server;

pub use broker::{Delivery, DeliveryHandler, MemoryBroker, MemoryBus, MessageBroker};
#[cfg(feature = "redis-broker")]
pub use broker::RedisBroker;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionState};
pub use message::{InboundMessage, Message, OutboundMessage};
pub use server::{ConnectionGuard, RealtimeEngine};
