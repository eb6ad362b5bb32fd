//! Registry of local connections and their channel subscriptions.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::channel::ChannelRegistry;
use crate::message::types::Message;

use super::handle::{ConnectionHandle, ConnectionId, SendError};

/// Thread-safe registry of the connections held by this process.
///
/// Every mutation touches a single shard entry, so `add`, `remove`, and
/// `broadcast_local` may run concurrently from independent connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Connection ID → handle.
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// Channel membership.
    channels: ChannelRegistry,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. The handle is moved to `Open`.
    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        handle.mark_open();
        self.connections.insert(handle.id, handle);
    }

    /// Deregisters a connection and all of its subscriptions.
    ///
    /// Removing an unknown ID is a no-op.
    pub fn remove(&self, conn_id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.remove(conn_id).map(|(_, handle)| handle);
        let dropped = self.channels.unsubscribe_all(*conn_id);
        if let Some(handle) = &removed {
            debug!(conn_id = %handle.id, subscriptions = dropped, "Connection deregistered");
        }
        removed
    }

    /// Looks up a connection.
    pub fn get(&self, conn_id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(conn_id).map(|entry| entry.value().clone())
    }

    /// Whether a connection is registered.
    pub fn contains(&self, conn_id: &ConnectionId) -> bool {
        self.connections.contains_key(conn_id)
    }

    /// Subscribes a registered connection to a channel.
    ///
    /// Returns `false` if the connection is unknown (for instance because it
    /// disconnected concurrently) or was already subscribed.
    pub fn subscribe(&self, conn_id: ConnectionId, channel: &str) -> bool {
        if !self.contains(&conn_id) {
            return false;
        }
        let added = self.channels.subscribe(channel, conn_id);
        // Lost a race with `remove`: undo so no stale membership survives.
        if added && !self.contains(&conn_id) {
            self.channels.unsubscribe(channel, conn_id);
            return false;
        }
        added
    }

    /// Unsubscribes a connection from a channel.
    pub fn unsubscribe(&self, conn_id: ConnectionId, channel: &str) -> bool {
        self.channels.unsubscribe(channel, conn_id)
    }

    /// Number of channels a connection is subscribed to.
    pub fn subscription_count(&self, conn_id: ConnectionId) -> usize {
        self.channels.subscription_count(conn_id)
    }

    /// Whether a connection is subscribed to a channel.
    pub fn is_subscribed(&self, conn_id: ConnectionId, channel: &str) -> bool {
        self.channels.is_subscribed(channel, conn_id)
    }

    /// Delivers a message to every local subscriber of its channel, skipping
    /// `exclude`. Returns the number of connections the frame was queued for.
    ///
    /// A failure on one connection is logged and does not affect the others.
    pub fn broadcast_local(&self, message: &Message, exclude: Option<ConnectionId>) -> usize {
        let subscribers = self.channels.subscribers(message.channel());
        if subscribers.is_empty() {
            return 0;
        }

        let frame = match serde_json::to_string(&message.to_outbound()) {
            Ok(frame) => frame,
            Err(e) => {
                error!(channel = %message.channel(), error = %e, "Failed to serialize message");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn_id in subscribers {
            if Some(conn_id) == exclude {
                continue;
            }
            let Some(handle) = self.get(&conn_id) else {
                continue;
            };
            match handle.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::NotOpen) => {
                    debug!(conn_id = %conn_id, "Skipping connection that is closing");
                }
                Err(e) => {
                    warn!(
                        conn_id = %conn_id,
                        channel = %message.channel(),
                        error = %e,
                        "Failed to deliver message"
                    );
                }
            }
        }
        delivered
    }

    /// All registered handles.
    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of channels with local subscribers.
    pub fn channel_count(&self) -> usize {
        self.channels.channel_count()
    }
}
