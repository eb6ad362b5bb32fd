//! Channel registry: channel name to subscribed local connections.

use std::collections::HashSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection::handle::ConnectionId;

use super::subscription::SubscriptionTracker;

/// Index of local channel subscriptions.
///
/// A channel exists only while it has at least one subscriber.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Channel name → subscribed connections.
    channels: DashMap<String, HashSet<ConnectionId>>,
    /// Reverse index used on disconnect.
    subscriptions: SubscriptionTracker,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection. Returns `false` if it already was.
    pub fn subscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        let added = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id);
        if added {
            self.subscriptions.add(conn_id, channel.to_string());
        }
        added
    }

    /// Unsubscribes a connection. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        let removed = self.detach(channel, conn_id);
        self.subscriptions.remove(conn_id, channel);
        removed
    }

    /// Drops every subscription held by a connection.
    pub fn unsubscribe_all(&self, conn_id: ConnectionId) -> usize {
        let channels = self.subscriptions.remove_all(conn_id);
        for channel in &channels {
            self.detach(channel, conn_id);
        }
        channels.len()
    }

    /// Subscriber snapshot for a channel.
    pub fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is subscribed to a channel.
    pub fn is_subscribed(&self, channel: &str, conn_id: ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|set| set.contains(&conn_id))
    }

    /// Number of channels a connection is subscribed to.
    pub fn subscription_count(&self, conn_id: ConnectionId) -> usize {
        self.subscriptions.count(conn_id)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn detach(&self, channel: &str, conn_id: ConnectionId) -> bool {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&conn_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }
}
