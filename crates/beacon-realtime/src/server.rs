//! Top-level real-time engine that ties together all subsystems.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use beacon_core::config::RealtimeConfig;
use beacon_core::{AppError, AppResult};

use crate::broker::{ALL_CHANNELS, Delivery, DeliveryHandler, MessageBroker};
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, HeartbeatPolicy};
use crate::message::envelope::BrokerEnvelope;
use crate::message::types::{InboundMessage, Message, OutboundMessage};
use crate::message::validator::{validate_channel_name, validate_inbound};

/// Central real-time engine.
///
/// Owns the local [`ConnectionRegistry`] and relays every published event
/// through the broker so sibling processes deliver it to their own
/// subscribers.
pub struct RealtimeEngine {
    node_id: Uuid,
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn MessageBroker>,
    heartbeat: HeartbeatPolicy,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("node_id", &self.node_id)
            .field("broker", &self.broker.name())
            .field("connections", &self.registry.connection_count())
            .finish()
    }
}

impl RealtimeEngine {
    /// Creates an engine publishing through `broker`.
    ///
    /// Call [`attach`](Self::attach) before serving so broker deliveries
    /// reach local connections.
    pub fn new(config: RealtimeConfig, broker: Arc<dyn MessageBroker>) -> Self {
        let heartbeat = HeartbeatPolicy::from_config(&config);
        let node_id = Uuid::new_v4();
        info!(node_id = %node_id, broker = broker.name(), "Real-time engine initialized");

        Self {
            node_id,
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            broker,
            heartbeat,
        }
    }

    /// Subscribe to the whole broker namespace.
    pub async fn attach(&self) -> AppResult<()> {
        let registry = self.registry.clone();
        let node_id = self.node_id;
        let handler: DeliveryHandler =
            Arc::new(move |delivery: Delivery| relay_delivery(&registry, node_id, delivery));
        self.broker.subscribe(ALL_CHANNELS, handler).await?;
        info!(node_id = %node_id, "Real-time engine attached to broker");
        Ok(())
    }

    /// This process's identity on the broker.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Local connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Keepalive policy for transports.
    pub fn heartbeat(&self) -> HeartbeatPolicy {
        self.heartbeat
    }

    /// Engine configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Register a new connection.
    ///
    /// Returns the handle, the receiving end of its outbound queue, and a
    /// guard that deregisters the connection when dropped.
    pub fn open_connection(
        self: &Arc<Self>,
        peer: Option<String>,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<String>, ConnectionGuard) {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let handle = Arc::new(ConnectionHandle::new(peer, tx));
        self.registry.add(handle.clone());

        info!(
            conn_id = %handle.id,
            peer = handle.peer.as_deref().unwrap_or("-"),
            connections = self.registry.connection_count(),
            "WebSocket connection opened"
        );

        let guard = ConnectionGuard {
            engine: self.clone(),
            conn_id: handle.id,
        };
        (handle, rx, guard)
    }

    /// Deregister a connection. Safe to call from any state, and repeatedly.
    pub fn close_connection(&self, conn_id: ConnectionId) {
        if let Some(handle) = self.registry.remove(&conn_id) {
            handle.begin_close();
            handle.finish_close();
            info!(
                conn_id = %conn_id,
                connections = self.registry.connection_count(),
                "WebSocket connection closed"
            );
        }
    }

    /// Process one text frame from a connection.
    ///
    /// Replies (acks and error frames) are queued on the same connection;
    /// nothing here fails the transport.
    pub async fn handle_inbound(&self, conn_id: ConnectionId, raw: &str) {
        let Some(handle) = self.registry.get(&conn_id) else {
            return;
        };

        let reply = match self.dispatch_inbound(conn_id, raw).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "Rejected inbound frame");
                Some(OutboundMessage::error(e.kind.code(), e.message))
            }
        };

        if let Some(reply) = reply {
            match serde_json::to_string(&reply) {
                Ok(frame) => {
                    if let Err(e) = handle.send(frame) {
                        debug!(conn_id = %conn_id, error = %e, "Failed to queue reply");
                    }
                }
                Err(e) => warn!(conn_id = %conn_id, error = %e, "Failed to serialize reply"),
            }
        }
    }

    async fn dispatch_inbound(
        &self,
        conn_id: ConnectionId,
        raw: &str,
    ) -> AppResult<Option<OutboundMessage>> {
        validate_inbound(raw, self.config.max_message_bytes)?;
        let inbound: InboundMessage = serde_json::from_str(raw)
            .map_err(|e| AppError::validation(format!("Invalid message: {e}")))?;

        match inbound {
            InboundMessage::Subscribe { channel } => {
                validate_channel_name(&channel)?;
                let limit = self.config.max_subscriptions_per_connection;
                if !self.registry.is_subscribed(conn_id, &channel)
                    && self.registry.subscription_count(conn_id) >= limit
                {
                    return Err(AppError::validation(format!(
                        "Subscription limit of {limit} reached"
                    )));
                }
                if self.registry.subscribe(conn_id, &channel) {
                    debug!(conn_id = %conn_id, channel = %channel, "Subscribed");
                }
                Ok(Some(OutboundMessage::Subscribed { channel }))
            }
            InboundMessage::Unsubscribe { channel } => {
                validate_channel_name(&channel)?;
                if self.registry.unsubscribe(conn_id, &channel) {
                    debug!(conn_id = %conn_id, channel = %channel, "Unsubscribed");
                }
                Ok(Some(OutboundMessage::Unsubscribed { channel }))
            }
            InboundMessage::Publish { channel, payload } => {
                validate_channel_name(&channel)?;
                self.publish(Message::new(channel, payload, Some(conn_id)))
                    .await;
                Ok(None)
            }
        }
    }

    /// Fan a message out to local subscribers (excluding its sender) and
    /// relay it through the broker. Returns the local delivery count.
    ///
    /// Broker failures are logged; local delivery has already happened.
    pub async fn publish(&self, message: Message) -> usize {
        let delivered = self.registry.broadcast_local(&message, message.sender());

        match BrokerEnvelope::wrap(self.node_id, &message).encode() {
            Ok(payload) => {
                if let Err(e) = self.broker.publish(message.channel(), &payload).await {
                    warn!(
                        channel = %message.channel(),
                        broker = self.broker.name(),
                        error = %e.chain(),
                        "Broker publish failed"
                    );
                }
            }
            Err(e) => warn!(channel = %message.channel(), error = %e, "Failed to encode envelope"),
        }

        delivered
    }

    /// Ask every connection to close. Writers observe this and end their
    /// transports; guards then deregister them.
    pub fn close_all(&self) {
        let handles = self.registry.all();
        for handle in &handles {
            handle.begin_close();
        }
        if !handles.is_empty() {
            info!(count = handles.len(), "Closing all WebSocket connections");
        }
    }

    /// Close every connection and release the broker.
    pub async fn shutdown(&self) {
        self.close_all();
        self.broker.shutdown().await;
        info!("Real-time engine shut down");
    }
}

/// Deliver a broker payload to every local subscriber.
///
/// Envelopes published by this process are dropped; their local fan-out
/// already happened in [`RealtimeEngine::publish`].
fn relay_delivery(registry: &ConnectionRegistry, node_id: Uuid, delivery: Delivery) {
    let envelope = match BrokerEnvelope::decode(&delivery.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(channel = %delivery.channel, error = %e, "Dropping malformed broker payload");
            return;
        }
    };
    if envelope.node_id == node_id {
        return;
    }
    if envelope.channel != delivery.channel {
        warn!(
            channel = %delivery.channel,
            envelope_channel = %envelope.channel,
            "Dropping broker payload with mismatched channel"
        );
        return;
    }

    let message = envelope.into_message();
    let delivered = registry.broadcast_local(&message, None);
    debug!(channel = %message.channel(), delivered, "Relayed broker message");
}

/// Deregisters its connection when dropped, whichever way the transport
/// task ends.
#[derive(Debug)]
pub struct ConnectionGuard {
    engine: Arc<RealtimeEngine>,
    conn_id: ConnectionId,
}

impl ConnectionGuard {
    /// The guarded connection.
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.engine.close_connection(self.conn_id);
    }
}
