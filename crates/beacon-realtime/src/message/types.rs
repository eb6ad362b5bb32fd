//! Inbound and outbound WebSocket message type definitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::handle::ConnectionId;

/// Frames sent by the client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Subscribe to a channel.
    Subscribe {
        /// Channel name.
        channel: String,
    },
    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
    /// Publish an event to every subscriber of a channel.
    Publish {
        /// Channel name.
        channel: String,
        /// Arbitrary JSON payload.
        payload: serde_json::Value,
    },
}

/// Frames sent by the server to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Subscription confirmed.
    Subscribed {
        /// Channel name.
        channel: String,
    },
    /// Unsubscription confirmed.
    Unsubscribed {
        /// Channel name.
        channel: String,
    },
    /// An event published on a channel.
    Message {
        /// Channel name.
        channel: String,
        /// Event payload.
        payload: serde_json::Value,
        /// Originating connection, if it is known.
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<ConnectionId>,
        /// When the event was published.
        timestamp: DateTime<Utc>,
    },
    /// Error message.
    Error {
        /// Error code.
        code: String,
        /// Error description.
        message: String,
    },
}

impl OutboundMessage {
    /// Build an error frame.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// An immutable published event.
///
/// Produced by a connection or by broker delivery and consumed by local
/// fan-out. The payload is shared, never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    channel: String,
    payload: Arc<serde_json::Value>,
    sender: Option<ConnectionId>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(
        channel: impl Into<String>,
        payload: serde_json::Value,
        sender: Option<ConnectionId>,
    ) -> Self {
        Self::at(channel, payload, sender, Utc::now())
    }

    /// Create a message with an explicit timestamp.
    pub fn at(
        channel: impl Into<String>,
        payload: serde_json::Value,
        sender: Option<ConnectionId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: Arc::new(payload),
            sender,
            timestamp,
        }
    }

    /// Channel key.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Event payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Originating connection.
    pub fn sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    /// Publication time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The frame delivered to subscribers.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage::Message {
            channel: self.channel.clone(),
            payload: (*self.payload).clone(),
            sender: self.sender,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_publish_parses() {
        let raw = r#"{"type":"publish","channel":"chat:room1","payload":{"text":"hi"}}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Publish { channel, payload } => {
                assert_eq!(channel, "chat:room1");
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_outbound_message_omits_missing_sender() {
        let msg = Message::new("chat:room1", serde_json::json!({"text": "hi"}), None);
        let json = serde_json::to_value(msg.to_outbound()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["payload"]["text"], "hi");
        assert!(json.get("sender").is_none());
    }
}
