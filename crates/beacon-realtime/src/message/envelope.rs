//! Envelope carried across the broker between processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beacon_core::AppResult;

use crate::connection::handle::ConnectionId;

use super::types::Message;

/// Wire format of a message relayed through the broker.
///
/// `node_id` identifies the publishing process so it can ignore its own
/// echo; every other field reconstructs the [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    /// Publishing process.
    pub node_id: Uuid,
    /// Logical channel.
    pub channel: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Originating connection on the publishing process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ConnectionId>,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

impl BrokerEnvelope {
    /// Wrap a locally published message.
    pub fn wrap(node_id: Uuid, message: &Message) -> Self {
        Self {
            node_id,
            channel: message.channel().to_string(),
            payload: message.payload().clone(),
            sender: message.sender(),
            timestamp: message.timestamp(),
        }
    }

    /// Encode for the broker.
    pub fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a broker payload.
    pub fn decode(raw: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Rebuild the message for local delivery.
    pub fn into_message(self) -> Message {
        Message::at(self.channel, self.payload, self.sender, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_preserves_origin() {
        let node = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let message = Message::new("chat:room1", serde_json::json!({"text": "hi"}), Some(sender));

        let raw = BrokerEnvelope::wrap(node, &message).encode().unwrap();
        let decoded = BrokerEnvelope::decode(&raw).unwrap();

        assert_eq!(decoded.node_id, node);
        assert_eq!(decoded.into_message(), message);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(BrokerEnvelope::decode("not json").is_err());
    }
}
