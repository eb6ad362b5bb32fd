//! WebSocket message types, the broker envelope, and validation.

pub mod envelope;
pub mod types;
pub mod validator;

pub use envelope::BrokerEnvelope;
pub use types::{InboundMessage, Message, OutboundMessage};
