//! Local WebSocket connections.

pub mod handle;
pub mod heartbeat;
pub mod registry;
pub mod state;

pub use handle::{ConnectionHandle, ConnectionId, SendError};
pub use heartbeat::HeartbeatPolicy;
pub use registry::ConnectionRegistry;
pub use state::ConnectionState;
