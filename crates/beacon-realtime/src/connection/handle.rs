//! Individual WebSocket connection handle.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use super::state::{ConnectionState, StateCell};

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not open.
    NotOpen,
    /// The outbound buffer is full; the frame was dropped.
    BufferFull,
    /// The writer task is gone.
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen => write!(f, "connection not open"),
            Self::BufferFull => write!(f, "send buffer full"),
            Self::Disconnected => write!(f, "connection disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

/// A handle to a single WebSocket connection.
///
/// The registry entry owns the handle; the transport task only holds the
/// receiving half of `sender`.
pub struct ConnectionHandle {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Remote address as reported by the proxy-trust stage, if known.
    pub peer: Option<String>,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<String>,
    state: StateCell,
    last_seen: Mutex<Instant>,
    closed: Notify,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state.get())
            .finish()
    }
}

impl ConnectionHandle {
    /// Create a new handle in the `Connecting` state.
    pub fn new(peer: Option<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
            sender,
            state: StateCell::new(),
            last_seen: Mutex::new(Instant::now()),
            closed: Notify::new(),
        }
    }

    /// Queue a serialized frame for this connection.
    pub fn send(&self, frame: String) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotOpen);
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::BufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.begin_close();
                Err(SendError::Disconnected)
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.state.open()
    }

    /// Move to `Closing` and wake the writer. Returns `true` the first time.
    pub fn begin_close(&self) -> bool {
        let first = self.state.begin_close();
        if first {
            self.closed.notify_one();
        }
        first
    }

    pub(crate) fn finish_close(&self) {
        self.state.finish_close();
        self.closed.notify_one();
    }

    /// Resolves once the connection has been asked to close.
    pub async fn closed(&self) {
        if self.state() >= ConnectionState::Closing {
            return;
        }
        self.closed.notified().await;
    }

    /// Record client activity (frames or pongs).
    pub fn touch(&self) {
        if let Ok(mut seen) = self.last_seen.lock() {
            *seen = Instant::now();
        }
    }

    /// Time since the last client activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|seen| seen.elapsed())
            .unwrap_or_default()
    }
}
