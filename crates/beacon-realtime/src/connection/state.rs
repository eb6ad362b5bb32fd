//! Per-connection lifecycle: `Connecting → Open → Closing → Closed`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress; not yet registered.
    Connecting = 0,
    /// Registered and exchanging frames.
    Open = 1,
    /// Transport gone or shutting down; deregistration pending.
    Closing = 2,
    /// Deregistered. Terminal.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free state cell shared between the reader, writer, and registry.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Starts in `Connecting`.
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting as u8))
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Connecting → Open`. Fails from any other state.
    pub fn open(&self) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Any non-terminal state → `Closing`. Returns `true` for the caller
    /// that performed the transition.
    pub fn begin_close(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.0.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Any state → `Closed`.
    pub fn finish_close(&self) {
        self.0
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
