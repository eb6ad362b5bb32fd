//! Ping/pong keepalive policy.

use std::time::Duration;

use beacon_core::config::RealtimeConfig;

/// When to ping, and when a silent connection counts as dead.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatPolicy {
    /// Interval between pings.
    pub interval: Duration,
    /// Extra silence tolerated after a ping before giving up.
    pub timeout: Duration,
}

impl HeartbeatPolicy {
    /// Build from engine configuration.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.ping_interval_seconds.max(1)),
            timeout: Duration::from_secs(config.ping_timeout_seconds),
        }
    }

    /// Whether a connection idle for `idle` should be dropped.
    pub fn is_expired(&self, idle: Duration) -> bool {
        idle > self.interval + self.timeout
    }
}
