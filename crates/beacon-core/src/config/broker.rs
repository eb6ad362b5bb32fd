//! Pub/sub broker configuration.

use serde::{Deserialize, Serialize};

/// Which broker backs cross-process fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerProvider {
    /// Shared Redis server.
    #[default]
    Redis,
    /// In-process bus (single node only).
    Memory,
}

/// What to do when the broker cannot be reached at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Fail startup.
    #[default]
    Abort,
    /// Keep serving with local-only delivery.
    Degrade,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker provider.
    #[serde(default)]
    pub provider: BrokerProvider,
    /// Redis connection URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Prefix for every broker channel name.
    #[serde(default = "default_prefix")]
    pub channel_prefix: String,
    /// Connect timeout in seconds for each of the two connections.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Delay before re-establishing a dropped subscription connection.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Startup policy when the broker is unreachable.
    #[serde(default)]
    pub on_unavailable: UnavailablePolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: BrokerProvider::default(),
            url: default_url(),
            channel_prefix: default_prefix(),
            connect_timeout_seconds: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            on_unavailable: UnavailablePolicy::default(),
        }
    }
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_prefix() -> String {
    "beacon:".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_reconnect_delay() -> u64 {
    1000
}
