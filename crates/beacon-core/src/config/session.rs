//! Session cookie configuration.

use serde::{Deserialize, Serialize};

/// Signed session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Signing keys. The first key signs new cookies; every key verifies,
    /// which allows rotating keys without logging everybody out.
    #[serde(default = "default_keys")]
    pub keys: Vec<String>,
    /// Cookie lifetime in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

/// Prefix shared by the signing keys shipped in the repository.
pub const DEVELOPMENT_KEY_PREFIX: &str = "beacon-development-key";

impl SessionConfig {
    /// Whether any configured key is one of the published development keys.
    pub fn uses_development_keys(&self) -> bool {
        self.keys
            .iter()
            .any(|k| k.starts_with(DEVELOPMENT_KEY_PREFIX))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            keys: default_keys(),
            max_age_seconds: default_max_age(),
        }
    }
}

fn default_cookie_name() -> String {
    "beacon.sid".to_string()
}

fn default_keys() -> Vec<String> {
    vec![
        "beacon-development-key-primary".to_string(),
        "beacon-development-key-previous".to_string(),
    ]
}

fn default_max_age() -> u64 {
    24 * 60 * 60
}
