//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a default so a missing file is valid.

pub mod app;
pub mod broker;
pub mod logging;
pub mod realtime;
pub mod session;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use self::app::{AppSection, BodyConfig, CorsConfig, Environment, ServerConfig};
pub use self::broker::{BrokerConfig, BrokerProvider, UnavailablePolicy};
pub use self::logging::LoggingConfig;
pub use self::realtime::RealtimeConfig;
pub use self::session::SessionConfig;

use crate::error::AppError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "BEACON";

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application-wide settings.
    #[serde(default)]
    pub app: AppSection,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session cookie settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Request body settings.
    #[serde(default)]
    pub body: BodyConfig,
    /// Pub/sub broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Real-time WebSocket settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files in `dir`.
    ///
    /// Merges `default.toml` with the `{env}.toml` overlay and environment
    /// variables prefixed with `BEACON__` (e.g. `BEACON__SERVER__PORT`).
    pub fn load(dir: impl AsRef<Path>, env: &str) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        let config = config::Config::builder()
            .add_source(
                config::File::with_name(&dir.join("default").to_string_lossy()).required(false),
            )
            .add_source(config::File::with_name(&dir.join(env).to_string_lossy()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("session.keys")
                    .with_list_parse_key("server.cors.allowed_origins"),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check the invariants serde defaults cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.session.keys.iter().all(|k| k.is_empty()) {
            return Err(AppError::configuration(
                "session.keys must contain at least one non-empty signing key",
            ));
        }
        if self.app.environment.is_production() && self.session.uses_development_keys() {
            return Err(AppError::configuration(
                "session.keys must not use development keys in production; set BEACON__SESSION__KEYS",
            ));
        }
        if self.body.max_bytes == 0 {
            return Err(AppError::configuration("body.max_bytes must be positive"));
        }
        if self.broker.provider == BrokerProvider::Redis && self.broker.url.is_empty() {
            return Err(AppError::configuration(
                "broker.url is required for the redis provider",
            ));
        }
        Ok(())
    }
}
