//! Beacon Server: real-time pub/sub messaging over WebSockets
//!
//! Main entry point that loads configuration, sets up logging, and starts
//! the server.

use axum::Router;
use tracing_subscriber::{EnvFilter, fmt};

use beacon_core::config::AppConfig;
use beacon_core::error::AppError;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(
        environment = ?config.app.environment,
        "Starting Beacon v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = beacon_api::run_server(config, Router::new()).await {
        tracing::error!(error = %e.chain(), "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_dir = std::env::var("BEACON_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let env = std::env::var("BEACON_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_dir, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}
