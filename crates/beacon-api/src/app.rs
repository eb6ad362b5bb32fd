//! Application builder and server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use beacon_core::config::{AppConfig, BrokerConfig, BrokerProvider, UnavailablePolicy};
use beacon_core::{AppError, AppResult, ErrorKind};
use beacon_realtime::broker::{MemoryBroker, MemoryBus, MessageBroker, RedisBroker};
use beacon_realtime::RealtimeEngine;

use crate::pipeline::Pipeline;
use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application: caller routes plus the built-in
/// routes, wrapped in the standard pipeline.
pub fn build_app(state: AppState, routes: Router<AppState>) -> Router {
    let router = build_router(routes).with_state(state.clone());
    Pipeline::standard().apply(router, &state)
}

/// Connect the configured broker, applying the unavailable policy.
pub async fn connect_broker(config: &BrokerConfig) -> AppResult<Arc<dyn MessageBroker>> {
    let connected: AppResult<Arc<dyn MessageBroker>> = match config.provider {
        BrokerProvider::Memory => {
            info!("Using in-memory broker (single node)");
            Ok(Arc::new(MemoryBroker::new(
                &MemoryBus::default(),
                config.channel_prefix.clone(),
            )))
        }
        BrokerProvider::Redis => RedisBroker::connect(config)
            .await
            .map(|broker| Arc::new(broker) as Arc<dyn MessageBroker>),
    };

    match connected {
        Err(e) if e.kind == ErrorKind::BrokerUnavailable => match config.on_unavailable {
            UnavailablePolicy::Abort => Err(e),
            UnavailablePolicy::Degrade => {
                warn!(
                    error = %e.chain(),
                    "Broker unavailable; continuing with local-only delivery"
                );
                Ok(Arc::new(MemoryBroker::new(
                    &MemoryBus::default(),
                    config.channel_prefix.clone(),
                )))
            }
        },
        other => other,
    }
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| AppError::with_source(ErrorKind::Internal, "Server error", e))
}

/// Runs the Beacon server with the given configuration.
pub async fn run_server(config: AppConfig, routes: Router<AppState>) -> AppResult<()> {
    info!("Starting Beacon server...");

    // ── Step 1: Broker ───────────────────────────────────────────
    let broker = connect_broker(&config.broker).await?;

    // ── Step 2: Realtime engine ──────────────────────────────────
    let engine = Arc::new(RealtimeEngine::new(config.realtime.clone(), broker));
    engine.attach().await?;

    // ── Step 3: Build and start HTTP server ──────────────────────
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let addr = config.server.bind_address();
    let state = AppState::new(config, engine.clone());
    let app = build_app(state, routes);

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        AppError::with_source(ErrorKind::Internal, format!("Failed to bind {addr}"), e)
    })?;
    info!("Beacon server listening on {}", addr);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let drain = {
        let mut rx = shutdown_rx.clone();
        let engine = engine.clone();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
            engine.close_all();
        }
    };

    let server = serve(listener, app, drain);
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(grace).await;
        } => warn!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out"),
    }

    engine.shutdown().await;
    info!("Beacon server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
