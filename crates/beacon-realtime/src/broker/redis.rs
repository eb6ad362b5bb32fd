//! Redis pub/sub broker for multi-node deployments.
//!
//! Publishing goes through a [`ConnectionManager`]; subscriptions live on a
//! dedicated pub/sub connection owned by a background delivery task, which
//! reconnects and re-subscribes every registered key if the connection drops.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::Client;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beacon_core::config::BrokerConfig;
use beacon_core::{AppError, AppResult, ErrorKind};

use super::{Delivery, DeliveryHandler, MessageBroker, is_pattern};

/// Broker backed by Redis `PUBLISH` / `SUBSCRIBE` / `PSUBSCRIBE`.
#[derive(Debug)]
pub struct RedisBroker {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    client: Client,
    publisher: ConnectionManager,
    sink: tokio::sync::Mutex<Option<PubSubSink>>,
    handlers: DashMap<String, DeliveryHandler>,
    prefix: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("prefix", &self.prefix)
            .field("subscriptions", &self.handlers.len())
            .finish()
    }
}

impl RedisBroker {
    /// Connect both the publisher and the subscriber connection.
    ///
    /// Each attempt is bounded by `connect_timeout_seconds`; failure maps
    /// to [`ErrorKind::BrokerUnavailable`].
    pub async fn connect(config: &BrokerConfig) -> AppResult<Self> {
        info!(url = %mask_redis_url(&config.url), "Connecting to Redis broker");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::BrokerUnavailable, "Invalid Redis URL", e)
        })?;
        let connect_timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));

        let publisher = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| AppError::broker_unavailable("Timed out connecting to Redis"))?
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::BrokerUnavailable,
                    "Failed to connect to Redis",
                    e,
                )
            })?;

        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            client,
            publisher,
            sink: tokio::sync::Mutex::new(None),
            handlers: DashMap::new(),
            prefix: config.channel_prefix.clone(),
            connect_timeout,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            shutdown,
        });

        let stream = inner.open_subscriber().await?;
        let task = tokio::spawn(run_delivery(inner.clone(), stream));

        info!("Successfully connected to Redis broker");
        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }
}

impl Inner {
    fn wire_name(&self, channel: &str) -> String {
        format!("{}{}", self.prefix, channel)
    }

    /// Open a pub/sub connection, replay every registered key and install
    /// its sink. The sink lock is held throughout, so a concurrent
    /// `subscribe` either lands in the replay or waits for the new sink.
    async fn open_subscriber(&self) -> AppResult<PubSubStream> {
        let mut slot = self.sink.lock().await;
        let pubsub = tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| AppError::broker_unavailable("Timed out opening Redis subscriber"))?
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::BrokerUnavailable,
                    "Failed to open Redis subscriber",
                    e,
                )
            })?;

        let (mut sink, stream) = pubsub.split();
        let keys: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            subscribe_key(&mut sink, &self.wire_name(&key), &key).await?;
        }
        *slot = Some(sink);
        Ok(stream)
    }

    fn dispatch(&self, msg: &redis::Msg) {
        let pattern = if msg.from_pattern() {
            match msg.get_pattern::<String>() {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(error = %e, "Redis message without a readable pattern");
                    return;
                }
            }
        } else {
            None
        };
        let Some((key, channel)) =
            resolve_route(&self.prefix, msg.get_channel_name(), pattern.as_deref())
        else {
            return;
        };

        let Some(handler) = self.handlers.get(key).map(|h| h.value().clone()) else {
            return;
        };

        match msg.get_payload::<String>() {
            Ok(payload) => handler(Delivery {
                channel: channel.to_string(),
                payload,
            }),
            Err(e) => warn!(channel, error = %e, "Dropping non-string Redis payload"),
        }
    }

    /// Retry the subscriber connection until it succeeds or shutdown is
    /// requested.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<PubSubStream> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            match self.open_subscriber().await {
                Ok(stream) => {
                    info!(
                        subscriptions = self.handlers.len(),
                        "Redis subscriber reconnected"
                    );
                    return Some(stream);
                }
                Err(e) => warn!(error = %e.chain(), "Redis subscriber reconnect failed"),
            }
        }
    }
}

/// Strip the namespace prefix from a delivered message, yielding the handler
/// key (the pattern for `PSUBSCRIBE` deliveries) and the logical channel.
fn resolve_route<'a>(
    prefix: &str,
    wire_channel: &'a str,
    pattern: Option<&'a str>,
) -> Option<(&'a str, &'a str)> {
    let channel = wire_channel.strip_prefix(prefix)?;
    let key = match pattern {
        Some(pattern) => pattern.strip_prefix(prefix)?,
        None => channel,
    };
    Some((key, channel))
}

async fn subscribe_key(sink: &mut PubSubSink, wire: &str, key: &str) -> AppResult<()> {
    let result = if is_pattern(key) {
        sink.psubscribe(wire).await
    } else {
        sink.subscribe(wire).await
    };
    result.map_err(|e| {
        AppError::with_source(
            ErrorKind::BrokerUnavailable,
            format!("Failed to subscribe to {wire}"),
            e,
        )
    })
}

async fn run_delivery(inner: Arc<Inner>, mut stream: PubSubStream) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            next = stream.next() => match next {
                Some(msg) => inner.dispatch(&msg),
                None => {
                    warn!("Redis subscriber connection lost");
                    *inner.sink.lock().await = None;
                    match inner.reconnect(&mut shutdown).await {
                        Some(next_stream) => stream = next_stream,
                        None => break,
                    }
                }
            }
        }
    }
    debug!("Redis delivery task stopped");
}

#[async_trait]
impl MessageBroker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.inner.publisher.clone();
        redis::cmd("PUBLISH")
            .arg(self.inner.wire_name(channel))
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::BrokerUnavailable, "Redis PUBLISH failed", e)
            })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: DeliveryHandler) -> AppResult<()> {
        self.inner.handlers.insert(channel.to_string(), handler);
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => subscribe_key(sink, &self.inner.wire_name(channel), channel).await,
            // Picked up by the re-subscribe after reconnect.
            None => Ok(()),
        }
    }

    async fn unsubscribe(&self, channel: &str) -> AppResult<()> {
        self.inner.handlers.remove(channel);
        let mut sink = self.inner.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Ok(());
        };
        let wire = self.inner.wire_name(channel);
        let result = if is_pattern(channel) {
            sink.punsubscribe(&wire).await
        } else {
            sink.unsubscribe(&wire).await
        };
        result.map_err(|e| {
            AppError::with_source(
                ErrorKind::BrokerUnavailable,
                format!("Failed to unsubscribe from {wire}"),
                e,
            )
        })
    }

    async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.sink.lock().await.take();
        info!("Redis broker shut down");
    }
}

/// Mask the password in a Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}
