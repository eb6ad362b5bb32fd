//! In-process broker for single-node deployments and tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use beacon_core::AppResult;

use super::{Delivery, DeliveryHandler, MessageBroker, matches_pattern};

/// A shared in-memory transport.
///
/// Every [`MemoryBroker`] attached to the same bus sees every publication,
/// the way processes sharing one Redis instance do.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<Delivery>,
}

impl MemoryBus {
    /// Create a bus buffering up to `capacity` undelivered payloads per
    /// attached broker.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One process's view of a [`MemoryBus`].
pub struct MemoryBroker {
    bus: MemoryBus,
    prefix: String,
    handlers: Arc<DashMap<String, DeliveryHandler>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("prefix", &self.prefix)
            .field("subscriptions", &self.handlers.len())
            .finish()
    }
}

impl MemoryBroker {
    /// Attach to `bus`, namespacing channels with `prefix`.
    pub fn new(bus: &MemoryBus, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let handlers: Arc<DashMap<String, DeliveryHandler>> = Arc::new(DashMap::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_delivery(
            bus.sender.subscribe(),
            shutdown_rx,
            prefix.clone(),
            handlers.clone(),
        ));

        Self {
            bus: bus.clone(),
            prefix,
            handlers,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn run_delivery(
    mut rx: broadcast::Receiver<Delivery>,
    mut shutdown: watch::Receiver<bool>,
    prefix: String,
    handlers: Arc<DashMap<String, DeliveryHandler>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = rx.recv() => match received {
                Ok(delivery) => {
                    let Some(channel) = delivery.channel.strip_prefix(prefix.as_str()) else {
                        continue;
                    };
                    dispatch(&handlers, channel, &delivery.payload);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Memory broker lagged; payloads dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("Memory broker delivery task stopped");
}

fn dispatch(handlers: &DashMap<String, DeliveryHandler>, channel: &str, payload: &str) {
    let matched: Vec<DeliveryHandler> = handlers
        .iter()
        .filter(|entry| matches_pattern(entry.key(), channel))
        .map(|entry| entry.value().clone())
        .collect();

    for handler in matched {
        handler(Delivery {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        // No receivers simply means nobody is listening.
        let _ = self.bus.sender.send(Delivery {
            channel: format!("{}{}", self.prefix, channel),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: DeliveryHandler) -> AppResult<()> {
        self.handlers.insert(channel.to_string(), handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> AppResult<()> {
        self.handlers.remove(channel);
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        self.handlers.clear();
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
