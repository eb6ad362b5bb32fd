//! Shared test helpers for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use beacon_api::{AppState, build_app, serve};
use beacon_core::config::{AppConfig, BrokerProvider};
use beacon_realtime::{MemoryBroker, MemoryBus, RealtimeEngine};

/// Origin on the test allowlist.
pub const ALLOWED_ORIGIN: &str = "http://allowed.test";

/// Body limit used by the test configuration.
pub const BODY_LIMIT: usize = 1024;

/// Configuration shared by all tests.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.broker.provider = BrokerProvider::Memory;
    config.broker.channel_prefix = "test:".to_string();
    config.server.cors.allowed_origins = vec![ALLOWED_ORIGIN.to_string()];
    config.body.max_bytes = BODY_LIMIT;
    config
}

async fn engine_on(bus: &MemoryBus, config: &AppConfig) -> Arc<RealtimeEngine> {
    let broker = Arc::new(MemoryBroker::new(bus, config.broker.channel_prefix.clone()));
    let engine = Arc::new(RealtimeEngine::new(config.realtime.clone(), broker));
    engine.attach().await.expect("Failed to attach engine");
    engine
}

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Application config
    pub config: AppConfig,
}

impl TestApp {
    /// Create a test application serving `routes`.
    pub async fn with_routes(routes: Router<AppState>) -> Self {
        Self::with_config(test_config(), routes).await
    }

    /// Create a test application with an explicit configuration.
    pub async fn with_config(config: AppConfig, routes: Router<AppState>) -> Self {
        let engine = engine_on(&MemoryBus::default(), &config).await;
        let state = AppState::new(config.clone(), engine);
        Self {
            router: build_app(state, routes),
            config,
        }
    }

    /// Make a JSON request to the test app
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body_str = body
            .map(|b| serde_json::to_string(&b).expect("Failed to serialize body"))
            .unwrap_or_default();

        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let req = req
            .body(Body::from(body_str))
            .expect("Failed to build request");
        self.send(req).await
    }

    /// Send a prepared request
    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Parsed JSON body
    pub body: Value,
}

impl TestResponse {
    /// Header value as a string, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `name=value` pair of the first `Set-Cookie` header.
    pub fn cookie(&self) -> Option<String> {
        self.header("set-cookie")
            .and_then(|c| c.split(';').next())
            .map(str::to_string)
    }
}

/// A server listening on an ephemeral port.
pub struct TestServer {
    /// Bound address
    pub addr: SocketAddr,
    /// The server's engine
    pub engine: Arc<RealtimeEngine>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server whose broker is attached to `bus`.
    pub async fn start(bus: &MemoryBus) -> Self {
        let config = test_config();
        let engine = engine_on(bus, &config).await;
        let app = build_app(AppState::new(config, engine.clone()), Router::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local address");

        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = serve(listener, app, async {
                let _ = rx.await;
            })
            .await;
        });

        Self {
            addr,
            engine,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Open a WebSocket client.
    pub async fn connect(&self) -> WsClient {
        let url = format!("ws://{}/ws", self.addr);
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("WebSocket handshake failed");
        WsClient { stream }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.engine.close_all();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
    }
}

/// A WebSocket test client speaking JSON frames.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send a JSON frame.
    pub async fn send(&mut self, frame: Value) {
        self.stream
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("Failed to send frame");
    }

    /// Send a raw text frame, ignoring transport errors.
    pub async fn send_text(&mut self, text: String) {
        let _ = self.stream.send(Message::Text(text.into())).await;
    }

    /// Next JSON frame within `wait`, skipping control frames.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stream.next()).await.ok()??;
            match next.expect("WebSocket error") {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("Invalid JSON frame"));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Next JSON frame; panics after two seconds.
    pub async fn recv(&mut self) -> Value {
        self.recv_within(Duration::from_secs(2))
            .await
            .expect("Timed out waiting for frame")
    }

    /// Subscribe and wait for the acknowledgement.
    pub async fn subscribe(&mut self, channel: &str) {
        self.send(serde_json::json!({"type": "subscribe", "channel": channel}))
            .await;
        let ack = self.recv().await;
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["channel"], channel);
    }

    /// Publish a payload on a channel.
    pub async fn publish(&mut self, channel: &str, payload: Value) {
        self.send(serde_json::json!({"type": "publish", "channel": channel, "payload": payload}))
            .await;
    }

    /// Close the connection.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
