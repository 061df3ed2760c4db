//! Test helpers for integration tests
//!
//! Provides utilities for spawning gateways, connecting WebSocket
//! clients and waiting on gateway state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chat_cache::{BroadcastBus, MemoryBus, MemoryHub, MemoryPresenceLedger};
use chat_common::{AppConfig, JwtVerifier};
use chat_core::Snowflake;
use chat_gateway::connection::{ConnectionState, GatewayStats};
use chat_gateway::{Gateway, GatewayDeps};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::fixtures::{identify, principal, MemoryMembershipStore};

pub const TEST_SECRET: &str = "integration-test-secret";

/// How long a client waits for any single frame
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test configuration
pub fn test_config(instance_id: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.gateway.host = "127.0.0.1".to_string();
    config.gateway.instance_id = instance_id.to_string();
    config.gateway.heartbeat_interval_ms = 5_000;
    config.gateway.identify_timeout_ms = 2_000;
    config.gateway.outbound_queue_capacity = 64;
    config.gateway.dispatch_workers = 2;
    config.presence.offline_grace_ms = 200;
    config.jwt.secret = TEST_SECRET.to_string();
    config
}

/// Access token for `user_id`, signed with [`TEST_SECRET`]
pub fn token_for(user_id: Snowflake) -> String {
    JwtVerifier::new(TEST_SECRET)
        .issue(&principal(user_id), chrono::Duration::hours(1))
        .expect("issue token")
}

/// Bus handle for a non-gateway publisher (the REST service)
pub fn publisher(hub: &Arc<MemoryHub>) -> MemoryBus {
    MemoryBus::connect(Arc::clone(hub), &AppConfig::default().bus, "rest-api")
}

/// Test server instance that manages lifecycle
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    gateway: Gateway,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a gateway on its own hub
    pub async fn start(store: Arc<MemoryMembershipStore>) -> Result<Self> {
        Self::start_with(MemoryHub::new(4096), store, test_config("gw-test")).await
    }

    /// Start a gateway on a shared hub with a custom config
    pub async fn start_with(
        hub: Arc<MemoryHub>,
        store: Arc<MemoryMembershipStore>,
        config: AppConfig,
    ) -> Result<Self> {
        let bus = MemoryBus::connect(hub, &config.bus, &config.gateway.instance_id);
        let deps = GatewayDeps {
            store,
            bus: Arc::new(bus),
            ledger: Arc::new(MemoryPresenceLedger::new()),
            verifier: Arc::new(JwtVerifier::new(&config.jwt.secret)),
            config,
        };
        let gateway = Gateway::start(deps).await?;
        let app = gateway.router();

        // Bind to an ephemeral port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        // Spawn server task
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            client,
            gateway,
            handle,
        })
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// This gateway's own bus
    pub fn bus(&self) -> &Arc<dyn BroadcastBus> {
        self.gateway.state().bus()
    }

    pub fn stats(&self) -> GatewayStats {
        self.gateway.state().manager().stats()
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("http://{}{}", self.addr, path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Open a WebSocket and read HELLO
    pub async fn connect(&self) -> Result<WsClient> {
        WsClient::connect(self.addr).await
    }

    /// Open a WebSocket, identify as `user_id` and read READY.
    ///
    /// READY can reach the client just before the connection flips to
    /// ready on the server, so this also waits for that.
    pub async fn connect_as(&self, user_id: Snowflake) -> Result<(WsClient, Value)> {
        let mut ws = self.connect().await?;
        let ready = ws.identify(&token_for(user_id)).await?;
        let session_id = ready["d"]["session_id"]
            .as_str()
            .context("READY without session_id")?
            .to_string();

        let registry = self.gateway.state().manager().registry();
        let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
        while !registry.connections_of(user_id).iter().any(|c| {
            c.session_id() == session_id && c.state() == ConnectionState::Ready
        }) {
            if tokio::time::Instant::now() > deadline {
                bail!("connection {session_id} never became ready");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok((ws, ready))
    }

    /// Poll the gateway counters until `check` passes
    pub async fn wait_for(&self, check: impl Fn(&GatewayStats) -> bool) -> Result<GatewayStats> {
        let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
        loop {
            let stats = self.stats();
            if check(&stats) {
                return Ok(stats);
            }
            if tokio::time::Instant::now() > deadline {
                bail!("gateway never reached expected state, last seen {stats:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Close all connections and stop the gateway. Returns how many socket
    /// tasks were still running when the gateway finished shutting down.
    pub async fn shutdown(self) -> usize {
        let sockets = Arc::clone(self.gateway.state().sockets());
        self.gateway.shutdown().await;
        self.handle.abort();
        sockets.count()
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway client speaking JSON text frames
pub struct WsClient {
    socket: Socket,
    pub hello: Value,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let url = format!("ws://{addr}/gateway");
        let (socket, _) = tokio_tungstenite::connect_async(&url)
            .await
            .context("ws connect")?;
        let mut client = Self {
            socket,
            hello: Value::Null,
        };
        let hello = client.next_json().await?;
        if hello["op"] != 10 {
            bail!("expected HELLO, got {hello}");
        }
        client.hello = hello;
        Ok(client)
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        self.socket.send(Message::Text(value.to_string())).await?;
        Ok(())
    }

    /// Send IDENTIFY and return the READY dispatch
    pub async fn identify(&mut self, token: &str) -> Result<Value> {
        self.send_json(&identify(token)).await?;
        self.next_event("READY").await
    }

    /// Next JSON frame, failing on close or timeout
    pub async fn next_json(&mut self) -> Result<Value> {
        loop {
            let msg = tokio::time::timeout(FRAME_TIMEOUT, self.socket.next())
                .await
                .context("timed out waiting for a frame")?
                .context("stream ended")??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => bail!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Next dispatch of `event_type`, skipping everything else
    pub async fn next_event(&mut self, event_type: &str) -> Result<Value> {
        loop {
            let frame = self.next_json().await?;
            if frame["op"] == 0 && frame["t"] == event_type {
                return Ok(frame);
            }
        }
    }

    /// Next frame with `op`, skipping dispatches and other control frames
    pub async fn next_op(&mut self, op: u8) -> Result<Value> {
        loop {
            let frame = self.next_json().await?;
            if frame["op"] == op {
                return Ok(frame);
            }
        }
    }

    /// Assert no `event_type` dispatch arrives within `window`
    pub async fn expect_no_event(&mut self, event_type: &str, window: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let next = tokio::time::timeout_at(deadline, self.socket.next()).await;
            let Ok(msg) = next else {
                return Ok(());
            };
            match msg.context("stream ended")?? {
                Message::Text(text) => {
                    let frame: Value = serde_json::from_str(&text)?;
                    if frame["op"] == 0 && frame["t"] == event_type {
                        bail!("unexpected {event_type}: {frame}");
                    }
                }
                Message::Close(frame) => bail!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Read until the server closes, returning the close code
    pub async fn expect_close(&mut self) -> Result<u16> {
        loop {
            let msg = tokio::time::timeout(FRAME_TIMEOUT, self.socket.next())
                .await
                .context("timed out waiting for close")?;
            match msg {
                Some(Ok(Message::Close(Some(frame)))) => return Ok(u16::from(frame.code)),
                Some(Ok(Message::Close(None))) | None => bail!("closed without a close frame"),
                Some(Ok(_)) => {}
                Some(Err(e)) => bail!("socket error before close frame: {e}"),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}
