//! Shared fixtures: an in-memory connector standing in for the downstream server.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use futures::{Stream, StreamExt};
use omni_mcp_client::{
    CloseSignal, EstablishError, EstablishRequest, JsonRpcMessage, MemoryTransport,
    MessageTransport, TransportConnector, TransportError, TransportParams,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(10);

/// One downstream connection handed out by [`MemoryConnector`].
#[derive(Clone)]
pub struct Downstream {
    /// The server's end of the pair; what the bridge sends arrives here.
    pub server: Arc<MemoryTransport>,
    /// Feeds the backing transport's diagnostic stream.
    pub stderr: mpsc::UnboundedSender<String>,
    /// How many times the bridge called `close` on the backing end.
    pub closes: Arc<AtomicUsize>,
}

impl Downstream {
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Backing end that counts `close` calls and delegates everything else.
struct CountingTransport {
    inner: Arc<MemoryTransport>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageTransport for CountingTransport {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.inner.start().await
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.inner.send(message).await
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.inner.take_inbound()
    }

    fn closed(&self) -> CloseSignal {
        self.inner.closed()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }

    fn take_diagnostics(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inner.take_diagnostics()
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id()
    }
}

/// Hands out memory pairs and optionally answers every request with an echo.
#[derive(Default)]
pub struct MemoryConnector {
    echo: bool,
    unauthorized: AtomicBool,
    connections: Mutex<Vec<Downstream>>,
}

impl MemoryConnector {
    /// Connections are left for the test to drive.
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request is answered with `{"echo": <method>}`.
    pub fn echoing() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Self::default()
        })
    }

    /// Reject further connects as the downstream server would on a bad token.
    pub fn reject_unauthorized(&self) {
        self.unauthorized.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<Downstream> {
        self.connections.lock().unwrap().clone()
    }

    pub fn last(&self) -> Downstream {
        self.connections().pop().expect("no downstream connection yet")
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(
        &self,
        _request: &EstablishRequest,
    ) -> Result<Arc<dyn MessageTransport>, EstablishError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(EstablishError::UpstreamUnauthorized {
                status: 401,
                message: "invalid token".to_string(),
            });
        }
        let (server, backing, stderr) = MemoryTransport::pair_with_diagnostics();
        if self.echo {
            spawn_echo(Arc::clone(&server));
        }
        let closes = Arc::new(AtomicUsize::new(0));
        self.connections.lock().unwrap().push(Downstream {
            server,
            stderr,
            closes: Arc::clone(&closes),
        });
        Ok(Arc::new(CountingTransport {
            inner: backing,
            closes,
        }))
    }
}

/// Answer each request arriving on `server` with `{"echo": <method>}`.
pub fn spawn_echo(server: Arc<MemoryTransport>) {
    let mut inbound = server.take_inbound().expect("server inbound");
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            let (Some(id), Some(method)) = (message.get("id"), message.get("method")) else {
                continue;
            };
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"echo": method}});
            if server.send(reply).await.is_err() {
                return;
            }
        }
    });
}

pub fn stdio_request() -> EstablishRequest {
    EstablishRequest {
        params: TransportParams::Stdio {
            command: "mock-server".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        },
        headers: HeaderMap::new(),
    }
}

pub fn request(id: u64, method: &str) -> JsonRpcMessage {
    json!({"jsonrpc": "2.0", "id": id, "method": method})
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<JsonRpcMessage>) -> JsonRpcMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Read a streaming body until the accumulated text contains `needle`.
pub async fn read_until<S, E>(body: &mut S, buffer: &mut String, needle: &str)
where
    S: Stream<Item = Result<axum::body::Bytes, E>> + Unpin,
    E: std::fmt::Debug,
{
    timeout(WAIT, async {
        while !buffer.contains(needle) {
            let chunk = body
                .next()
                .await
                .expect("stream ended early")
                .expect("body error");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {buffer:?}"));
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
