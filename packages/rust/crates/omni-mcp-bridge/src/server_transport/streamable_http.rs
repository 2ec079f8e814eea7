//! Client-facing Streamable HTTP transport (`/mcp`).
//!
//! Each `POST` carrying requests gets its own SSE response stream; responses
//! coming back from the backing server are routed to the stream that carried
//! the matching request id, and the stream ends once every id on it has been
//! answered. Server-initiated messages go to the standalone `GET` stream.

use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::Json;
use axum::body::Bytes;
use axum::http::header::{ACCEPT, ALLOW, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::BoxStream;
use omni_mcp_client::{
    CloseSignal, JsonRpcMessage, MessageTransport, TransportCore, TransportError, is_request,
    is_response,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Session header shared by requests and responses.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const SERVER_ERROR: i64 = -32000;
const SESSION_NOT_FOUND: i64 = -32001;

#[derive(Default)]
struct SessionState {
    initialized: bool,
    standalone: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    /// Request id (JSON-encoded) to the response stream waiting for it.
    pending: HashMap<String, u64>,
    streams: HashMap<u64, ResponseStream>,
    next_stream: u64,
}

struct ResponseStream {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    outstanding: usize,
}

/// One session on the multiplexed `/mcp` endpoint.
pub struct StreamableHttpServerTransport {
    session_id: String,
    core: Arc<TransportCore>,
    state: Mutex<SessionState>,
}

impl Default for StreamableHttpServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamableHttpServerTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            core: Arc::new(TransportCore::new()),
            state: Mutex::new(SessionState::default()),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// True once an `initialize` request has been accepted.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Dispatch one HTTP request addressed to this session.
    pub fn handle_request(&self, method: &Method, headers: &HeaderMap, body: &Bytes) -> Response {
        if self.core.is_closed() {
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        }
        if *method == Method::POST {
            self.handle_post(headers, body)
        } else if *method == Method::GET {
            self.handle_get(headers)
        } else if *method == Method::DELETE {
            self.terminate();
            tracing::info!(
                event = "mcp.bridge.streamable_http.deleted",
                session_id = %self.session_id,
                "session terminated by client"
            );
            StatusCode::OK.into_response()
        } else {
            (
                StatusCode::METHOD_NOT_ALLOWED,
                [(ALLOW, "GET, POST, DELETE")],
                "Method not allowed",
            )
                .into_response()
        }
    }

    fn handle_post(&self, headers: &HeaderMap, body: &Bytes) -> Response {
        if !(accepts(headers, "application/json") && accepts(headers, "text/event-stream")) {
            return jsonrpc_error(
                StatusCode::NOT_ACCEPTABLE,
                SERVER_ERROR,
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            );
        }
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
        if !is_json {
            return jsonrpc_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SERVER_ERROR,
                "Unsupported Media Type: Content-Type must be application/json",
            );
        }
        let messages = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(batch)) => batch,
            Ok(single) => vec![single],
            Err(error) => {
                return jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    PARSE_ERROR,
                    &format!("Parse error: {error}"),
                );
            }
        };
        if messages.is_empty() {
            return jsonrpc_error(
                StatusCode::BAD_REQUEST,
                INVALID_REQUEST,
                "Invalid Request: empty batch",
            );
        }

        let request_keys: BTreeSet<String> = messages
            .iter()
            .filter(|m| is_request(m))
            .filter_map(|m| m.get("id").map(Value::to_string))
            .collect();

        let response_rx = {
            let mut state = self.lock_state();
            if let Some(key) = request_keys.iter().find(|key| state.pending.contains_key(*key)) {
                tracing::debug!(
                    event = "mcp.bridge.streamable_http.duplicate_request_id",
                    session_id = %self.session_id,
                    id = %key
                );
                return jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    &format!("Invalid Request: request id {key} is already in flight"),
                );
            }
            if let Err(response) = self.check_session(&mut state, headers, &messages) {
                return response;
            }
            if request_keys.is_empty() {
                None
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                let stream_id = state.next_stream;
                state.next_stream += 1;
                for key in &request_keys {
                    state.pending.insert(key.clone(), stream_id);
                }
                state.streams.insert(
                    stream_id,
                    ResponseStream {
                        tx,
                        outstanding: request_keys.len(),
                    },
                );
                Some(rx)
            }
        };

        for message in messages {
            if !self.core.deliver(message) {
                return (StatusCode::NOT_FOUND, "Session not found").into_response();
            }
        }

        let session = [(MCP_SESSION_ID, self.session_id.clone())];
        match response_rx {
            None => (StatusCode::ACCEPTED, session).into_response(),
            Some(rx) => (session, sse_response(self.event_stream(rx))).into_response(),
        }
    }

    /// Enforce initialization order and the session header.
    fn check_session(
        &self,
        state: &mut SessionState,
        headers: &HeaderMap,
        messages: &[JsonRpcMessage],
    ) -> Result<(), Response> {
        let initializing = messages
            .iter()
            .any(|m| m.get("method").and_then(Value::as_str) == Some("initialize"));
        if initializing {
            if state.initialized {
                return Err(jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                ));
            }
            if messages.len() > 1 {
                return Err(jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Only one initialization request is allowed",
                ));
            }
            state.initialized = true;
            return Ok(());
        }
        if !state.initialized {
            return Err(jsonrpc_error(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                "Bad Request: Server not initialized",
            ));
        }
        let header = headers.get(MCP_SESSION_ID).and_then(|v| v.to_str().ok());
        if header.is_some_and(|id| id != self.session_id) {
            return Err(jsonrpc_error(
                StatusCode::NOT_FOUND,
                SESSION_NOT_FOUND,
                "Session not found",
            ));
        }
        Ok(())
    }

    fn handle_get(&self, headers: &HeaderMap) -> Response {
        if !accepts(headers, "text/event-stream") {
            return jsonrpc_error(
                StatusCode::NOT_ACCEPTABLE,
                SERVER_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }
        let rx = {
            let mut state = self.lock_state();
            if !state.initialized {
                return jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    SERVER_ERROR,
                    "Bad Request: Server not initialized",
                );
            }
            if state.standalone.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return jsonrpc_error(
                    StatusCode::CONFLICT,
                    SERVER_ERROR,
                    "Conflict: Only one SSE stream is allowed per session",
                );
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.standalone = Some(tx);
            rx
        };
        tracing::debug!(
            event = "mcp.bridge.streamable_http.standalone_opened",
            session_id = %self.session_id
        );
        let session = [(MCP_SESSION_ID, self.session_id.clone())];
        (session, sse_response(self.event_stream(rx))).into_response()
    }

    fn event_stream(
        &self,
        rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> BoxStream<'static, Result<Event, Infallible>> {
        let cancel = self.core.cancellation();
        futures::stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
            let message = tokio::select! {
                () = cancel.cancelled() => None,
                message = rx.recv() => message,
            }?;
            let event = Event::default().event("message").data(message.to_string());
            Some((Ok(event), (rx, cancel)))
        })
        .boxed()
    }

    fn terminate(&self) -> bool {
        {
            let mut state = self.lock_state();
            state.standalone = None;
            state.pending.clear();
            state.streams.clear();
        }
        self.core.finish(None)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageTransport for StreamableHttpServerTransport {
    fn kind(&self) -> &'static str {
        "streamable-http-server"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.core.ensure_open()
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        let mut state = self.lock_state();

        let response_key = message
            .get("id")
            .filter(|id| is_response(&message) && !id.is_null())
            .map(Value::to_string);
        if let Some(key) = response_key {
            let stream_id = state
                .pending
                .remove(&key)
                .ok_or_else(|| TransportError::UnknownRequest(key.clone()))?;
            let finished = match state.streams.get_mut(&stream_id) {
                Some(stream) => {
                    if stream.tx.send(message).is_err() {
                        tracing::debug!(
                            event = "mcp.bridge.streamable_http.response_stream_gone",
                            session_id = %self.session_id,
                            id = %key
                        );
                    }
                    stream.outstanding = stream.outstanding.saturating_sub(1);
                    stream.outstanding == 0
                }
                None => false,
            };
            if finished {
                state.streams.remove(&stream_id);
            }
            return Ok(());
        }

        let method = message
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let delivered = state
            .standalone
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok());
        if !delivered {
            state.standalone = None;
            tracing::debug!(
                event = "mcp.bridge.streamable_http.dropped",
                session_id = %self.session_id,
                method = method.as_deref().unwrap_or("-"),
                "no standalone stream open; dropping server message"
            );
        }
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.core.take_inbound()
    }

    fn closed(&self) -> CloseSignal {
        self.core.closed()
    }

    async fn close(&self) {
        if self.terminate() {
            tracing::debug!(
                event = "mcp.bridge.streamable_http.closed",
                session_id = %self.session_id
            );
        }
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }
}

fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(media_type))
}

fn sse_response(
    stream: BoxStream<'static, Result<Event, Infallible>>,
) -> Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>> {
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn jsonrpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": null,
    });
    (status, Json(body)).into_response()
}
