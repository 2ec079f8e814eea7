//! Client-facing legacy SSE transport: one long-lived event stream per
//! session plus `POST /message?sessionId=<id>` for inbound messages.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::BoxStream;
use omni_mcp_client::{
    CloseSignal, JsonRpcMessage, MessageTransport, TransportCore, TransportError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::CloseOnDrop;

/// One viewer connected through `GET /sse` or `GET /stdio`.
pub struct SseServerTransport {
    session_id: String,
    endpoint: String,
    core: Arc<TransportCore>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
}

impl SseServerTransport {
    /// `message_path` is where the client posts its messages; the session id
    /// is appended as the `sessionId` query parameter.
    #[must_use]
    pub fn new(message_path: &str) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let endpoint = format!("{message_path}?sessionId={session_id}");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            endpoint,
            core: Arc::new(TransportCore::new()),
            outbound_tx: Mutex::new(Some(tx)),
            outbound_rx: Mutex::new(Some(rx)),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Relative URL announced in the `endpoint` event.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The response body for the connecting request: the `endpoint` event,
    /// then one `message` event per outbound message. Dropping the stream
    /// (client disconnect) closes the transport.
    ///
    /// # Errors
    /// `AlreadyStarted` if the stream was already taken.
    pub fn event_stream(
        &self,
    ) -> Result<BoxStream<'static, Result<Event, Infallible>>, TransportError> {
        self.core.ensure_open()?;
        let rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        let endpoint = Event::default().event("endpoint").data(self.endpoint.clone());
        let state = OutboundStream {
            rx,
            cancel: self.core.cancellation(),
            _guard: CloseOnDrop(Arc::clone(&self.core)),
        };
        let messages = futures::stream::unfold(state, |mut state| async move {
            let message = tokio::select! {
                () = state.cancel.cancelled() => None,
                message = state.rx.recv() => message,
            }?;
            let event = Event::default().event("message").data(message.to_string());
            Some((Ok(event), state))
        });
        Ok(futures::stream::once(async move { Ok(endpoint) })
            .chain(messages)
            .boxed())
    }

    /// Handle one `POST /message` body.
    pub fn handle_post(&self, body: &Bytes) -> Response {
        let message: JsonRpcMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(
                    event = "mcp.bridge.sse.invalid_post",
                    session_id = %self.session_id,
                    error = %error
                );
                return (StatusCode::BAD_REQUEST, format!("Invalid message: {error}"))
                    .into_response();
            }
        };
        if self.core.deliver(message) {
            (StatusCode::ACCEPTED, "Accepted").into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "SSE connection not established").into_response()
        }
    }
}

struct OutboundStream {
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    cancel: CancellationToken,
    _guard: CloseOnDrop,
}

#[async_trait]
impl MessageTransport for SseServerTransport {
    fn kind(&self) -> &'static str {
        "sse-server"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.core.ensure_open()
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        let guard = self
            .outbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).map_err(|_| TransportError::Closed)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.core.take_inbound()
    }

    fn closed(&self) -> CloseSignal {
        self.core.closed()
    }

    async fn close(&self) {
        self.outbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.core.finish(None) {
            tracing::debug!(event = "mcp.bridge.sse.closed", session_id = %self.session_id);
        }
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }
}
