//! Streamable HTTP client transport.
//!
//! Every outbound message is one `POST`. The server answers `202` for
//! notifications and responses, and either a JSON body or an SSE stream for
//! requests. The `mcp-session-id` returned by the server is echoed on every
//! later request. After `notifications/initialized` is accepted, a standalone
//! `GET` stream is opened for server-initiated messages (a `405` means the
//! server does not offer one).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::sse::{check_status, pump_events};
use crate::transport::{
    CloseSignal, JsonRpcMessage, MessageTransport, TransportCore, is_request,
};

const MCP_SESSION_ID: &str = "mcp-session-id";
const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// MCP Streamable HTTP client.
pub struct StreamableHttpClientTransport {
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    core: Arc<TransportCore>,
    started: AtomicBool,
    standalone_opened: AtomicBool,
    session_id: Mutex<Option<HeaderValue>>,
}

impl StreamableHttpClientTransport {
    /// `headers` (already filtered by the allow-list) go on every request.
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url, headers: HeaderMap) -> Self {
        Self {
            url,
            headers,
            client,
            core: Arc::new(TransportCore::new()),
            started: AtomicBool::new(false),
            standalone_opened: AtomicBool::new(false),
            session_id: Mutex::new(None),
        }
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        let session = self
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(session) = session {
            headers.insert(HeaderName::from_static(MCP_SESSION_ID), session);
        }
        headers
    }

    fn remember_session(&self, headers: &HeaderMap) {
        if let Some(session) = headers.get(MCP_SESSION_ID) {
            *self
                .session_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        }
    }

    fn open_standalone_stream(&self) {
        if self.standalone_opened.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut headers = self.request_headers();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let request = self.client.get(self.url.clone()).headers(headers);
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(
                        event = "mcp.client.streamable_http.get_failed",
                        error = %error
                    );
                    return;
                }
            };
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                tracing::debug!(
                    event = "mcp.client.streamable_http.no_standalone_stream",
                    "server does not offer a standalone SSE stream"
                );
                return;
            }
            match check_status(response).await {
                Ok(response) => {
                    let events = Box::pin(response.bytes_stream().eventsource());
                    pump_events(core, events, "streamable-http", false).await;
                }
                Err(error) => tracing::debug!(
                    event = "mcp.client.streamable_http.get_rejected",
                    error = %error
                ),
            }
        });
    }
}

#[async_trait]
impl MessageTransport for StreamableHttpClientTransport {
    fn kind(&self) -> &'static str {
        "streamable-http"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        self.core.ensure_open()?;
        tracing::info!(
            event = "mcp.client.streamable_http.ready",
            url = %self.url,
            "connected to Streamable HTTP transport"
        );
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.request_headers())
            .json(&message)
            .send()
            .await?;
        self.remember_session(response.headers());
        let response = check_status(response).await?;

        if response.status() == StatusCode::ACCEPTED {
            if message.get("method").and_then(Value::as_str) == Some(INITIALIZED_NOTIFICATION) {
                self.open_standalone_stream();
            }
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/event-stream") {
            let events = Box::pin(response.bytes_stream().eventsource());
            tokio::spawn(pump_events(
                Arc::clone(&self.core),
                events,
                "streamable-http",
                false,
            ));
        } else if content_type.starts_with("application/json") {
            match response.json::<Value>().await? {
                Value::Array(batch) => {
                    for item in batch {
                        self.core.deliver(item);
                    }
                }
                single => {
                    self.core.deliver(single);
                }
            }
        } else if is_request(&message) {
            return Err(TransportError::Protocol(format!(
                "unexpected content type `{content_type}`"
            )));
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
        if self.core.finish(None) {
            tracing::debug!(event = "mcp.client.streamable_http.closed", url = %self.url);
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}
