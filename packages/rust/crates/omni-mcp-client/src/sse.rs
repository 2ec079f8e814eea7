//! Legacy HTTP+SSE client transport (`GET` event stream, `POST` to the
//! announced `endpoint`) and the event pump shared with Streamable HTTP.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode, Url};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{CloseSignal, JsonRpcMessage, MessageTransport, TransportCore};

/// Map a non-success response to a transport error, keeping 401 distinct.
pub(crate) async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("Non-200 status code ({})", status.as_u16())
    } else {
        body
    };
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized {
            status: status.as_u16(),
            message,
        });
    }
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Parse and deliver one `message` event. Returns false once the transport
/// stopped accepting messages.
pub(crate) fn deliver_event(core: &TransportCore, event: &Event, kind: &'static str) -> bool {
    if event_type(event) != "message" || event.data.trim().is_empty() {
        return true;
    }
    match serde_json::from_str::<JsonRpcMessage>(&event.data) {
        Ok(message) => core.deliver(message),
        Err(error) => {
            tracing::warn!(
                event = "mcp.client.sse.invalid_message",
                transport = kind,
                error = %error,
                "ignoring non-JSON SSE message"
            );
            true
        }
    }
}

/// Event type with the `message` default applied.
fn event_type(event: &Event) -> &str {
    if event.event.is_empty() {
        "message"
    } else {
        &event.event
    }
}

/// Drain an event stream into the transport until it ends or the transport closes.
pub(crate) async fn pump_events<S, E>(
    core: Arc<TransportCore>,
    mut events: S,
    kind: &'static str,
    close_on_end: bool,
) where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Unpin,
    E: fmt::Display,
{
    let cancel = core.cancellation();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = events.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                if !deliver_event(&core, &event, kind) {
                    return;
                }
            }
            Some(Err(error)) => {
                if close_on_end {
                    core.finish(Some(format!("SSE stream error: {error}")));
                } else {
                    tracing::debug!(
                        event = "mcp.client.sse.stream_error",
                        transport = kind,
                        error = %error
                    );
                }
                return;
            }
            None => {
                if close_on_end {
                    core.finish(None);
                }
                return;
            }
        }
    }
}

/// Legacy HTTP+SSE client transport.
pub struct SseClientTransport {
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    core: Arc<TransportCore>,
    started: AtomicBool,
    endpoint: OnceLock<Url>,
}

impl SseClientTransport {
    /// `headers` are sent on the event-stream `GET` and on every `POST`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: Url, headers: HeaderMap) -> Self {
        Self {
            url,
            headers,
            client,
            core: Arc::new(TransportCore::new()),
            started: AtomicBool::new(false),
            endpoint: OnceLock::new(),
        }
    }

    /// Message endpoint announced by the server, once started.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.get()
    }

    fn resolve_endpoint(&self, data: &str) -> Result<Url, TransportError> {
        let endpoint = self
            .url
            .join(data.trim())
            .map_err(|e| TransportError::Protocol(format!("invalid endpoint `{data}`: {e}")))?;
        if endpoint.origin() != self.url.origin() {
            return Err(TransportError::Protocol(format!(
                "endpoint origin does not match connection origin: {}",
                endpoint.origin().ascii_serialization()
            )));
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl MessageTransport for SseClientTransport {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        self.core.ensure_open()?;

        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;
        let response = check_status(response).await?;
        let mut events = Box::pin(response.bytes_stream().eventsource());

        // The first `endpoint` event completes the handshake.
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(error)) => {
                    return Err(TransportError::Protocol(format!("SSE stream error: {error}")));
                }
                None => {
                    return Err(TransportError::Protocol(
                        "SSE stream ended before the endpoint event".to_string(),
                    ));
                }
            };
            if event_type(&event) == "endpoint" {
                let endpoint = self.resolve_endpoint(&event.data)?;
                tracing::debug!(event = "mcp.client.sse.endpoint", endpoint = %endpoint);
                let _ = self.endpoint.set(endpoint);
                break;
            }
            deliver_event(&self.core, &event, "sse");
        }

        tracing::info!(event = "mcp.client.sse.connected", url = %self.url, "connected to SSE transport");
        tokio::spawn(pump_events(Arc::clone(&self.core), events, "sse", true));
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        let endpoint = self.endpoint.get().ok_or(TransportError::NotStarted)?;
        let response = self
            .client
            .post(endpoint.clone())
            .headers(self.headers.clone())
            .json(&message)
            .send()
            .await?;
        check_status(response).await?;
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
            tracing::debug!(event = "mcp.client.sse.closed", url = %self.url);
        }
    }
}
