//! The transport contract shared by downstream and client-facing transports.
//!
//! Inbound messages are delivered through a single-consumer channel taken once
//! with [`MessageTransport::take_inbound`]; closure is observed through a
//! [`CloseSignal`]. [`TransportCore`] implements both halves so every transport
//! gets the same first-wins closure semantics.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Opaque JSON-RPC message. The bridge never interprets payloads.
pub type JsonRpcMessage = Value;

/// Method name of the injected diagnostic notification.
pub const STDERR_NOTIFICATION_METHOD: &str = "notifications/stderr";

/// Why a transport closed. `error` is `None` for orderly closure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseCause {
    /// Transport error that caused the closure, if any.
    pub error: Option<String>,
}

/// Resolves once the owning transport has closed.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<Option<CloseCause>>,
}

impl CloseSignal {
    /// Wait for closure. Returns immediately when already closed.
    pub async fn wait(mut self) -> CloseCause {
        match self.rx.wait_for(Option::is_some).await {
            Ok(cause) => cause.clone().unwrap_or_default(),
            // Sender dropped without closing: the transport is gone.
            Err(_) => CloseCause::default(),
        }
    }

    /// Closure cause if already closed.
    #[must_use]
    pub fn peek(&self) -> Option<CloseCause> {
        self.rx.borrow().clone()
    }
}

/// Uniform contract over every wire variant.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Short variant name used in logs (`stdio`, `sse`, ...).
    fn kind(&self) -> &'static str;

    /// Begin delivering and accepting messages.
    async fn start(&self) -> Result<(), TransportError>;

    /// Deliver one message to the peer. Order is preserved per transport.
    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError>;

    /// Take the inbound message receiver. Only the first call returns `Some`.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>>;

    /// Closure notification, resolved exactly once.
    fn closed(&self) -> CloseSignal;

    /// Release the underlying channel. Idempotent.
    async fn close(&self);

    /// Auxiliary diagnostic text (stderr of a child process).
    fn take_diagnostics(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        None
    }

    /// Session identifier, for transports that have one.
    fn session_id(&self) -> Option<String> {
        None
    }

    /// True once the transport has closed.
    fn is_closed(&self) -> bool {
        self.closed().peek().is_some()
    }
}

/// Lifecycle state embedded in every transport.
pub struct TransportCore {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
    closed_tx: watch::Sender<Option<CloseCause>>,
    cancel: CancellationToken,
}

impl Default for TransportCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportCore {
    #[must_use]
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(None);
        Self {
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue an inbound message for the consumer. Returns false once closed.
    pub fn deliver(&self, message: JsonRpcMessage) -> bool {
        let guard = self
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Mark the transport closed. Only the first call has an effect; returns
    /// whether this call performed the transition.
    pub fn finish(&self, error: Option<String>) -> bool {
        let transitioned = self.closed_tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(CloseCause { error });
            true
        });
        if transitioned {
            self.inbound_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            self.cancel.cancel();
        }
        transitioned
    }

    #[must_use]
    pub fn closed(&self) -> CloseSignal {
        CloseSignal {
            rx: self.closed_tx.subscribe(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_tx.borrow().is_some()
    }

    /// Cancelled when the transport closes; background tasks select on it.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `Err(Closed)` once the transport has closed.
    pub fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Build the notification that carries one chunk of child-process stderr.
#[must_use]
pub fn stderr_notification(content: &str) -> JsonRpcMessage {
    json!({
        "jsonrpc": "2.0",
        "method": STDERR_NOTIFICATION_METHOD,
        "params": { "content": content },
    })
}

/// Request: has both `method` and `id`.
#[must_use]
pub fn is_request(message: &JsonRpcMessage) -> bool {
    message.get("method").is_some() && message.get("id").is_some_and(|id| !id.is_null())
}

/// Response: has `id` and either `result` or `error`, and no `method`.
#[must_use]
pub fn is_response(message: &JsonRpcMessage) -> bool {
    message.get("method").is_none()
        && message.get("id").is_some()
        && (message.get("result").is_some() || message.get("error").is_some())
}
