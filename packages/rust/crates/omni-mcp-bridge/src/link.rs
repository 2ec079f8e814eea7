//! Bidirectional forwarding between one client-facing transport and the
//! backing transport that was active when the session was wired.
//!
//! Three pumps run per link:
//! - client → backing, sequential so per-source order holds. It keeps
//!   draining after the link closes so requests that can no longer be
//!   forwarded are answered with an explicit JSON-RPC error.
//! - backing → client, stopped when the link closes.
//! - backing diagnostics → client as `notifications/stderr`.
//!
//! The link never closes either transport; session cleanup belongs to the
//! caller.

use std::sync::Arc;

use omni_mcp_client::{
    JsonRpcMessage, MessageTransport, TransportError, is_request, stderr_notification,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Direction, LinkError};

/// JSON-RPC error code for requests that reach a dead link.
pub const BACKING_CLOSED_CODE: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    BackingClosed,
    ForwardingFailure { direction: Direction, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unwired,
    Active,
    Closed(CloseReason),
}

pub struct ProxyLink {
    client: Arc<dyn MessageTransport>,
    backing: Arc<dyn MessageTransport>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl ProxyLink {
    #[must_use]
    pub fn new(client: Arc<dyn MessageTransport>, backing: Arc<dyn MessageTransport>) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Unwired);
        Arc::new(Self {
            client,
            backing,
            state,
            cancel: CancellationToken::new(),
        })
    }

    /// Take both inbound streams and start the pumps.
    ///
    /// # Errors
    /// [`LinkError::AlreadyWired`] if this link was wired before, or either
    /// transport's inbound stream already belongs to another link.
    pub fn wire(self: &Arc<Self>) -> Result<(), LinkError> {
        if *self.state.borrow() != LinkState::Unwired {
            return Err(LinkError::AlreadyWired("link"));
        }
        let client_rx = self
            .client
            .take_inbound()
            .ok_or(LinkError::AlreadyWired("client"))?;
        let backing_rx = self
            .backing
            .take_inbound()
            .ok_or(LinkError::AlreadyWired("backing"))?;
        let diagnostics = self.backing.take_diagnostics();

        self.state.send_replace(LinkState::Active);
        tracing::info!(
            event = "mcp.bridge.link.wired",
            client = self.client.kind(),
            backing = self.backing.kind(),
            stderr = diagnostics.is_some(),
            "proxy link active"
        );

        tokio::spawn(Arc::clone(self).pump_client(client_rx));
        tokio::spawn(Arc::clone(self).pump_backing(backing_rx));
        if let Some(diagnostics) = diagnostics {
            tokio::spawn(Arc::clone(self).pump_diagnostics(diagnostics));
        }
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Resolves with the reason once the link has closed.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let LinkState::Closed(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                return CloseReason::ClientClosed;
            }
        }
    }

    /// Send one client message to the backing transport.
    ///
    /// # Errors
    /// [`LinkError::Forwarding`] when the link is closed or the backing
    /// transport rejects the message; the latter closes the link.
    pub async fn forward_to_backing(&self, message: JsonRpcMessage) -> Result<(), LinkError> {
        self.forward(Direction::ClientToBacking, message).await
    }

    /// Send one backing message to the client transport.
    ///
    /// # Errors
    /// See [`ProxyLink::forward_to_backing`].
    pub async fn forward_to_client(&self, message: JsonRpcMessage) -> Result<(), LinkError> {
        self.forward(Direction::BackingToClient, message).await
    }

    async fn forward(&self, direction: Direction, message: JsonRpcMessage) -> Result<(), LinkError> {
        if !matches!(*self.state.borrow(), LinkState::Active) {
            return Err(LinkError::Forwarding {
                direction,
                source: TransportError::Closed,
            });
        }
        let destination = match direction {
            Direction::ClientToBacking => &self.backing,
            Direction::BackingToClient => &self.client,
        };
        match destination.send(message).await {
            Ok(()) => Ok(()),
            Err(source) => {
                self.close_with(CloseReason::ForwardingFailure {
                    direction,
                    error: source.to_string(),
                });
                Err(LinkError::Forwarding { direction, source })
            }
        }
    }

    /// First closure wins; later calls are ignored.
    fn close_with(&self, reason: CloseReason) -> bool {
        let closed = self.state.send_if_modified(|state| {
            if matches!(state, LinkState::Closed(_)) {
                return false;
            }
            *state = LinkState::Closed(reason.clone());
            true
        });
        if !closed {
            return false;
        }
        self.cancel.cancel();
        match &reason {
            CloseReason::ForwardingFailure { direction, error } => tracing::warn!(
                event = "mcp.bridge.link.forwarding_failed",
                direction = %direction,
                error = %error,
                "forwarding failed; link closed"
            ),
            other => tracing::info!(
                event = "mcp.bridge.link.closed",
                reason = ?other,
                "proxy link closed"
            ),
        }
        true
    }

    async fn pump_client(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        while let Some(message) = inbound.recv().await {
            let request_id = is_request(&message)
                .then(|| message.get("id").cloned())
                .flatten();
            if let Err(error) = self.forward_to_backing(message).await {
                tracing::warn!(
                    event = "mcp.bridge.link.rejected",
                    error = %error,
                    "client message not forwarded"
                );
                if let Some(id) = request_id {
                    self.reject(id).await;
                }
            }
        }
        self.close_with(CloseReason::ClientClosed);
    }

    /// Tell the client its request died with the backing connection.
    async fn reject(&self, id: JsonRpcMessage) {
        let reply = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": BACKING_CLOSED_CODE,
                "message": "Backing connection closed",
            },
        });
        if let Err(error) = self.client.send(reply).await {
            tracing::debug!(event = "mcp.bridge.link.reject_failed", error = %error);
        }
    }

    async fn pump_backing(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => return,
                next = inbound.recv() => next,
            };
            let Some(message) = next else {
                self.close_with(CloseReason::BackingClosed);
                return;
            };
            if self.forward_to_client(message).await.is_err() {
                return;
            }
        }
    }

    async fn pump_diagnostics(self: Arc<Self>, mut diagnostics: mpsc::UnboundedReceiver<String>) {
        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return,
                chunk = diagnostics.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                return;
            };
            if self.forward_to_client(stderr_notification(&chunk)).await.is_err() {
                return;
            }
        }
    }
}
