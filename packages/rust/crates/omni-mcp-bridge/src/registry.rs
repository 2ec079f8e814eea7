//! Session id → client-facing transport.

use std::sync::Arc;

use dashmap::DashMap;
use omni_mcp_client::MessageTransport;

use crate::error::SessionNotFound;
use crate::server_transport::{SseServerTransport, StreamableHttpServerTransport};

/// Which client-facing transport to create for a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTransportKind {
    /// Single-shot SSE stream (`GET /sse`, `GET /stdio`).
    Sse,
    /// Session-multiplexed `/mcp` endpoint.
    StreamableHttp,
}

/// A registered client-facing transport.
#[derive(Clone)]
pub enum ClientTransport {
    Sse(Arc<SseServerTransport>),
    StreamableHttp(Arc<StreamableHttpServerTransport>),
}

impl ClientTransport {
    /// Path clients post to for SSE sessions.
    pub const SSE_MESSAGE_PATH: &'static str = "/message";

    /// Create a fresh transport with a new session id.
    #[must_use]
    pub fn create(kind: ClientTransportKind) -> Self {
        match kind {
            ClientTransportKind::Sse => {
                Self::Sse(Arc::new(SseServerTransport::new(Self::SSE_MESSAGE_PATH)))
            }
            ClientTransportKind::StreamableHttp => {
                Self::StreamableHttp(Arc::new(StreamableHttpServerTransport::new()))
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ClientTransportKind {
        match self {
            Self::Sse(_) => ClientTransportKind::Sse,
            Self::StreamableHttp(_) => ClientTransportKind::StreamableHttp,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Sse(t) => t.session_id(),
            Self::StreamableHttp(t) => t.session_id(),
        }
    }

    /// The transport behind the common contract.
    #[must_use]
    pub fn as_transport(&self) -> Arc<dyn MessageTransport> {
        match self {
            Self::Sse(t) => Arc::clone(t) as Arc<dyn MessageTransport>,
            Self::StreamableHttp(t) => Arc::clone(t) as Arc<dyn MessageTransport>,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, ClientTransport>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `transport` under `id`, returning any entry it replaced.
    pub fn register(&self, id: impl Into<String>, transport: ClientTransport) -> Option<ClientTransport> {
        let id = id.into();
        tracing::debug!(event = "mcp.bridge.registry.registered", session_id = %id);
        self.sessions.insert(id, transport)
    }

    /// # Errors
    /// [`SessionNotFound`] when `id` is not registered.
    pub fn lookup(&self, id: &str) -> Result<ClientTransport, SessionNotFound> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionNotFound(id.to_string()))
    }

    /// Idempotent; returns whether an entry was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::debug!(event = "mcp.bridge.registry.removed", session_id = %id);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of every registered transport.
    #[must_use]
    pub fn sessions(&self) -> Vec<ClientTransport> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }
}
