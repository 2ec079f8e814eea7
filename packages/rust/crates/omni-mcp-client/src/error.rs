//! Transport and establishment errors.

use thiserror::Error;

use crate::config::TransportKind;

/// Failure of a single transport operation (`start`, `send`).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed (locally, by the peer, or by the process exiting).
    #[error("transport closed")]
    Closed,

    /// `send` was called before `start`.
    #[error("transport not started")]
    NotStarted,

    /// `start` was called twice.
    #[error("transport already started")]
    AlreadyStarted,

    /// Process or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request could not be performed (DNS, connect, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Downstream rejected the credentials.
    #[error("unauthorized ({status}): {message}")]
    Unauthorized {
        /// HTTP status returned by the downstream server (401).
        status: u16,
        /// Error text reported by the downstream server.
        message: String,
    },

    /// Downstream answered with an unexpected HTTP status.
    #[error("unexpected HTTP status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Downstream broke the wire protocol (missing endpoint event, bad URL, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response was sent for a request id nobody is waiting on.
    #[error("no pending request with id {0}")]
    UnknownRequest(String),
}

/// Failure to establish a backing connection.
#[derive(Debug, Error)]
pub enum EstablishError {
    /// The transport kind discriminator is not one of `stdio`, `sse`, `streamable-http`.
    #[error("Invalid transport type specified: {0}")]
    InvalidTransportKind(String),

    /// A kind-specific parameter is missing or malformed.
    #[error("invalid {kind} parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Transport kind being built.
        kind: TransportKind,
        /// Query parameter name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Downstream explicitly rejected the credentials while connecting.
    #[error("Received {status} Unauthorized from MCP server: {message}")]
    UpstreamUnauthorized {
        /// HTTP status returned by the downstream server.
        status: u16,
        /// Error text reported by the downstream server.
        message: String,
    },

    /// Spawn, connect or handshake failed for any other reason.
    #[error("failed to establish {kind} transport: {source}")]
    Establish {
        /// Transport kind being built.
        kind: TransportKind,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
}

impl EstablishError {
    /// Wrap a `start()` failure, keeping authentication rejections distinguishable.
    #[must_use]
    pub fn from_start(kind: TransportKind, error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized { status, message } => {
                Self::UpstreamUnauthorized { status, message }
            }
            source => Self::Establish { kind, source },
        }
    }

    /// HTTP status the routing layer should answer with.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::UpstreamUnauthorized { status, .. } => *status,
            _ => 500,
        }
    }

    /// True for downstream authentication rejections.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::UpstreamUnauthorized { .. })
    }
}
