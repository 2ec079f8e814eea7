//! Bridge-level errors and their HTTP mapping.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use omni_mcp_client::{EstablishError, TransportError};
use serde::Serialize;
use thiserror::Error;

/// Which way a message was travelling through a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToBacking,
    BackingToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientToBacking => "client->backing",
            Self::BackingToClient => "backing->client",
        })
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// The destination rejected a message; the link is torn down.
    #[error("forwarding {direction} failed: {source}")]
    Forwarding {
        direction: Direction,
        #[source]
        source: TransportError,
    },

    /// The named side's inbound stream is already consumed by another link.
    #[error("{0} transport is already wired")]
    AlreadyWired(&'static str),
}

impl LinkError {
    #[must_use]
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Forwarding { direction, .. } => Some(*direction),
            Self::AlreadyWired(_) => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Session not found: {0}")]
pub struct SessionNotFound(pub String);

/// Invalid bridge configuration (`MCP_ENV_VARS` and friends).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment table: {0}")]
    EnvVars(#[source] serde_json::Error),
}

/// Everything a route handler can fail with.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Establish(#[from] EstablishError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    SessionNotFound(#[from] SessionNotFound),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Establish(err) => StatusCode::from_u16(err.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Link(_) | Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// JSON error body: `{"code": <status>, "message": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::SessionNotFound(_) => (status, "Session not found").into_response(),
            other => {
                let message = match &other {
                    Self::Establish(EstablishError::UpstreamUnauthorized { message, .. }) => {
                        message.clone()
                    }
                    _ => other.to_string(),
                };
                let body = ErrorBody {
                    code: status.as_u16(),
                    message,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
