//! MCP bridge: client-facing SSE and Streamable HTTP sessions relayed to one
//! downstream MCP server.
//!
//! - **Backing connection**: one process-wide downstream transport built by a
//!   [`TransportConnector`](omni_mcp_client::TransportConnector); every top-level
//!   connect replaces it.
//! - **Sessions**: each client connection gets a server-side transport keyed by
//!   session id in the [`SessionRegistry`].
//! - **Links**: a [`ProxyLink`] pumps messages both ways and injects the
//!   downstream process's stderr as `notifications/stderr`.

#![allow(missing_docs)]

mod backing;
mod bridge;
mod config;
mod error;
mod gateway;
mod link;
mod registry;
mod server_transport;

pub use backing::BackingConnectionManager;
pub use bridge::Bridge;
pub use config::{BridgeConfig, DEFAULT_BIND};
pub use error::{BridgeError, ConfigError, Direction, ErrorBody, LinkError, SessionNotFound};
pub use gateway::{GatewayState, HealthResponse, router, run_http, serve};
pub use link::{BACKING_CLOSED_CODE, CloseReason, LinkState, ProxyLink};
pub use registry::{ClientTransport, ClientTransportKind, SessionRegistry};
pub use server_transport::{MCP_SESSION_ID, SseServerTransport, StreamableHttpServerTransport};
