//! Downstream MCP transports for the omni bridge.
//!
//! Three wire variants share one [`MessageTransport`] contract:
//! - [`StdioClientTransport`]: spawned child process, newline-delimited JSON on
//!   stdin/stdout, stderr exposed as a diagnostic text stream.
//! - [`SseClientTransport`]: legacy HTTP+SSE (`GET` event stream, `POST` to the
//!   announced `endpoint`).
//! - [`StreamableHttpClientTransport`]: MCP Streamable HTTP (`POST` with JSON or
//!   SSE responses, optional standalone `GET` stream).
//!
//! [`TransportFactory`] turns an [`EstablishRequest`] (transport kind, kind
//! parameters, caller headers) into a started transport.

mod args;
mod config;
mod error;
mod factory;
mod memory;
mod sse;
mod stdio;
mod streamable_http;
mod transport;

pub use args::{ArgsParseError, split_args};
pub use config::{
    EstablishRequest, SSE_HEADERS_PASSTHROUGH, STREAMABLE_HTTP_HEADERS_PASSTHROUGH, TransportKind,
    TransportParams, compose_environment, default_environment, forwarded_headers,
    parse_env_json,
};
pub use error::{EstablishError, TransportError};
pub use factory::{TransportConnector, TransportFactory};
pub use memory::MemoryTransport;
pub use sse::SseClientTransport;
pub use stdio::{StdioClientTransport, StdioConfig};
pub use streamable_http::StreamableHttpClientTransport;
pub use transport::{
    CloseCause, CloseSignal, JsonRpcMessage, MessageTransport, STDERR_NOTIFICATION_METHOD,
    TransportCore, is_request, is_response, stderr_notification,
};
