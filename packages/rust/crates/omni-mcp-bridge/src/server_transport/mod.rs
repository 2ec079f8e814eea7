//! Client-facing transports served over HTTP.

mod sse;
mod streamable_http;

use std::sync::Arc;

use omni_mcp_client::TransportCore;

pub use sse::SseServerTransport;
pub use streamable_http::{MCP_SESSION_ID, StreamableHttpServerTransport};

/// Closes the owning transport when an HTTP response stream is dropped.
struct CloseOnDrop(Arc<TransportCore>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.0.finish(None) {
            tracing::debug!(
                event = "mcp.bridge.stream.dropped",
                "client disconnected; closing transport"
            );
        }
    }
}
