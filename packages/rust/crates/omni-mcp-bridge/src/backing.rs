//! The single process-wide backing (downstream) connection.

use std::sync::Arc;

use omni_mcp_client::{EstablishError, EstablishRequest, MessageTransport, TransportConnector};
use tokio::sync::Mutex;

/// Owns the active backing transport. The slot is only touched while the
/// async mutex is held, so close → connect → store runs as one unit and two
/// concurrent `establish` calls can never orphan a connection.
pub struct BackingConnectionManager {
    connector: Arc<dyn TransportConnector>,
    active: Mutex<Option<Arc<dyn MessageTransport>>>,
}

impl BackingConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            active: Mutex::new(None),
        }
    }

    /// Replace the active backing connection with a new one built from
    /// `request`. The previous connection is closed first; on failure the
    /// slot stays empty and the connector's error is returned unchanged.
    ///
    /// # Errors
    /// Whatever the connector reports, including `UpstreamUnauthorized`.
    pub async fn establish(
        &self,
        request: &EstablishRequest,
    ) -> Result<Arc<dyn MessageTransport>, EstablishError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::info!(
                event = "mcp.bridge.backing.replacing",
                kind = previous.kind(),
                "closing previous backing connection"
            );
            previous.close().await;
            previous.closed().wait().await;
        }

        let transport = self.connector.connect(request).await?;
        tracing::info!(
            event = "mcp.bridge.backing.established",
            kind = transport.kind(),
            requested = %request.kind(),
            "backing connection established"
        );
        *active = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// The active backing connection, if any.
    pub async fn current(&self) -> Option<Arc<dyn MessageTransport>> {
        self.active.lock().await.clone()
    }

    /// Close the active connection (server exit).
    pub async fn shutdown(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.close().await;
            tracing::info!(event = "mcp.bridge.backing.shutdown", kind = previous.kind());
        }
    }
}
