//! Session lifecycle: establish the backing connection, create and register
//! the client-facing transport, wire the link, and drop the registry entry
//! when the client goes away.

use std::sync::Arc;

use omni_mcp_client::{EstablishError, EstablishRequest, MessageTransport, TransportConnector};

use crate::backing::BackingConnectionManager;
use crate::error::LinkError;
use crate::link::ProxyLink;
use crate::registry::{ClientTransport, SessionRegistry};

pub struct Bridge {
    backing: BackingConnectionManager,
    registry: Arc<SessionRegistry>,
}

impl Bridge {
    #[must_use]
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            backing: BackingConnectionManager::new(connector),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn backing(&self) -> &BackingConnectionManager {
        &self.backing
    }

    /// Replace the backing connection.
    ///
    /// # Errors
    /// The connector's failure, unchanged.
    pub async fn establish_backing(
        &self,
        request: &EstablishRequest,
    ) -> Result<Arc<dyn MessageTransport>, EstablishError> {
        self.backing.establish(request).await
    }

    /// Register `client`, wire it to `backing`, and arrange for the session
    /// to be removed once `client` closes.
    ///
    /// # Errors
    /// [`LinkError::AlreadyWired`] if either transport is already in use; the
    /// session is not left registered.
    pub fn attach_session(
        &self,
        client: ClientTransport,
        backing: Arc<dyn MessageTransport>,
    ) -> Result<Arc<ProxyLink>, LinkError> {
        let session_id = client.session_id().to_string();
        self.registry.register(session_id.clone(), client.clone());

        let transport = client.as_transport();
        let link = ProxyLink::new(Arc::clone(&transport), backing);
        if let Err(error) = link.wire() {
            self.registry.remove(&session_id);
            return Err(error);
        }

        let registry = Arc::clone(&self.registry);
        let closed = transport.closed();
        tokio::spawn(async move {
            closed.wait().await;
            registry.remove(&session_id);
            tracing::info!(
                event = "mcp.bridge.session.closed",
                session_id = %session_id,
                remaining = registry.len(),
                "client session closed"
            );
        });
        tracing::info!(
            event = "mcp.bridge.session.opened",
            session_id = %client.session_id(),
            kind = ?client.kind(),
            "client session opened"
        );
        Ok(link)
    }

    /// Close every session and the backing connection.
    pub async fn shutdown(&self) {
        for session in self.registry.sessions() {
            session.as_transport().close().await;
            self.registry.remove(session.session_id());
        }
        self.backing.shutdown().await;
    }
}
