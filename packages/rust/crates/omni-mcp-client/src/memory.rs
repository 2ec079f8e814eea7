//! In-process transport pair: what one end sends, the other end receives.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{CloseSignal, JsonRpcMessage, MessageTransport, TransportCore};

/// One end of an in-process connection. Closing either end closes both.
pub struct MemoryTransport {
    core: Arc<TransportCore>,
    peer: Weak<TransportCore>,
    diagnostics: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MemoryTransport {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let left = Arc::new(TransportCore::new());
        let right = Arc::new(TransportCore::new());
        (
            Arc::new(Self::end(&left, &right)),
            Arc::new(Self::end(&right, &left)),
        )
    }

    /// Create a connected pair whose second end also exposes a diagnostic
    /// stream fed through the returned sender, like a child process's stderr.
    #[must_use]
    pub fn pair_with_diagnostics() -> (Arc<Self>, Arc<Self>, mpsc::UnboundedSender<String>) {
        let left = Arc::new(TransportCore::new());
        let right = Arc::new(TransportCore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut with_diagnostics = Self::end(&right, &left);
        with_diagnostics.diagnostics = std::sync::Mutex::new(Some(rx));
        (
            Arc::new(Self::end(&left, &right)),
            Arc::new(with_diagnostics),
            tx,
        )
    }

    fn end(own: &Arc<TransportCore>, peer: &Arc<TransportCore>) -> Self {
        Self {
            core: Arc::clone(own),
            peer: Arc::downgrade(peer),
            diagnostics: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.core.ensure_open()
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        let peer = self.peer.upgrade().ok_or(TransportError::Closed)?;
        if peer.deliver(message) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.core.take_inbound()
    }

    fn closed(&self) -> CloseSignal {
        self.core.closed()
    }

    async fn close(&self) {
        self.core.finish(None);
        if let Some(peer) = self.peer.upgrade() {
            peer.finish(None);
        }
    }

    fn take_diagnostics(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}
