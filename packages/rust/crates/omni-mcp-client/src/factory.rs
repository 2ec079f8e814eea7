//! Build and start backing transports from establishment requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EstablishRequest, TransportParams, compose_environment, forwarded_headers};
use crate::error::EstablishError;
use crate::sse::SseClientTransport;
use crate::stdio::{StdioClientTransport, StdioConfig};
use crate::streamable_http::StreamableHttpClientTransport;
use crate::transport::MessageTransport;

/// Anything that can produce a started backing transport.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Build and start a transport for `request`.
    async fn connect(
        &self,
        request: &EstablishRequest,
    ) -> Result<Arc<dyn MessageTransport>, EstablishError>;
}

/// The production connector: stdio, SSE and Streamable HTTP.
#[derive(Clone)]
pub struct TransportFactory {
    default_environment: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl TransportFactory {
    /// `default_environment` sits between the bridge's own environment and the
    /// caller's `env` overrides for spawned processes.
    #[must_use]
    pub fn new(default_environment: BTreeMap<String, String>) -> Self {
        Self {
            default_environment,
            http: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client for the network variants.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn default_environment(&self) -> &BTreeMap<String, String> {
        &self.default_environment
    }

    /// Build the transport for `request` without starting it.
    #[must_use]
    pub fn build(&self, request: &EstablishRequest) -> Arc<dyn MessageTransport> {
        let kind = request.kind();
        match &request.params {
            TransportParams::Stdio { command, args, env } => {
                let process_env = std::env::vars_os().filter_map(|(key, value)| {
                    Some((key.into_string().ok()?, value.into_string().ok()?))
                });
                let env = compose_environment(process_env, &self.default_environment, env);
                Arc::new(StdioClientTransport::new(StdioConfig {
                    command: command.clone(),
                    args: args.clone(),
                    env,
                }))
            }
            TransportParams::Sse { url } => {
                let headers = forwarded_headers(kind, &request.headers);
                tracing::info!(
                    event = "mcp.client.factory.sse",
                    url = %url,
                    headers = ?headers.keys().collect::<Vec<_>>(),
                    "SSE transport"
                );
                Arc::new(SseClientTransport::new(self.http.clone(), url.clone(), headers))
            }
            TransportParams::StreamableHttp { url } => {
                let headers = forwarded_headers(kind, &request.headers);
                tracing::info!(
                    event = "mcp.client.factory.streamable_http",
                    url = %url,
                    headers = ?headers.keys().collect::<Vec<_>>(),
                    "Streamable HTTP transport"
                );
                Arc::new(StreamableHttpClientTransport::new(
                    self.http.clone(),
                    url.clone(),
                    headers,
                ))
            }
        }
    }
}

#[async_trait]
impl TransportConnector for TransportFactory {
    async fn connect(
        &self,
        request: &EstablishRequest,
    ) -> Result<Arc<dyn MessageTransport>, EstablishError> {
        let kind = request.kind();
        let transport = self.build(request);
        if let Err(error) = transport.start().await {
            transport.close().await;
            let error = EstablishError::from_start(kind, error);
            tracing::warn!(
                event = "mcp.client.factory.start_failed",
                kind = %kind,
                error = %error,
                "backing transport failed to start"
            );
            return Err(error);
        }
        Ok(transport)
    }
}
