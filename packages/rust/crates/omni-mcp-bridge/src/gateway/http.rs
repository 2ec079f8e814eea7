//! HTTP gateway: top-level connects establish a backing connection and open a
//! session; session-addressed requests are routed through the registry.
//!
//! Upstream 401 → 401 JSON, unknown session → 404, any other establishment
//! failure → 500 JSON.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response, Sse, sse::KeepAlive},
    routing::{get, post},
};
use omni_mcp_client::{EstablishError, EstablishRequest, MessageTransport};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::ClientTransport;
use crate::server_transport::{MCP_SESSION_ID, SseServerTransport, StreamableHttpServerTransport};

/// Shared state for the HTTP server.
#[derive(Clone)]
pub struct GatewayState {
    pub bridge: Arc<Bridge>,
    pub config: Arc<BridgeConfig>,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

type QueryMap = HashMap<String, String>;

async fn handle_sse(
    State(state): State<GatewayState>,
    Query(query): Query<QueryMap>,
    headers: HeaderMap,
) -> Response {
    tracing::info!(
        event = "mcp.bridge.http.sse.connect",
        transport_type = query.get("transportType").map_or("-", String::as_str),
        "new SSE connection (legacy transport; prefer streamable-http)"
    );
    connect_sse(&state, &query, headers)
        .await
        .unwrap_or_else(|err| failure("/sse", err))
}

async fn handle_stdio(
    State(state): State<GatewayState>,
    Query(query): Query<QueryMap>,
    headers: HeaderMap,
) -> Response {
    tracing::info!(
        event = "mcp.bridge.http.stdio.connect",
        transport_type = query.get("transportType").map_or("-", String::as_str),
        "new connection"
    );
    connect_sse(&state, &query, headers)
        .await
        .unwrap_or_else(|err| failure("/stdio", err))
}

/// Shared by `/sse` and `/stdio`: both serve the session as an SSE stream.
async fn connect_sse(
    state: &GatewayState,
    query: &QueryMap,
    headers: HeaderMap,
) -> Result<Response, BridgeError> {
    let request = EstablishRequest::from_query(query, headers)?;
    let backing = state.bridge.establish_backing(&request).await?;

    let transport = Arc::new(SseServerTransport::new(ClientTransport::SSE_MESSAGE_PATH));
    let stream = transport.event_stream()?;
    state
        .bridge
        .attach_session(ClientTransport::Sse(transport), backing)?;
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn handle_message(
    State(state): State<GatewayState>,
    Query(query): Query<QueryMap>,
    body: Bytes,
) -> Response {
    let session_id = query.get("sessionId").map_or("", String::as_str);
    tracing::debug!(event = "mcp.bridge.http.message", session_id = %session_id);
    match state.bridge.registry().lookup(session_id) {
        Ok(ClientTransport::Sse(transport)) => transport.handle_post(&body),
        Ok(ClientTransport::StreamableHttp(_)) | Err(_) => {
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
    }
}

async fn handle_mcp_post(
    State(state): State<GatewayState>,
    Query(query): Query<QueryMap>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match session_header(&headers) {
        Some(session_id) => match state.bridge.registry().lookup(&session_id) {
            Ok(ClientTransport::StreamableHttp(transport)) => {
                transport.handle_request(&Method::POST, &headers, &body)
            }
            Ok(ClientTransport::Sse(_)) | Err(_) => (
                StatusCode::NOT_FOUND,
                format!("Transport not found for sessionId {session_id}"),
            )
                .into_response(),
        },
        None => {
            tracing::info!(
                event = "mcp.bridge.http.mcp.connect",
                transport_type = query.get("transportType").map_or("-", String::as_str),
                "new streamable-http connection"
            );
            connect_streamable_http(&state, &query, headers, &body)
                .await
                .unwrap_or_else(|err| failure("/mcp", err))
        }
    }
}

async fn connect_streamable_http(
    state: &GatewayState,
    query: &QueryMap,
    headers: HeaderMap,
    body: &Bytes,
) -> Result<Response, BridgeError> {
    let request = EstablishRequest::from_query(query, headers.clone())?;
    let backing = state.bridge.establish_backing(&request).await?;

    let transport = Arc::new(StreamableHttpServerTransport::new());
    state
        .bridge
        .attach_session(ClientTransport::StreamableHttp(Arc::clone(&transport)), backing)?;
    let response = transport.handle_request(&Method::POST, &headers, body);
    if !transport.is_initialized() {
        // The opening POST was rejected; do not keep a session nobody can use.
        transport.close().await;
    }
    Ok(response)
}

async fn handle_mcp_get(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    route_to_session(&state, &Method::GET, &headers)
}

async fn handle_mcp_delete(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    route_to_session(&state, &Method::DELETE, &headers)
}

fn route_to_session(state: &GatewayState, method: &Method, headers: &HeaderMap) -> Response {
    let transport = session_header(headers)
        .and_then(|id| state.bridge.registry().lookup(&id).ok());
    match transport {
        Some(ClientTransport::StreamableHttp(transport)) => {
            transport.handle_request(method, headers, &Bytes::new())
        }
        Some(ClientTransport::Sse(_)) | None => {
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn failure(route: &'static str, err: BridgeError) -> Response {
    match &err {
        BridgeError::Establish(EstablishError::UpstreamUnauthorized { message, .. }) => {
            tracing::error!(
                event = "mcp.bridge.http.upstream_unauthorized",
                route,
                message = %message,
                "Received 401 Unauthorized from MCP server"
            );
        }
        other => tracing::error!(
            event = "mcp.bridge.http.connect_failed",
            route,
            error = %other,
            "connection setup failed"
        ),
    }
    err.into_response()
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn handle_config(State(state): State<GatewayState>) -> Json<BridgeConfig> {
    Json(state.config.as_ref().clone())
}

/// Build the gateway router.
pub fn router(bridge: Arc<Bridge>, config: BridgeConfig) -> Router {
    let state = GatewayState {
        bridge,
        config: Arc::new(config),
    };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);
    Router::new()
        .route("/sse", get(handle_sse))
        .route("/stdio", get(handle_stdio))
        .route("/message", post(handle_message))
        .route(
            "/mcp",
            post(handle_mcp_post)
                .get(handle_mcp_get)
                .delete(handle_mcp_delete),
        )
        .route("/health", get(handle_health))
        .route("/config", get(handle_config))
        .layer(cors)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves; then every session and the
/// backing connection are closed so open event streams end and in-flight
/// requests can drain.
pub async fn serve<F>(
    listener: TcpListener,
    bridge: Arc<Bridge>,
    config: BridgeConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&bridge), config);
    let addr = listener.local_addr()?;
    tracing::info!(
        event = "mcp.bridge.http.listening",
        addr = %addr,
        "bridge listening (Ctrl+C/SIGTERM to stop)"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            bridge.shutdown().await;
        })
        .await?;
    tracing::info!(event = "mcp.bridge.http.stopped", "bridge stopped");
    Ok(())
}

/// Bind `bind_addr` and serve until Ctrl+C (SIGINT) or SIGTERM.
pub async fn run_http(bridge: Arc<Bridge>, config: BridgeConfig, bind_addr: &str) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    serve(listener, bridge, config, shutdown_signal()).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(error) => {
                tracing::warn!(event = "mcp.bridge.signal.sigterm_unavailable", error = %error);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(event = "mcp.bridge.signal.ctrl_c_unavailable", error = %error);
        }
    }
}
