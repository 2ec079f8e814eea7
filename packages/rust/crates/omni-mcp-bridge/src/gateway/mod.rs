//! Gateway namespace: HTTP entrypoint.

mod http;

pub use http::{GatewayState, HealthResponse, router, run_http, serve};
