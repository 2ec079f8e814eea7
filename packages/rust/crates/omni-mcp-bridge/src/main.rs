//! omni-mcp-bridge: HTTP server relaying MCP sessions to one downstream server.
//!
//! Logging: set `RUST_LOG=omni_mcp_bridge=debug` to see per-message traffic on stderr.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use omni_mcp_bridge::{Bridge, BridgeConfig, run_http};
use omni_mcp_client::TransportFactory;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "omni_mcp_bridge=debug,omni_mcp_client=debug"
        } else {
            "omni_mcp_bridge=info,omni_mcp_client=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = BridgeConfig::from_parts(
        cli.env_vars.as_deref(),
        cli.default_command,
        cli.default_args,
    )
    .context("MCP_ENV_VARS must be a JSON object")?;
    tracing::debug!(
        event = "mcp.bridge.config.loaded",
        env_vars = config.default_environment.len(),
        "bridge configuration loaded"
    );

    let connector = Arc::new(TransportFactory::new(config.default_environment.clone()));
    let bridge = Arc::new(Bridge::new(connector));
    run_http(bridge, config, &cli.bind).await
}
