use clap::Parser;

use omni_mcp_bridge::DEFAULT_BIND;

#[derive(Parser)]
#[command(name = "omni-mcp-bridge")]
#[command(
    about = "MCP bridge: serve SSE and Streamable HTTP sessions backed by one stdio, SSE or Streamable HTTP server."
)]
pub(crate) struct Cli {
    /// Listen address (e.g. 127.0.0.1:6277)
    #[arg(long, env = "MCP_BRIDGE_BIND", default_value = DEFAULT_BIND)]
    pub(crate) bind: String,

    /// JSON object of environment variables for spawned stdio servers.
    #[arg(long, env = "MCP_ENV_VARS")]
    pub(crate) env_vars: Option<String>,

    /// Command reported by `GET /config`.
    #[arg(long)]
    pub(crate) default_command: Option<String>,

    /// Arguments reported by `GET /config`, as one string.
    #[arg(long, allow_hyphen_values = true)]
    pub(crate) default_args: Option<String>,

    /// Debug logging (ignored when RUST_LOG is set).
    #[arg(short, long)]
    pub(crate) verbose: bool,
}
