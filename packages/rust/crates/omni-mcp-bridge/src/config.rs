//! Runtime configuration shared with the HTTP layer.

use std::collections::BTreeMap;

use omni_mcp_client::{default_environment, parse_env_json};
use serde::Serialize;

use crate::error::ConfigError;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:6277";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Variables handed to every spawned stdio server, below the caller's
    /// own `env` overrides.
    pub default_environment: BTreeMap<String, String>,
    /// Command suggested to viewers by `GET /config`.
    pub default_command: String,
    /// Arguments suggested to viewers by `GET /config`.
    pub default_args: String,
}

impl BridgeConfig {
    /// The safe inherited environment merged with `env_vars` (a JSON object,
    /// usually `MCP_ENV_VARS`), which wins on conflicts.
    ///
    /// # Errors
    /// [`ConfigError::EnvVars`] when `env_vars` is not a JSON object.
    pub fn from_parts(
        env_vars: Option<&str>,
        default_command: Option<String>,
        default_args: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut environment = default_environment();
        if let Some(raw) = env_vars.filter(|raw| !raw.trim().is_empty()) {
            environment.extend(parse_env_json(raw).map_err(ConfigError::EnvVars)?);
        }
        Ok(Self {
            default_environment: environment,
            default_command: default_command.unwrap_or_default(),
            default_args: default_args.unwrap_or_default(),
        })
    }
}
