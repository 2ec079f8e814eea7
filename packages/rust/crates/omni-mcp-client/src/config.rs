//! Backing-connection parameters: transport kind, kind-specific parameters,
//! forwarded headers and the child-process environment.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::split_args;
use crate::error::EstablishError;

/// Caller headers passed through to the legacy SSE server.
pub const SSE_HEADERS_PASSTHROUGH: &[&str] = &["authorization"];

/// Caller headers passed through to a Streamable HTTP server.
pub const STREAMABLE_HTTP_HEADERS_PASSTHROUGH: &[&str] =
    &["authorization", "mcp-session-id", "last-event-id"];

const SSE_ACCEPT: &str = "text/event-stream";
const STREAMABLE_HTTP_ACCEPT: &str = "text/event-stream, application/json";

#[cfg(unix)]
const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "PROGRAMFILES",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

#[cfg(not(any(unix, windows)))]
const INHERITED_ENV_VARS: &[&str] = &["PATH"];

/// Wire variant of the backing connection (`transportType` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Spawned child process speaking MCP over stdio.
    Stdio,
    /// Legacy HTTP+SSE server.
    Sse,
    /// Streamable HTTP server.
    StreamableHttp,
}

impl TransportKind {
    /// Discriminator as it appears in the query string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// Header names forwarded from the caller to the downstream server.
    #[must_use]
    pub fn header_passthrough(self) -> &'static [&'static str] {
        match self {
            Self::Stdio => &[],
            Self::Sse => SSE_HEADERS_PASSTHROUGH,
            Self::StreamableHttp => STREAMABLE_HTTP_HEADERS_PASSTHROUGH,
        }
    }

    fn accept(self) -> Option<&'static str> {
        match self {
            Self::Stdio => None,
            Self::Sse => Some(SSE_ACCEPT),
            Self::StreamableHttp => Some(STREAMABLE_HTTP_ACCEPT),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = EstablishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" => Ok(Self::StreamableHttp),
            other => Err(EstablishError::InvalidTransportKind(other.to_string())),
        }
    }
}

/// Kind-specific parameters of a backing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    /// Spawn `command` with `args`; `env` overrides the default environment.
    Stdio {
        /// Executable name or path.
        command: String,
        /// Already tokenized arguments.
        args: Vec<String>,
        /// Caller-supplied environment overrides.
        env: BTreeMap<String, String>,
    },
    /// Connect to a legacy SSE endpoint.
    Sse {
        /// Event-stream URL.
        url: Url,
    },
    /// Connect to a Streamable HTTP endpoint.
    StreamableHttp {
        /// MCP endpoint URL.
        url: Url,
    },
}

impl TransportParams {
    /// Parse the routing layer's query map
    /// (`transportType`, `command`, `args`, `env`, `url`).
    ///
    /// # Errors
    /// [`EstablishError::InvalidTransportKind`] for an unknown or missing
    /// `transportType`; [`EstablishError::InvalidParameter`] for missing or
    /// malformed kind parameters.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, EstablishError> {
        let kind: TransportKind = query
            .get("transportType")
            .map(String::as_str)
            .unwrap_or_default()
            .parse()?;
        match kind {
            TransportKind::Stdio => {
                let command = query
                    .get("command")
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| invalid(kind, "command", "missing"))?;
                let args = match query.get("args") {
                    Some(raw) => split_args(raw).map_err(|e| invalid(kind, "args", e))?,
                    None => Vec::new(),
                };
                let env = match query.get("env").filter(|e| !e.trim().is_empty()) {
                    Some(raw) => parse_env_json(raw).map_err(|e| invalid(kind, "env", e))?,
                    None => BTreeMap::new(),
                };
                Ok(Self::Stdio { command, args, env })
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let raw = query
                    .get("url")
                    .ok_or_else(|| invalid(kind, "url", "missing"))?;
                let url = Url::parse(raw).map_err(|e| invalid(kind, "url", e))?;
                if kind == TransportKind::Sse {
                    Ok(Self::Sse { url })
                } else {
                    Ok(Self::StreamableHttp { url })
                }
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }
}

/// Everything needed to build one backing connection.
#[derive(Debug, Clone)]
pub struct EstablishRequest {
    /// Kind and kind-specific parameters.
    pub params: TransportParams,
    /// Snapshot of the caller's request headers.
    pub headers: HeaderMap,
}

impl EstablishRequest {
    /// Parse query parameters and keep the caller headers.
    ///
    /// # Errors
    /// See [`TransportParams::from_query`].
    pub fn from_query(
        query: &HashMap<String, String>,
        headers: HeaderMap,
    ) -> Result<Self, EstablishError> {
        Ok(Self {
            params: TransportParams::from_query(query)?,
            headers,
        })
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.params.kind()
    }
}

fn invalid(kind: TransportKind, name: &'static str, reason: impl fmt::Display) -> EstablishError {
    EstablishError::InvalidParameter {
        kind,
        name,
        reason: reason.to_string(),
    }
}

/// Parse a JSON object of environment variables. Non-string values are
/// stringified.
///
/// # Errors
/// Fails when `raw` is not a JSON object.
pub fn parse_env_json(raw: &str) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let table: BTreeMap<String, Value> = serde_json::from_str(raw)?;
    Ok(table
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

/// Outbound headers for a network transport: the required `Accept` plus the
/// allow-listed caller headers. Multi-valued headers collapse to their last
/// value.
#[must_use]
pub fn forwarded_headers(kind: TransportKind, caller: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    let Some(accept) = kind.accept() else {
        return out;
    };
    out.insert(ACCEPT, HeaderValue::from_static(accept));
    for name in kind.header_passthrough() {
        let name = HeaderName::from_static(*name);
        if let Some(value) = caller.get_all(&name).iter().last() {
            out.insert(name, value.clone());
        }
    }
    out
}

/// Safe subset of the bridge's own environment handed to child processes.
/// Values starting with `()` are shell function exports and are skipped.
#[must_use]
pub fn default_environment() -> BTreeMap<String, String> {
    INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = std::env::var(key).ok()?;
            if value.starts_with("()") {
                return None;
            }
            Some(((*key).to_string(), value))
        })
        .collect()
}

/// Layer environments in increasing precedence: `base` (the process
/// environment), `defaults`, `overrides`.
#[must_use]
pub fn compose_environment<I>(
    base: I,
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = base.into_iter().collect();
    env.extend(defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
