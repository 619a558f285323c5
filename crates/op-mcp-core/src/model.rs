//! Core data model shared by the config loader, registry, and catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport a package is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Http,
}

/// HTTP transport variant, only meaningful when [`Transport::Http`] is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpKind {
    /// MCP spec 2025-03-26 Streamable HTTP (default, supersedes SSE).
    Streamable,
    /// Legacy HTTP+SSE transport, preserved for backward compatibility.
    Sse,
}

/// Package visibility. Hidden packages are omitted from default listings
/// but remain reachable by `use_tool` with an explicit package id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Default,
    Hidden,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Default
    }
}

/// Auth mode recorded on a package for diagnostics (`auth_mode` in
/// `list_tool_packages`), distinct from the OAuth subsystem's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// stdio packages authenticate (if at all) via inherited env vars.
    Env,
    /// HTTP packages with `oauth: true` use the authorization-code flow.
    Oauth,
    /// HTTP packages with no auth configured.
    None,
}

/// Declarative auth settings carried on an HTTP package.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub mode: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub client_id: Option<String>,
    pub method: Option<String>,
}

/// A single normalized, post-merge configured upstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub transport: Transport,
    pub http_kind: Option<HttpKind>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    pub oauth: bool,
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub disabled: bool,
    /// Which config file this package's winning definition came from, for
    /// diagnostics surfaced by `health_check_all`.
    pub source_file: Option<String>,
    /// Sensitive-looking env keys whose resolved value still looks like a
    /// placeholder (see config loader env expansion), kept for `safe_only`
    /// filtering and health diagnostics.
    #[serde(default)]
    pub env_warnings: Vec<String>,
}

impl Package {
    pub fn auth_mode(&self) -> AuthMode {
        match self.transport {
            Transport::Stdio => AuthMode::Env,
            Transport::Http => {
                if self.oauth {
                    AuthMode::Oauth
                } else {
                    AuthMode::None
                }
            }
        }
    }

    /// `true` if any env value still contains a placeholder literal,
    /// used by `list_tool_packages`'s `safe_only` filter.
    pub fn has_placeholder_literals(&self) -> bool {
        self.env.values().any(|v| {
            v.contains("YOUR_CLIENT_ID") || v.contains("YOUR_SECRET") || v.contains("YOUR_TOKEN")
        })
    }
}

/// One tool advertised by an upstream package, enriched with the
/// gateway-computed summary/skeleton/hash fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTool {
    pub package_id: String,
    pub tool_name: String,
    pub tool_desc: Option<String>,
    pub input_schema: serde_json::Value,
    pub summary: String,
    pub args_skeleton: serde_json::Value,
    pub schema_hash: String,
}

/// Connection status values, forming the eager-connect state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Init,
    Pending,
    Connected,
    Failed,
    AuthRequired,
}

/// Registry-owned connection status for one package, keyed by package id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: Status,
    pub attempts: u32,
    pub error: Option<String>,
    pub health: Option<String>,
}

impl ConnectionStatus {
    pub fn init() -> Self {
        Self {
            status: Status::Init,
            attempts: 0,
            error: None,
            health: None,
        }
    }
}

/// Per-package cached tool listing plus catalog bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageToolCache {
    pub package_id: String,
    pub tools: Vec<CachedTool>,
    pub last_updated_ms: i64,
    pub etag: String,
    pub status: Status,
    pub error: Option<String>,
    pub attempts: Option<u32>,
    pub health: Option<String>,
}

/// Sum type produced by `multi_use_tool` for a single request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MultiToolResult {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        package_id: String,
        tool_id: String,
        args_used: serde_json::Value,
        result: serde_json::Value,
        telemetry: Telemetry,
    },
    Err {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        package_id: String,
        tool_id: String,
        error: ErrorPayload,
        telemetry: Telemetry,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub duration_ms: u64,
    pub status: &'static str,
}

impl Telemetry {
    pub fn ok(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            status: "ok",
        }
    }

    pub fn error(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            status: "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
