//! The `UpstreamClient` capability set (spec §3): a transport-agnostic
//! interface the Registry and Catalog program against, implemented by the
//! stdio and HTTP clients.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A single tool advertised by an upstream, as returned over the wire.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default)]
    pub annotations: Option<Value>,
}

/// Outcome of `health_check()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub ok: bool,
    pub error: Option<String>,
    pub needs_auth: bool,
}

impl HealthReport {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            needs_auth: false,
        }
    }

    pub fn needs_auth() -> Self {
        Self {
            ok: false,
            error: Some("authentication required".to_string()),
            needs_auth: true,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(msg.into()),
            needs_auth: false,
        }
    }
}

/// Transport-level error. `NeedsAuth` is the sentinel distinguishing "the
/// upstream refused unauthenticated access" from a hard failure — it must
/// never be treated as a crash.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication required")]
    NeedsAuth,

    #[error("client id mismatch, all persisted OAuth artifacts must be invalidated")]
    ClientIdMismatch,

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("upstream returned an error: {0}")]
    Upstream(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Capability set every upstream client (stdio or HTTP) implements.
/// Ownership: the Registry holds exactly one live client per package id.
#[async_trait]
pub trait UpstreamClient: Send + Sync + std::fmt::Debug {
    async fn connect(&self) -> Result<()>;
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value>;
    async fn close(&self);
    async fn health_check(&self) -> HealthReport;
    fn requires_auth(&self) -> bool;
    async fn is_authenticated(&self) -> bool;
}

/// The fields a [`ClientFactory`] needs to build a client, independent of
/// whatever richer `Package` type the caller (the core registry) owns —
/// this keeps the transport crate from depending on the core crate.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub id: String,
    pub transport: TransportKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub base_url: Option<String>,
    pub http_kind: crate::http::HttpKind,
    pub extra_headers: Vec<(String, String)>,
    pub oauth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

/// Builds the concrete [`UpstreamClient`] for a package. The default
/// implementation ([`crate::factory::DefaultClientFactory`]) has no OAuth
/// awareness; a gateway wiring in the OAuth subsystem supplies its own
/// factory that attaches a live token source to HTTP clients.
pub trait ClientFactory: Send + Sync {
    fn build(&self, spec: &PackageSpec) -> std::result::Result<Arc<dyn UpstreamClient>, TransportError>;
}
