//! Gateway Server shell (component J): owns the hot-swappable
//! Registry+Catalog snapshot, registers the seven meta-tool schemas, and
//! routes incoming MCP tool-calls to the [`crate::meta_tools`] handlers.
//!
//! Per spec §4.I / design notes: because handlers hold a reference to
//! this context, reload swaps a whole new `GatewayState` behind one
//! pointer under a mutex, rather than mutating Registry/Catalog in
//! place, so an in-flight handler finishes with the snapshot it started
//! on.

use op_mcp_core::{PackageRegistry, SchemaValidatorCache, ToolCatalog};
use op_mcp_oauth::OAuthManager;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One atomically-swappable snapshot of the Registry and Catalog.
pub struct GatewayState {
    pub registry: Arc<PackageRegistry>,
    pub catalog: Arc<ToolCatalog>,
}

/// Shared gateway context. Cheap to clone (everything behind `Arc`); the
/// only mutable cell is the `state` pointer itself.
#[derive(Clone)]
pub struct GatewayContext {
    state: Arc<RwLock<Arc<GatewayState>>>,
    pub oauth: Arc<OAuthManager>,
    pub validator: Arc<SchemaValidatorCache>,
}

impl GatewayContext {
    pub fn new(state: Arc<GatewayState>, oauth: Arc<OAuthManager>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            oauth,
            validator: Arc::new(SchemaValidatorCache::new()),
        }
    }

    /// Snapshot the current Registry+Catalog pair. Handlers should call
    /// this once at the top of each meta-tool invocation and use the
    /// returned pair for the rest of that call, so a reload mid-call
    /// cannot hand them a mix of old and new state.
    pub async fn snapshot(&self) -> Arc<GatewayState> {
        self.state.read().await.clone()
    }

    /// Atomically swap in a new Registry+Catalog snapshot, returning the
    /// old one so the caller can close its clients after the swap.
    pub async fn swap(&self, new_state: Arc<GatewayState>) -> Arc<GatewayState> {
        let mut guard = self.state.write().await;
        std::mem::replace(&mut *guard, new_state)
    }
}

/// JSON-RPC tool schema for one of the seven meta-tools, as returned by
/// the gateway's own `tools/list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetaToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// The fixed set of meta-tool schemas the gateway exposes. Order matches
/// spec §1.
pub fn meta_tool_schemas() -> Vec<MetaToolSchema> {
    use serde_json::json;
    vec![
        MetaToolSchema {
            name: "list_tool_packages",
            description: "List configured upstream MCP packages, their summaries, and health.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "safe_only": {"type": "boolean"},
                    "include_disabled": {"type": "boolean"},
                    "limit": {"type": "integer"},
                    "include_health": {"type": "boolean"}
                }
            }),
        },
        MetaToolSchema {
            name: "list_tools",
            description: "List the tools exposed by one upstream package, paginated.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "package_id": {"type": "string"},
                    "summarize": {"type": "boolean"},
                    "include_schemas": {"type": "boolean"},
                    "page_size": {"type": "integer"},
                    "page_token": {"type": "string"}
                },
                "required": ["package_id"]
            }),
        },
        MetaToolSchema {
            name: "use_tool",
            description: "Invoke a single tool on a single upstream package.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "package_id": {"type": "string"},
                    "tool_id": {"type": "string"},
                    "args": {"type": "object"},
                    "dry_run": {"type": "boolean"}
                },
                "required": ["package_id", "tool_id"]
            }),
        },
        MetaToolSchema {
            name: "multi_use_tool",
            description: "Invoke several tool calls in parallel across packages, preserving input order in the result.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "requests": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "request_id": {"type": "string"},
                                "package_id": {"type": "string"},
                                "tool_id": {"type": "string"},
                                "args": {"type": "object"},
                                "dry_run": {"type": "boolean"}
                            },
                            "required": ["package_id", "tool_id"]
                        }
                    },
                    "concurrency": {"type": "integer"},
                    "timeout_ms": {"type": "integer"}
                },
                "required": ["requests"]
            }),
        },
        MetaToolSchema {
            name: "authenticate",
            description: "Start or check the OAuth authorization flow for an upstream package.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "package_id": {"type": "string"},
                    "wait_for_completion": {"type": "boolean"}
                },
                "required": ["package_id"]
            }),
        },
        MetaToolSchema {
            name: "health_check_all",
            description: "Check connectivity and auth status of every configured package.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "detailed": {"type": "boolean"}
                }
            }),
        },
        MetaToolSchema {
            name: "get_help",
            description: "Return usage guidance for the gateway's meta-tools.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string"}
                }
            }),
        },
    ]
}
