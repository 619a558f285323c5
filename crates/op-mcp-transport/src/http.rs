//! Upstream Client — HTTP (component C). Two transport kinds, selected by
//! configuration (never URL-sniffed): Streamable HTTP (default, MCP spec
//! 2025-03-26) and legacy HTTP+SSE.

use crate::traits::{HealthReport, Result, ToolDefinition, TransportError, UpstreamClient};
use async_trait::async_trait;
use op_mcp_oauth::Tokens;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpKind {
    Streamable,
    Sse,
}

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcErrorBody {
    #[allow(dead_code)]
    code: i32,
    message: String,
}

/// A live access token the HTTP client reads from before every request.
/// Supplied by whichever owns the OAuth manager (the Registry/gateway),
/// so this crate never has to know how tokens are refreshed.
pub trait TokenSource: Send + Sync {
    fn current(&self) -> Option<Tokens>;
}

pub struct StaticToken(pub Option<Tokens>);

impl TokenSource for StaticToken {
    fn current(&self) -> Option<Tokens> {
        self.0.clone()
    }
}

/// Per-package HTTP upstream client. An MCP HTTP transport is single-start:
/// once a 401-class error marks it `NeedsAuth`, the invariant is that the
/// caller builds a brand-new `HttpClient` after `finish_oauth` rather than
/// reusing or re-driving this one.
pub struct HttpClient {
    base_url: String,
    kind: HttpKind,
    extra_headers: Vec<(String, String)>,
    token_source: Option<Arc<dyn TokenSource>>,
    http: reqwest::Client,
    next_id: AtomicU64,
    needs_auth: RwLock<bool>,
    initialized: RwLock<bool>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("kind", &self.kind)
            .finish()
    }
}

impl HttpClient {
    pub fn new(
        base_url: String,
        kind: HttpKind,
        extra_headers: Vec<(String, String)>,
        token_source: Option<Arc<dyn TokenSource>>,
    ) -> std::result::Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            kind,
            extra_headers,
            token_source,
            http,
            next_id: AtomicU64::new(1),
            needs_auth: RwLock::new(false),
            initialized: RwLock::new(false),
        })
    }

    fn endpoint(&self) -> String {
        match self.kind {
            HttpKind::Streamable => self.base_url.clone(),
            HttpKind::Sse => format!("{}/message", self.base_url.trim_end_matches('/')),
        }
    }

    async fn build_request(&self, body: &JsonRpcRequest) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.endpoint()).json(body);
        for (name, value) in &self.extra_headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(source) = &self.token_source {
            if let Some(tokens) = source.current() {
                req = req.header("Authorization", format!("{} {}", tokens.token_type, tokens.access));
            }
        }
        req
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let req = self.build_request(&body).await;
        let response = req.send().await.map_err(|e| TransportError::Io(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            *self.needs_auth.write().await = true;
            return Err(TransportError::NeedsAuth);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.to_lowercase().contains("invalid_token") || text.to_lowercase().contains("unauthorized") {
                *self.needs_auth.write().await = true;
                return Err(TransportError::NeedsAuth);
            }
            if text.contains("Client ID mismatch") {
                return Err(TransportError::ClientIdMismatch);
            }
            return Err(TransportError::Upstream(format!("HTTP {status}: {text}")));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Io(format!("invalid JSON-RPC response: {e}")))?;
        if let Some(err) = parsed.error {
            if err.message.to_lowercase().contains("unauthorized")
                || err.message.to_lowercase().contains("invalid_token")
            {
                *self.needs_auth.write().await = true;
                return Err(TransportError::NeedsAuth);
            }
            return Err(TransportError::Upstream(err.message));
        }
        *self.needs_auth.write().await = false;
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl UpstreamClient for HttpClient {
    async fn connect(&self) -> Result<()> {
        if *self.initialized.read().await {
            return Ok(());
        }
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "op-mcp-gateway", "version": env!("CARGO_PKG_VERSION")}
                })),
            )
            .await;
        match result {
            Ok(_) => {
                *self.initialized.write().await = true;
                Ok(())
            }
            Err(TransportError::NeedsAuth) => {
                debug!("upstream {} requires authentication", self.base_url);
                Err(TransportError::NeedsAuth)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        self.connect().await?;
        let result = self.request("tools/list", None).await?;
        let tools: Vec<ToolDefinition> = result
            .get("tools")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.connect().await?;
        self.request("tools/call", Some(json!({"name": name, "arguments": args})))
            .await
    }

    async fn close(&self) {
        // Plain HTTP connections hold no persistent socket beyond
        // `reqwest`'s pooled connections; nothing to tear down explicitly.
    }

    async fn health_check(&self) -> HealthReport {
        if *self.needs_auth.read().await || !*self.initialized.read().await {
            if self.token_source.is_some() {
                return HealthReport::needs_auth();
            }
        }
        match self.list_tools().await {
            Ok(_) => HealthReport::ok(),
            Err(TransportError::NeedsAuth) => HealthReport::needs_auth(),
            Err(e) => {
                warn!("http health check failed for {}: {e}", self.base_url);
                HealthReport::error(e.to_string())
            }
        }
    }

    fn requires_auth(&self) -> bool {
        self.token_source.is_some()
    }

    async fn is_authenticated(&self) -> bool {
        match &self.token_source {
            Some(source) => source.current().is_some(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_endpoint_appends_message_suffix() {
        let client = HttpClient::new(
            "http://localhost:3000".to_string(),
            HttpKind::Sse,
            vec![],
            None,
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:3000/message");
    }

    #[test]
    fn streamable_endpoint_is_base_url() {
        let client = HttpClient::new(
            "http://localhost:3000".to_string(),
            HttpKind::Streamable,
            vec![],
            None,
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:3000");
    }

    #[test]
    fn requires_auth_reflects_token_source_presence() {
        let client = HttpClient::new("http://x".to_string(), HttpKind::Streamable, vec![], None).unwrap();
        assert!(!client.requires_auth());

        let with_auth = HttpClient::new(
            "http://x".to_string(),
            HttpKind::Streamable,
            vec![],
            Some(Arc::new(StaticToken(None))),
        )
        .unwrap();
        assert!(with_auth.requires_auth());
    }
}
