//! Upstream Client — stdio (component B). Spawns the configured command
//! as a child process, speaks newline-delimited JSON-RPC over its
//! stdin/stdout, and owns the child's lifetime.

use crate::traits::{HealthReport, Result, ToolDefinition, TransportError, UpstreamClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

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
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[allow(dead_code)]
    id: Option<Value>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i32,
    message: String,
}

/// Process handle plus the framed stdin/stdout halves. Held behind a
/// single mutex: stdio upstreams are spoken to one request at a time.
struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
}

pub struct StdioClient {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for StdioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioClient")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .finish()
    }
}

impl StdioClient {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>, cwd: Option<String>) -> Self {
        Self {
            command,
            args,
            env,
            cwd,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn diagnose_spawn_error(&self, err: &std::io::Error) -> TransportError {
        let argv = std::iter::once(self.command.clone())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        let cwd_display = self.cwd.clone().unwrap_or_else(|| "<inherited>".to_string());
        let msg = match err.kind() {
            std::io::ErrorKind::NotFound => format!(
                "command not found: '{}' — install it or check PATH (argv: {argv}, cwd: {cwd_display})",
                self.command
            ),
            std::io::ErrorKind::PermissionDenied => format!(
                "permission denied running '{}' — try chmod +x (argv: {argv}, cwd: {cwd_display})",
                self.command
            ),
            _ => format!(
                "failed to spawn '{}': {err} (argv: {argv}, cwd: {cwd_display})",
                self.command
            ),
        };
        TransportError::Spawn(msg)
    }

    async fn spawn(&self) -> Result<Connection> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_clear()
            .envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| self.diagnose_spawn_error(&e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Io("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io("child stdout not piped".to_string()))?;

        info!("spawned stdio upstream: {} {:?}", self.command, self.args);
        Ok(Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn ensure_connected(&self, guard: &mut Option<Connection>) -> Result<()> {
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        self.ensure_connected(&mut guard).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&req).map_err(|e| TransportError::Io(e.to_string()))?;
        line.push('\n');

        let conn = guard.as_mut().expect("connection just ensured");
        if let Err(e) = conn.stdin.write_all(line.as_bytes()).await {
            *guard = None;
            return Err(TransportError::Io(format!("write to child stdin failed: {e}")));
        }
        if let Err(e) = conn.stdin.flush().await {
            *guard = None;
            return Err(TransportError::Io(format!("flush to child stdin failed: {e}")));
        }

        let mut response_line = String::new();
        match conn.stdout.read_line(&mut response_line).await {
            Ok(0) => {
                *guard = None;
                return Err(TransportError::Io("child closed stdout (EOF)".to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                *guard = None;
                return Err(TransportError::Io(format!("read from child stdout failed: {e}")));
            }
        }

        let parsed: JsonRpcResponse = serde_json::from_str(response_line.trim())
            .map_err(|e| TransportError::Io(format!("invalid JSON-RPC response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(TransportError::Upstream(err.message));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl UpstreamClient for StdioClient {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        self.ensure_connected(&mut guard).await?;
        drop(guard);
        self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "op-mcp-gateway", "version": env!("CARGO_PKG_VERSION")}
            })),
        )
        .await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result = self.request("tools/list", None).await?;
        let tools: Vec<ToolDefinition> = result
            .get("tools")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.request("tools/call", Some(json!({"name": name, "arguments": args})))
            .await
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            if let Err(e) = conn.child.start_kill() {
                warn!("failed to kill stdio child for {}: {e}", self.command);
            }
            let _ = conn.child.wait().await;
        }
    }

    async fn health_check(&self) -> HealthReport {
        match self.list_tools().await {
            Ok(_) => HealthReport::ok(),
            Err(e) => {
                error!("stdio health check failed for {}: {e}", self.command);
                HealthReport::error(e.to_string())
            }
        }
    }

    fn requires_auth(&self) -> bool {
        false
    }

    async fn is_authenticated(&self) -> bool {
        true
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.conn.try_lock() {
            if let Some(conn) = guard.as_mut() {
                let _ = conn.child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_nonexistent_command_reports_not_found() {
        let client = StdioClient::new(
            "definitely-not-a-real-binary-xyz".to_string(),
            vec![],
            HashMap::new(),
            None,
        );
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_)));
        assert!(err.to_string().contains("not found") || err.to_string().contains("spawn failed"));
    }

    #[tokio::test]
    async fn requires_auth_is_always_false() {
        let client = StdioClient::new("echo".to_string(), vec![], HashMap::new(), None);
        assert!(!client.requires_auth());
        assert!(client.is_authenticated().await);
    }
}
