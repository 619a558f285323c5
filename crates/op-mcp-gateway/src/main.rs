//! op-mcp-gateway binary entry point: CLI flag parsing, logging setup,
//! initial Registry/Catalog build, the config watcher, and the gateway's
//! own client-facing stdio listener.
//!
//! The stdio listener is a minimal runnable demonstration, grounded in
//! this workspace's existing `op-mcp` stdio loop — the framing itself
//! (newline-delimited JSON-RPC) is not expanded beyond what spec §6
//! requires.

use anyhow::Result;
use clap::{Parser, Subcommand};
use op_mcp_gateway::{meta_tool_schemas, ConfigWatcher, GatewayContext, GatewayState, OAuthAwareFactory};
use op_mcp_core::{PackageRegistry, ToolCatalog};
use op_mcp_oauth::{OAuthManager, OAuthStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "op-mcp-gateway", version, about = "MCP gateway: aggregates upstream MCP servers behind meta-tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default when no subcommand is given).
    Run,
    /// Write a pre-canned server entry into the default config file.
    Add {
        /// Name of the built-in template to add.
        template: String,
    },
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "op_mcp_gateway=info,op_mcp_core=info,op_mcp_oauth=info,op_mcp_transport=info,warn".into());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if std::env::var("MCP_GATEWAY_ENABLE_FILE_LOGS").map(|v| v == "1" || v == "true").unwrap_or(false) {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let log_dir = format!("{home}/.mcp-gateway/logs");
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "gateway.log");
        registry.with(tracing_subscriber::fmt::layer().with_writer(file_appender).with_ansi(false)).init();
    } else {
        registry.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Add { template } => run_add(&template),
        Command::Run => run_server().await,
    }
}

/// Out-of-scope per spec §1/§6: the template corpus itself is not built
/// out. This implements the flag-parsing skeleton and file-write shape.
fn run_add(template: &str) -> Result<()> {
    let paths = op_mcp_core::resolve_config_paths();
    let path = paths.first().cloned().ok_or_else(|| anyhow::anyhow!("no default config path configured"))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut existing: Value = if path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&path)?).unwrap_or_else(|_| json!({"mcpServers": {}}))
    } else {
        json!({"mcpServers": {}})
    };

    existing["mcpServers"][template] = json!({
        "command": template,
        "args": [],
    });

    std::fs::write(&path, serde_json::to_string_pretty(&existing)?)?;
    println!("Added template '{template}' to {}", path.display());
    Ok(())
}

async fn run_server() -> Result<()> {
    info!("starting op-mcp-gateway");

    let config_paths = op_mcp_core::resolve_config_paths();
    let load_result = op_mcp_core::load_files(&config_paths)?;
    for warning in &load_result.warnings {
        warn!("config: {warning}");
    }
    info!("loaded {} package(s) from {} config path(s)", load_result.packages.len(), config_paths.len());

    let store = OAuthStore::from_home();
    let oauth = Arc::new(OAuthManager::new(store));
    let factory: Arc<dyn op_mcp_transport::ClientFactory> = Arc::new(OAuthAwareFactory::new(oauth.clone()));

    let registry = Arc::new(PackageRegistry::new(factory.clone(), load_result.packages));
    registry.eager_connect().await;
    let catalog = Arc::new(ToolCatalog::new(registry.clone()));
    let state = Arc::new(GatewayState { registry, catalog });

    let ctx = GatewayContext::new(state, oauth);
    let watcher = ConfigWatcher::start(ctx.clone(), factory, config_paths);

    let shutdown = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received shutdown signal");
    };

    tokio::select! {
        result = run_stdio_listener(ctx.clone()) => {
            if let Err(e) = result {
                error!("stdio listener ended with error: {e}");
            }
        }
        _ = shutdown => {}
    }

    watcher.stop().await;
    let snapshot = ctx.snapshot().await;
    snapshot.registry.close_all().await;

    info!("op-mcp-gateway shutdown complete");
    Ok(())
}

/// Newline-delimited JSON-RPC loop over stdio, grounded in this
/// workspace's `op-mcp` stdio listener. Supports `initialize`,
/// `tools/list`, and `tools/call`; anything else is a JSON-RPC
/// "method not found".
async fn run_stdio_listener(ctx: GatewayContext) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => handle_request(&ctx, request).await,
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": {"code": -32700, "message": "Parse error", "data": e.to_string()},
            }),
        };

        let encoded = serde_json::to_string(&response)?;
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn handle_request(ctx: &GatewayContext, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "op-mcp-gateway", "version": env!("CARGO_PKG_VERSION")},
        })),
        "tools/list" => Ok(json!({"tools": meta_tool_schemas()})),
        "tools/call" => {
            let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
            let tool_args = params.get("arguments").cloned().unwrap_or(Value::Null);
            op_mcp_gateway::dispatch(ctx, &tool_name, tool_args).await.map(|r| json!({"content": [{"type": "text", "text": r.to_string()}], "structuredContent": r}))
        }
        other => Err(op_mcp_core::GatewayError::InvalidParams(format!("unknown method: {other}"))),
    };

    match result {
        Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": e.code(), "message": e.to_string(), "data": e.data()},
        }),
    }
}
