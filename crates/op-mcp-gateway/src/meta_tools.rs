//! Meta-tool Handlers (component H): the seven tools the gateway itself
//! exposes. `dispatch()` is the single entry point the server shell
//! routes `tools/call` into; it also performs the error-enrichment pass
//! described in spec §7 (action hints keyed on error code).

use crate::help;
use crate::server::{GatewayContext, GatewayState};
use chrono::Utc;
use op_mcp_core::{
    CachedTool, ErrorPayload, GatewayError, MultiToolResult, Package, PackageToolCache, Result,
    Status, Telemetry, Visibility,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Init => "init",
        Status::Pending => "pending",
        Status::Connected => "connected",
        Status::Failed => "failed",
        Status::AuthRequired => "auth_required",
    }
}

/// Route one `tools/call` by name to its handler, then enrich any error
/// with an action hint before returning it to the caller (spec §7).
pub async fn dispatch(ctx: &GatewayContext, method: &str, params: Value) -> Result<Value> {
    let result = match method {
        "list_tool_packages" => list_tool_packages(ctx, params).await,
        "list_tools" => list_tools(ctx, params).await,
        "use_tool" => use_tool(ctx, params).await,
        "multi_use_tool" => multi_use_tool(ctx, params).await,
        "authenticate" => authenticate(ctx, params).await,
        "health_check_all" => health_check_all(ctx, params).await,
        "get_help" => Ok(get_help(params)),
        other => Err(GatewayError::InvalidParams(format!("unknown meta-tool: {other}"))),
    };
    result.map_err(enrich)
}

fn enrich(err: GatewayError) -> GatewayError {
    if let Some(hint) = err.action_hint() {
        warn!("{err} ({hint})");
    }
    err
}

// ---------------------------------------------------------------------
// list_tool_packages
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ListPackagesParams {
    safe_only: bool,
    include_disabled: bool,
    limit: usize,
    include_health: bool,
}

impl Default for ListPackagesParams {
    fn default() -> Self {
        Self {
            safe_only: true,
            include_disabled: false,
            limit: 100,
            include_health: true,
        }
    }
}

async fn list_tool_packages(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: ListPackagesParams = parse_params(params)?;
    let state = ctx.snapshot().await;

    let mut packages = state.registry.packages().await;
    packages.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = Vec::new();
    for pkg in packages {
        if pkg.disabled && !params.include_disabled {
            continue;
        }
        if params.safe_only && pkg.has_placeholder_literals() {
            continue;
        }
        if out.len() >= params.limit {
            break;
        }

        let cached = state.catalog.get(&pkg.id).await;
        let tool_count = cached.as_ref().map(|c| c.tools.len()).unwrap_or(0);
        let status = if pkg.disabled {
            "disabled".to_string()
        } else {
            cached
                .as_ref()
                .map(|c| status_label(c.status).to_string())
                .unwrap_or_else(|| "pending".to_string())
        };

        let summary = package_summary(&pkg, cached.as_ref());

        let mut entry = json!({
            "id": pkg.id,
            "name": pkg.name,
            "transport": transport_label(&pkg),
            "auth_mode": format!("{:?}", pkg.auth_mode()).to_lowercase(),
            "visibility": if pkg.visibility == Visibility::Hidden { "hidden" } else { "default" },
            "status": status,
            "tool_count": tool_count,
            "summary": summary,
        });

        if params.include_health {
            if let Some(status) = state.registry.status(&pkg.id).await {
                entry["health"] = json!({
                    "attempts": status.attempts,
                    "error": status.error,
                });
            }
        }

        out.push(entry);
    }

    Ok(json!({
        "packages": out,
        "catalog_etag": state.catalog.global_etag(now_ms()).await,
        "updated_at": Utc::now().to_rfc3339(),
    }))
}

fn transport_label(pkg: &Package) -> &'static str {
    match pkg.transport {
        op_mcp_core::Transport::Stdio => "stdio",
        op_mcp_core::Transport::Http => "http",
    }
}

fn package_summary(pkg: &Package, cached: Option<&PackageToolCache>) -> String {
    if let Some(desc) = &pkg.description {
        return desc.clone();
    }
    let tools: Vec<(String, String)> = cached
        .map(|c| {
            c.tools
                .iter()
                .map(|t| (t.tool_name.clone(), t.tool_desc.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    op_mcp_core::catalog::build_summary(pkg.transport, pkg.oauth, &tools)
}

// ---------------------------------------------------------------------
// list_tools
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListToolsParams {
    package_id: String,
    #[serde(default = "default_true")]
    summarize: bool,
    #[serde(default)]
    include_schemas: bool,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    page_token: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_page_size() -> usize {
    20
}

async fn list_tools(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: ListToolsParams = parse_params(params)?;
    let state = ctx.snapshot().await;

    let pkg = state
        .registry
        .package(&params.package_id)
        .await
        .ok_or_else(|| GatewayError::PackageNotFound(params.package_id.clone()))?;
    if pkg.disabled {
        return Err(GatewayError::PackageUnavailable(format!("{} is disabled", pkg.id)));
    }

    let cache = state.catalog.ensure_loaded(&params.package_id, now_ms()).await?;

    let start = op_mcp_core::catalog::decode_page_token(params.page_token.as_deref());
    let page = op_mcp_core::catalog::paginate(&cache.tools, start, params.page_size.max(1));

    let items: Vec<Value> = page
        .items
        .iter()
        .map(|t| tool_info(t, params.summarize, params.include_schemas))
        .collect();

    Ok(json!({
        "package_id": params.package_id,
        "tools": items,
        "next_page_token": page.next_page_token,
        "etag": cache.etag,
        "status": status_label(cache.status),
    }))
}

fn tool_info(tool: &CachedTool, summarize: bool, include_schemas: bool) -> Value {
    let mut entry = json!({
        "tool_id": tool.tool_name,
        "description": if summarize { &tool.summary } else { tool.tool_desc.as_ref().unwrap_or(&tool.summary) },
        "args_skeleton": tool.args_skeleton,
        "schema_hash": tool.schema_hash,
    });
    if include_schemas {
        entry["input_schema"] = tool.input_schema.clone();
    }
    entry
}

// ---------------------------------------------------------------------
// use_tool / multi_use_tool shared core
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UseToolParams {
    package_id: String,
    tool_id: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    dry_run: bool,
}

fn classify_downstream_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("timeout") {
        "timeout"
    } else if lower.contains("permission") {
        "permission"
    } else if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized") || lower.contains("forbidden") {
        "auth"
    } else if lower.contains("not found") {
        "not_found"
    } else {
        "other"
    }
}

fn arg_keys(args: &Value) -> Vec<String> {
    args.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default()
}

/// Shared path for `use_tool` and each `multi_use_tool` worker: resolve
/// the package and tool, validate, and either short-circuit on dry-run
/// or call the live client. On failure, returns the error alongside the
/// elapsed time so the caller can still report accurate telemetry.
async fn call_tool_core(
    ctx: &GatewayContext,
    state: &GatewayState,
    package_id: &str,
    tool_id: &str,
    args: Value,
    dry_run: bool,
) -> std::result::Result<(Value, u64), (GatewayError, u64)> {
    let pkg = state
        .registry
        .package(package_id)
        .await
        .ok_or_else(|| (GatewayError::PackageNotFound(package_id.to_string()), 0))?;
    if pkg.disabled {
        return Err((
            GatewayError::PackageUnavailable(format!("{package_id} is disabled")),
            0,
        ));
    }

    let cache = state
        .catalog
        .ensure_loaded(package_id, now_ms())
        .await
        .map_err(|e| (e, 0))?;
    let tool = cache
        .tools
        .iter()
        .find(|t| t.tool_name == tool_id)
        .ok_or_else(|| (GatewayError::ToolNotFound(tool_id.to_string()), 0))?;

    if let Err(errors) = ctx.validator.validate(&tool.schema_hash, &tool.input_schema, &args).await {
        return Err((
            GatewayError::ArgValidationFailed {
                tool_id: tool_id.to_string(),
                errors,
            },
            0,
        ));
    }

    if dry_run {
        return Ok((json!({"dry_run": true}), 0));
    }

    let client = state.registry.get_client(package_id).await.map_err(|e| (e, 0))?;
    let start = Instant::now();
    match client.call_tool(tool_id, args.clone()).await {
        Ok(result) => Ok((result, start.elapsed().as_millis() as u64)),
        Err(e) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let keys = arg_keys(&args);
            let class = classify_downstream_error(&e.to_string());
            let message = format!("{e} (class={class}, duration_ms={duration_ms})");
            Err((
                GatewayError::DownstreamError {
                    package_id: package_id.to_string(),
                    tool_id: tool_id.to_string(),
                    message,
                    data: Some(json!({"class": class, "duration_ms": duration_ms, "arg_keys": keys})),
                },
                duration_ms,
            ))
        }
    }
}

async fn use_tool(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: UseToolParams = parse_params(params)?;
    let state = ctx.snapshot().await;
    match call_tool_core(ctx, &state, &params.package_id, &params.tool_id, params.args, params.dry_run).await {
        Ok((result, duration_ms)) => Ok(json!({
            "result": result,
            "telemetry": {"duration_ms": duration_ms, "status": "ok"},
        })),
        Err((err, _)) => Err(err),
    }
}

// ---------------------------------------------------------------------
// multi_use_tool
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OneRequest {
    #[serde(default)]
    request_id: Option<String>,
    package_id: String,
    tool_id: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct MultiUseToolParams {
    requests: Vec<OneRequest>,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
}

async fn multi_use_tool(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: MultiUseToolParams = parse_params(params)?;
    let n = params.requests.len();
    if n == 0 {
        return Ok(json!({"results": []}));
    }

    let concurrency = params.concurrency.unwrap_or(n).clamp(1, n);
    let deadline = params.timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

    let state = ctx.snapshot().await;
    let requests = Arc::new(params.requests);
    let results: Arc<Mutex<Vec<Option<MultiToolResult>>>> = Arc::new(Mutex::new(vec![None; n]));
    let next_index = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let ctx = ctx.clone();
        let state = state.clone();
        let requests = requests.clone();
        let results = results.clone();
        let next_index = next_index.clone();

        workers.push(tokio::spawn(async move {
            loop {
                let idx = next_index.fetch_add(1, Ordering::SeqCst);
                if idx >= requests.len() {
                    return;
                }
                let req = &requests[idx];

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        let outcome = MultiToolResult::Err {
                            request_id: req.request_id.clone(),
                            package_id: req.package_id.clone(),
                            tool_id: req.tool_id.clone(),
                            error: ErrorPayload {
                                code: GatewayError::DownstreamError {
                                    package_id: req.package_id.clone(),
                                    tool_id: req.tool_id.clone(),
                                    message: "batch timeout elapsed before this request started".to_string(),
                                    data: None,
                                }
                                .code(),
                                message: "batch timeout elapsed before this request started".to_string(),
                                data: Some(json!({"reason": "batch_timeout"})),
                            },
                            telemetry: Telemetry::error(0),
                        };
                        results.lock().await[idx] = Some(outcome);
                        continue;
                    }
                }

                let outcome = match call_tool_core(&ctx, &state, &req.package_id, &req.tool_id, req.args.clone(), req.dry_run).await {
                    Ok((result, duration_ms)) => MultiToolResult::Ok {
                        request_id: req.request_id.clone(),
                        package_id: req.package_id.clone(),
                        tool_id: req.tool_id.clone(),
                        args_used: req.args.clone(),
                        result,
                        telemetry: Telemetry::ok(duration_ms),
                    },
                    Err((err, duration_ms)) => MultiToolResult::Err {
                        request_id: req.request_id.clone(),
                        package_id: req.package_id.clone(),
                        tool_id: req.tool_id.clone(),
                        error: ErrorPayload {
                            code: err.code(),
                            message: err.to_string(),
                            data: err.data(),
                        },
                        telemetry: Telemetry::error(duration_ms),
                    },
                };
                results.lock().await[idx] = Some(outcome);
            }
        }));
    }

    for w in workers {
        let _ = w.await;
    }

    let results: Vec<MultiToolResult> = results
        .lock()
        .await
        .drain(..)
        .map(|r| r.expect("every index is written exactly once"))
        .collect();

    Ok(json!({
        "results": results,
        "structuredContent": {"results": results},
    }))
}

// ---------------------------------------------------------------------
// authenticate
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthenticateParams {
    package_id: String,
    #[serde(default = "default_true")]
    wait_for_completion: bool,
}

async fn authenticate(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: AuthenticateParams = parse_params(params)?;
    let state = ctx.snapshot().await;

    let pkg = state
        .registry
        .package(&params.package_id)
        .await
        .ok_or_else(|| GatewayError::PackageNotFound(params.package_id.clone()))?;

    if pkg.disabled {
        return Ok(json!({"status": "skipped", "reason": "package is disabled"}));
    }
    if pkg.transport == op_mcp_core::Transport::Stdio || !pkg.oauth {
        return Ok(json!({"status": "success", "reason": "package does not use OAuth"}));
    }

    if let Ok(client) = state.registry.get_client(&params.package_id).await {
        let health = client.health_check().await;
        if health.ok {
            return Ok(json!({"status": "already_authenticated"}));
        }
    }

    if !params.wait_for_completion {
        return Ok(json!({"status": "auth_required", "reason": "wait_for_completion is false"}));
    }

    state.registry.evict(&params.package_id).await;

    let base_url = pkg
        .base_url
        .clone()
        .ok_or_else(|| GatewayError::Internal(format!("package {} missing base_url", pkg.id)))?;
    let redirect_url = format!("http://localhost:{}/oauth/callback", op_mcp_oauth::DEFAULT_PORT);
    let auth = pkg.auth.clone().unwrap_or_default();
    let client_id = match &auth.client_id {
        Some(id) => id.clone(),
        None => {
            let registration = op_mcp_oauth::flow::register_client(
                &format!("{}/register", base_url.trim_end_matches('/')),
                &redirect_url,
            )
            .await
            .map_err(|e| GatewayError::AuthIncomplete(pkg.id.clone(), e.to_string()))?;
            let client_id = registration.client_id.clone();
            if let Err(e) = ctx.oauth.store().write_client_info(&pkg.id, &registration) {
                warn!("failed to persist dynamically registered client info for {}: {e}", pkg.id);
            }
            client_id
        }
    };

    let cfg = op_mcp_oauth::FlowConfig {
        auth_url: format!("{}/authorize", base_url.trim_end_matches('/')),
        token_url: format!("{}/token", base_url.trim_end_matches('/')),
        redirect_url,
        client_id,
        client_secret: None,
        scopes: auth.scopes.clone(),
    };

    let (authorize_url, outcome) = ctx
        .oauth
        .authenticate(&pkg.id, cfg)
        .await
        .map_err(|e| GatewayError::AuthIncomplete(pkg.id.clone(), e.to_string()))?;

    match outcome {
        op_mcp_oauth::AuthOutcome::Authenticated => {
            // The HTTP transport is single-start: the client just evicted
            // above will be rebuilt fresh on the next get_client() call,
            // now picking up the freshly-persisted tokens.
            match state.registry.get_client(&params.package_id).await {
                Ok(client) => {
                    let health = client.health_check().await;
                    if health.ok {
                        Ok(json!({"status": "authenticated"}))
                    } else {
                        Ok(json!({"status": "auth_required", "reason": health.error}))
                    }
                }
                Err(e) => Ok(json!({"status": "auth_required", "reason": e.to_string()})),
            }
        }
        op_mcp_oauth::AuthOutcome::AlreadyAuthenticated => Ok(json!({"status": "already_authenticated"})),
        op_mcp_oauth::AuthOutcome::Skipped => Ok(json!({
            "status": "auth_required",
            "reason": "another authorization flow is already in flight for this package",
            "authorize_url": authorize_url,
        })),
        op_mcp_oauth::AuthOutcome::AuthRequired(reason) => {
            Ok(json!({"status": "auth_required", "reason": reason, "authorize_url": authorize_url}))
        }
    }
}

// ---------------------------------------------------------------------
// health_check_all
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HealthCheckAllParams {
    detailed: bool,
}

async fn health_check_all(ctx: &GatewayContext, params: Value) -> Result<Value> {
    let params: HealthCheckAllParams = parse_params(params)?;
    let state = ctx.snapshot().await;
    let packages = state.registry.packages().await;

    let mut total = 0usize;
    let mut healthy = 0usize;
    let mut errored = 0usize;
    let mut unavailable = 0usize;
    let mut disabled = 0usize;
    let mut requiring_auth = 0usize;
    let mut authenticated = 0usize;
    let mut with_env_issues = 0usize;

    let mut details = Vec::new();

    for pkg in &packages {
        total += 1;
        if pkg.disabled {
            disabled += 1;
            if params.detailed {
                details.push(json!({"package_id": pkg.id, "status": "disabled"}));
            }
            continue;
        }
        if !pkg.env_warnings.is_empty() {
            with_env_issues += 1;
        }

        let status = state.registry.status(&pkg.id).await;
        let mut entry_status = "unavailable";
        match status.as_ref().map(|s| s.status) {
            Some(Status::Connected) => {
                healthy += 1;
                authenticated += 1;
                entry_status = "healthy";
            }
            Some(Status::AuthRequired) => {
                requiring_auth += 1;
                entry_status = "requires_auth";
            }
            Some(Status::Failed) => {
                errored += 1;
                entry_status = "errored";
            }
            _ => {
                unavailable += 1;
            }
        }

        if params.detailed {
            let mut recommendation = None;
            if entry_status == "requires_auth" {
                recommendation = Some(format!("run authenticate(package_id: \"{}\")", pkg.id));
            } else if entry_status == "errored" {
                recommendation = Some("check command/base_url configuration and upstream logs".to_string());
            } else if with_env_issues > 0 && !pkg.env_warnings.is_empty() {
                recommendation = Some("check placeholder env values in config".to_string());
            }
            details.push(json!({
                "package_id": pkg.id,
                "status": entry_status,
                "command": pkg.command,
                "env_warnings": pkg.env_warnings,
                "error": status.as_ref().and_then(|s| s.error.clone()),
                "recommendation": recommendation,
            }));
        }
    }

    let mut summary = json!({
        "total": total,
        "healthy": healthy,
        "errored": errored,
        "unavailable": unavailable,
        "disabled": disabled,
        "requiring_auth": requiring_auth,
        "authenticated": authenticated,
        "with_env_issues": with_env_issues,
    });

    if params.detailed {
        summary["details"] = json!(details);
    }

    Ok(summary)
}

// ---------------------------------------------------------------------
// get_help
// ---------------------------------------------------------------------

fn get_help(params: Value) -> Value {
    let topic = params.get("topic").and_then(|v| v.as_str());
    help::get_help(topic)
}

// ---------------------------------------------------------------------
// shared param parsing
// ---------------------------------------------------------------------

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))
}
