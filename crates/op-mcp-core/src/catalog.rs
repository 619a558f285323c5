//! Tool Catalog (component F): lazy per-package tool listing, summary and
//! args-skeleton synthesis, pagination, and per-package/global ETags.

use crate::model::{CachedTool, HttpKind, PackageToolCache, Status, Transport};
use crate::registry::PackageRegistry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

const AUTH_CLASS_SUBSTRINGS: &[&str] = &["oauth", "401", "unauthorized", "invalid_token", "authorization"];

fn schema_hash(schema: &Value) -> String {
    let canonical = serde_json::to_string(schema).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("sha256:{:x}", digest)
}

fn classify(name: &str, desc: &str) -> &'static str {
    let haystack = format!("{name} {desc}").to_lowercase();
    const BUCKETS: &[(&str, &[&str])] = &[
        ("auth", &["auth", "login", "token", "oauth"]),
        ("search", &["search", "find", "query", "lookup"]),
        ("create", &["create", "add", "new", "insert"]),
        ("delete", &["delete", "remove", "destroy"]),
        ("update", &["update", "edit", "modify", "patch"]),
        ("list", &["list", "enumerate"]),
        ("write", &["write", "save", "put", "set"]),
        ("read", &["read", "get", "fetch", "view"]),
    ];
    for (label, needles) in BUCKETS {
        if needles.iter().any(|n| haystack.contains(n)) {
            return label;
        }
    }
    "general"
}

fn kind_label(transport: Transport, oauth: bool) -> &'static str {
    match (transport, oauth) {
        (Transport::Stdio, _) => "Local",
        (Transport::Http, true) => "Cloud (OAuth)",
        (Transport::Http, false) => "Remote",
    }
}

/// Build a human-readable summary for a package with no author-supplied
/// description, from the classified capability buckets of its tools.
pub fn build_summary(transport: Transport, oauth: bool, tools: &[(String, String)]) -> String {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for (name, desc) in tools {
        *counts.entry(classify(name, desc)).or_insert(0) += 1;
    }
    let mut caps: Vec<String> = counts.into_iter().map(|(label, n)| format!("{n} {label}")).collect();
    caps.sort();
    format!(
        "{} MCP with {} tools. Capabilities: {}.",
        kind_label(transport, oauth),
        tools.len(),
        if caps.is_empty() { "none".to_string() } else { caps.join(", ") }
    )
}

fn format_hint(key: &str, format: Option<&str>) -> &'static str {
    match format {
        Some("uri") | Some("url") => return "<url>",
        Some("email") => return "<email>",
        Some("date") => return "<date>",
        Some("date-time") => return "<datetime>",
        _ => {}
    }
    let lower = key.to_lowercase();
    if lower.contains("url") {
        "<url>"
    } else if lower.contains("email") {
        "<email>"
    } else if lower.contains("path") {
        "<path>"
    } else if lower.ends_with("id") || lower == "id" {
        "<id>"
    } else {
        "<string>"
    }
}

/// Walk a JSON schema and produce a concrete example skeleton, hinting at
/// shape without revealing real content.
pub fn args_skeleton(schema: &Value) -> Value {
    skeleton_for(schema, "")
}

fn skeleton_for(schema: &Value, key: &str) -> Value {
    if let Some(enum_values) = schema.get("enum").and_then(|v| v.as_array()) {
        if let Some(first) = enum_values.first() {
            return first.clone();
        }
    }

    match schema.get("type").and_then(|t| t.as_str()) {
        Some("string") => {
            let format = schema.get("format").and_then(|f| f.as_str());
            json!(format_hint(key, format))
        }
        Some("number") | Some("integer") => json!("<number>"),
        Some("boolean") => json!("<boolean>"),
        Some("array") => {
            let item_schema = schema.get("items").cloned().unwrap_or(json!({}));
            json!([skeleton_for(&item_schema, key)])
        }
        Some("object") => {
            let mut obj = serde_json::Map::new();
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (prop_key, prop_schema) in props {
                    obj.insert(prop_key.clone(), skeleton_for(prop_schema, prop_key));
                }
            }
            Value::Object(obj)
        }
        _ => json!("<value>"),
    }
}

fn is_auth_class_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_CLASS_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

fn encode_page_token(index: usize) -> String {
    BASE64.encode(json!({"index": index}).to_string())
}

/// Decode a page token, treating anything malformed as "start from zero".
pub fn decode_page_token(token: Option<&str>) -> usize {
    let Some(token) = token else { return 0 };
    let Ok(decoded) = BASE64.decode(token) else {
        warn!("malformed page token, starting from zero");
        return 0;
    };
    let Ok(value) = serde_json::from_slice::<Value>(&decoded) else {
        warn!("malformed page token JSON, starting from zero");
        return 0;
    };
    value.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize
}

pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Paginate a slice starting at `start`, returning up to `page_size` items
/// and an opaque token for the next page if more remain.
pub fn paginate<T: Clone>(items: &[T], start: usize, page_size: usize) -> Page<T> {
    let end = (start + page_size).min(items.len());
    let slice = if start < items.len() { items[start..end].to_vec() } else { vec![] };
    let next_page_token = if end < items.len() { Some(encode_page_token(end)) } else { None };
    Page {
        items: slice,
        next_page_token,
    }
}

/// Lazy, cached per-package tool listing plus global ETag bookkeeping.
pub struct ToolCatalog {
    registry: Arc<PackageRegistry>,
    caches: RwLock<HashMap<String, PackageToolCache>>,
}

impl ToolCatalog {
    pub fn new(registry: Arc<PackageRegistry>) -> Self {
        Self {
            registry,
            caches: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<PackageToolCache> {
        self.caches.read().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<PackageToolCache> {
        self.caches.read().await.values().cloned().collect()
    }

    /// Global ETag: a hash of `now_ms || sorted(package_ids)`, recomputed
    /// whenever any cache entry is inserted, removed, or replaced.
    pub async fn global_etag(&self, now_ms: i64) -> String {
        let mut ids: Vec<String> = self.caches.read().await.keys().cloned().collect();
        ids.sort();
        let input = format!("{now_ms}{}", ids.join(""));
        let digest = Sha256::digest(input.as_bytes());
        format!("{:x}", digest)[..16].to_string()
    }

    fn package_etag(tools: &[CachedTool]) -> String {
        let canonical = serde_json::to_string(tools).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))[..16].to_string()
    }

    /// Refresh a single package's cache from its live client, mirroring
    /// non-connected status rather than attempting to call tools.
    pub async fn refresh_package(&self, id: &str, now_ms: i64) -> Result<(), crate::error::GatewayError> {
        let status = self.registry.status(id).await;

        let connected = matches!(status.as_ref().map(|s| s.status), Some(Status::Connected));
        if !connected {
            let (status_kind, error) = match status {
                Some(s) => (map_status(s.status), s.error),
                None => (Status::Failed, Some("unknown package".to_string())),
            };
            self.caches.write().await.insert(
                id.to_string(),
                PackageToolCache {
                    package_id: id.to_string(),
                    tools: vec![],
                    last_updated_ms: now_ms,
                    etag: Self::package_etag(&[]),
                    status: status_kind,
                    error,
                    attempts: None,
                    health: None,
                },
            );
            return Ok(());
        }

        let client = self.registry.get_client(id).await?;
        let pkg = self.registry.package(id).await;

        match client.list_tools().await {
            Ok(tool_defs) => {
                let tools: Vec<CachedTool> = tool_defs
                    .into_iter()
                    .map(|t| {
                        let desc = t.description.clone().unwrap_or_default();
                        CachedTool {
                            package_id: id.to_string(),
                            tool_name: t.name,
                            tool_desc: t.description,
                            input_schema: t.input_schema.clone(),
                            summary: desc,
                            args_skeleton: args_skeleton(&t.input_schema),
                            schema_hash: schema_hash(&t.input_schema),
                        }
                    })
                    .collect();

                let etag = Self::package_etag(&tools);
                self.caches.write().await.insert(
                    id.to_string(),
                    PackageToolCache {
                        package_id: id.to_string(),
                        tools,
                        last_updated_ms: now_ms,
                        etag,
                        status: Status::Connected,
                        error: None,
                        attempts: None,
                        health: Some("ok".to_string()),
                    },
                );
                let _ = pkg;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if is_auth_class_error(&message) {
                    self.caches.write().await.insert(
                        id.to_string(),
                        PackageToolCache {
                            package_id: id.to_string(),
                            tools: vec![],
                            last_updated_ms: now_ms,
                            etag: Self::package_etag(&[]),
                            status: Status::AuthRequired,
                            error: Some(message),
                            attempts: None,
                            health: Some("needs_auth".to_string()),
                        },
                    );
                    return Ok(());
                }
                Err(crate::error::GatewayError::PackageUnavailable(message))
            }
        }
    }

    /// Ensure a fresh cache entry exists, refreshing if absent or if the
    /// registry's live status has drifted from what's cached.
    pub async fn ensure_loaded(&self, id: &str, now_ms: i64) -> Result<PackageToolCache, crate::error::GatewayError> {
        let cached = self.get(id).await;
        let live_status = self.registry.status(id).await.map(|s| s.status);

        let needs_refresh = match (&cached, live_status) {
            (None, _) => true,
            (Some(c), Some(live)) => c.status != live,
            (Some(_), None) => false,
        };

        if needs_refresh {
            self.refresh_package(id, now_ms).await?;
        }

        self.get(id)
            .await
            .ok_or_else(|| crate::error::GatewayError::PackageNotFound(id.to_string()))
    }

    pub async fn clear(&self) {
        self.caches.write().await.clear();
    }
}

fn map_status(status: Status) -> Status {
    status
}

/// Infer the `HttpKind`-flavored label used for summaries of packages
/// without their own `http_kind`, default to Streamable.
pub fn default_http_kind() -> HttpKind {
    HttpKind::Streamable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_hash_is_stable_sha256_prefixed() {
        let schema = json!({"type": "string"});
        let h1 = schema_hash(&schema);
        let h2 = schema_hash(&schema);
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
    }

    #[test]
    fn classify_buckets_by_substring() {
        assert_eq!(classify("search_docs", ""), "search");
        assert_eq!(classify("whatever", "delete a record"), "delete");
        assert_eq!(classify("ping", ""), "general");
    }

    #[test]
    fn args_skeleton_walks_object_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "email": {"type": "string", "format": "email"},
            }
        });
        let skeleton = args_skeleton(&schema);
        assert_eq!(skeleton["name"], json!("<string>"));
        assert_eq!(skeleton["age"], json!("<number>"));
        assert_eq!(skeleton["tags"], json!(["<string>"]));
        assert_eq!(skeleton["email"], json!("<email>"));
    }

    #[test]
    fn args_skeleton_enum_uses_first_value() {
        let schema = json!({"enum": ["a", "b", "c"]});
        assert_eq!(args_skeleton(&schema), json!("a"));
    }

    #[test]
    fn malformed_page_token_starts_from_zero() {
        assert_eq!(decode_page_token(Some("not-valid-base64!!")), 0);
        assert_eq!(decode_page_token(None), 0);
    }

    #[test]
    fn page_token_roundtrips() {
        let token = encode_page_token(5);
        assert_eq!(decode_page_token(Some(&token)), 5);
    }

    #[test]
    fn paginate_respects_page_size_and_emits_next_token() {
        let items: Vec<i32> = (0..25).collect();
        let page = paginate(&items, 0, 10);
        assert_eq!(page.items.len(), 10);
        assert!(page.next_page_token.is_some());

        let last_start = decode_page_token(page.next_page_token.as_deref());
        let page2 = paginate(&items, last_start, 10);
        assert_eq!(page2.items[0], 10);
    }

    #[test]
    fn is_auth_class_error_matches_known_substrings() {
        assert!(is_auth_class_error("401 Unauthorized"));
        assert!(is_auth_class_error("invalid_token returned"));
        assert!(!is_auth_class_error("connection refused"));
    }
}
