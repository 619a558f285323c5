//! Config Loader (component A): parses N config files, merges them in
//! input order (later file wins on id collision), expands `${VAR}`/`$VAR`
//! references in env maps, and normalizes everything to [`Package`].

use crate::model::{AuthConfig, HttpKind, Package, Transport, Visibility};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

/// Result of loading and merging a set of config files: the normalized
/// package list plus human-readable warnings accumulated along the way
/// (duplicate ids, unresolved env vars, placeholder secrets).
#[derive(Debug, Default)]
pub struct LoadResult {
    pub packages: Vec<Package>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, RawServer>,
    #[serde(default)]
    packages: Vec<RawPackageEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    oauth: bool,
    name: Option<String>,
    description: Option<String>,
    visibility: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawPackageEntry {
    id: String,
    #[serde(flatten)]
    server: RawServer,
}

/// Load, merge, and normalize the given config file paths, in order.
/// An empty or entirely-missing set of files is not fatal: the gateway
/// starts in minimal mode with zero packages.
pub fn load_files(paths: &[PathBuf]) -> Result<LoadResult> {
    let mut merged: Vec<(String, Package)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    for path in paths {
        if !path.exists() {
            debug!("config file {} does not exist, skipping", path.display());
            continue;
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let raw: RawFile = if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON config {}", path.display()))?
        };

        let source = path.display().to_string();
        let mut entries: Vec<(String, RawServer)> = raw
            .mcp_servers
            .into_iter()
            .chain(raw.packages.into_iter().map(|p| (p.id, p.server)))
            .collect();
        // Preserve file-internal definition order for determinism.
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, server) in entries {
            let (package, mut pkg_warnings) = normalize(&id, server, &source, &mut warnings);
            warnings.append(&mut pkg_warnings);

            if let Some(&pos) = index.get(&id) {
                warnings.push(format!(
                    "package id '{id}' redefined in {source}; later definition wins"
                ));
                merged[pos] = (id, package);
            } else {
                index.insert(id.clone(), merged.len());
                merged.push((id, package));
            }
        }
        info!("loaded config from {}", path.display());
    }

    Ok(LoadResult {
        packages: merged.into_iter().map(|(_, p)| p).collect(),
        warnings,
    })
}

/// Resolve the ordered list of config file paths from the environment,
/// per `MCP_GATEWAY_CONFIG` (comma-separated) or the legacy
/// `SUPER_MCP_CONFIG` alias, falling back to the default state dir.
pub fn resolve_config_paths() -> Vec<PathBuf> {
    if let Ok(v) = env::var("MCP_GATEWAY_CONFIG") {
        return v.split(',').map(|s| PathBuf::from(s.trim())).collect();
    }
    if let Ok(v) = env::var("SUPER_MCP_CONFIG") {
        return v.split(',').map(|s| PathBuf::from(s.trim())).collect();
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    vec![
        PathBuf::from(format!("{home}/.mcp-gateway/config.json")),
        PathBuf::from(format!("{home}/.super-mcp/config.json")),
    ]
}

fn normalize(
    id: &str,
    server: RawServer,
    source: &str,
    _global_warnings: &mut [String],
) -> (Package, Vec<String>) {
    let mut warnings = Vec::new();

    let transport = match server.kind.as_deref() {
        Some("stdio") => Transport::Stdio,
        Some("sse") | Some("http") => Transport::Http,
        Some(other) => {
            warnings.push(format!("package '{id}': unknown type '{other}', inferring from fields"));
            infer_transport(&server)
        }
        None => infer_transport(&server),
    };
    let http_kind = match (transport, server.kind.as_deref()) {
        (Transport::Http, Some("sse")) => Some(HttpKind::Sse),
        (Transport::Http, _) => Some(HttpKind::Streamable),
        _ => None,
    };

    let mut seen_vars: HashSet<(String, String)> = HashSet::new();
    let mut env = HashMap::new();
    let mut env_warnings = Vec::new();
    for (key, raw_value) in server.env {
        let (expanded, had_unresolved) = expand_env_value(&raw_value, id, &key, &mut seen_vars, &mut warnings);
        if is_sensitive_key(&key) && (had_unresolved || looks_like_placeholder(&expanded) || expanded.is_empty()) {
            env_warnings.push(format!("env var '{key}' looks unresolved or placeholder-like"));
        }
        env.insert(key, expanded);
    }

    let visibility = match server.visibility.as_deref() {
        Some("hidden") => Visibility::Hidden,
        Some("default") | None => Visibility::Default,
        Some(other) => {
            warnings.push(format!("package '{id}': invalid visibility '{other}', using default"));
            Visibility::Default
        }
    };

    if !server.disabled {
        if transport == Transport::Stdio && server.command.as_deref().unwrap_or("").is_empty() {
            warnings.push(format!("package '{id}': stdio transport requires a non-empty command"));
        }
        if transport == Transport::Http {
            match &server.url {
                Some(url) if is_parseable_url(url) => {}
                Some(url) => warnings.push(format!("package '{id}': base_url '{url}' does not parse as a URL")),
                None => warnings.push(format!("package '{id}': http transport requires base_url")),
            }
        }
    }

    let package = Package {
        id: id.to_string(),
        name: server.name.unwrap_or_else(|| id.to_string()),
        description: server.description,
        transport,
        http_kind,
        command: server.command,
        args: server.args,
        env,
        cwd: server.cwd,
        base_url: server.url,
        extra_headers: server.headers,
        oauth: server.oauth,
        auth: if server.oauth {
            Some(AuthConfig {
                mode: Some("oauth".to_string()),
                ..Default::default()
            })
        } else {
            None
        },
        visibility,
        disabled: server.disabled,
        source_file: Some(source.to_string()),
        env_warnings,
    };

    (package, warnings)
}

fn infer_transport(server: &RawServer) -> Transport {
    if server.command.is_some() {
        Transport::Stdio
    } else {
        Transport::Http
    }
}

/// Minimal `scheme://host[...]` well-formedness check. A full URL parser
/// is unnecessary here: the gateway never needs to decompose `base_url`,
/// only validate it at config-load time and hand it whole to `reqwest`.
fn is_parseable_url(value: &str) -> bool {
    let Some((scheme, rest)) = value.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
        && !rest.is_empty()
}

fn is_sensitive_key(key: &str) -> bool {
    key.contains("TOKEN") || key.contains("KEY") || key.contains("SECRET")
}

fn looks_like_placeholder(value: &str) -> bool {
    value.starts_with("YOUR_")
}

/// Expand `${VAR}` (warns and leaves literal if unresolved) and bare
/// `$VAR` (silent) references inside a single env value. Returns the
/// expanded string and whether any `${VAR}` reference was left
/// unresolved.
fn expand_env_value(
    value: &str,
    pkg: &str,
    key: &str,
    seen: &mut HashSet<(String, String)>,
    warnings: &mut Vec<String>,
) -> (String, bool) {
    let mut out = String::with_capacity(value.len());
    let bytes: Vec<char> = value.chars().collect();
    let mut i = 0;
    let mut had_unresolved = false;

    while i < bytes.len() {
        if bytes[i] == '$' && bytes.get(i + 1) == Some(&'{') {
            if let Some(end) = bytes[i + 2..].iter().position(|&c| c == '}') {
                let var_name: String = bytes[i + 2..i + 2 + end].iter().collect();
                match env::var(&var_name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        had_unresolved = true;
                        let dedup_key = (var_name.clone(), key.to_string());
                        if seen.insert(dedup_key) {
                            warnings.push(format!(
                                "package '{pkg}': env key '{key}' references unresolved ${{{var_name}}}"
                            ));
                        }
                        out.push_str("${");
                        out.push_str(&var_name);
                        out.push('}');
                    }
                }
                i += 2 + end + 1;
                continue;
            }
        }
        if bytes[i] == '$' {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j].is_ascii_uppercase() || bytes[j].is_ascii_digit() || bytes[j] == '_') {
                j += 1;
            }
            if j > i + 1 {
                let var_name: String = bytes[i + 1..j].iter().collect();
                if let Ok(v) = env::var(&var_name) {
                    out.push_str(&v);
                } else {
                    out.push_str(&bytes[i..j].iter().collect::<String>());
                }
                i = j;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    (out, had_unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merge_order_later_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(br#"{"mcpServers":{"x":{"command":"echo","args":["a"]}}}"#)
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(br#"{"mcpServers":{"x":{"command":"echo","args":["b"]}}}"#)
            .unwrap();

        let result = load_files(&[a, b]).unwrap();
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.packages[0].args, vec!["b".to_string()]);
        assert!(result.warnings.iter().any(|w| w.contains("redefined")));
    }

    #[test]
    fn env_expansion_leaves_unresolved_literal() {
        std::env::remove_var("DEFINITELY_UNSET_VAR_XYZ");
        let mut seen = HashSet::new();
        let mut warnings = Vec::new();
        let (expanded, unresolved) = expand_env_value(
            "${DEFINITELY_UNSET_VAR_XYZ}",
            "pkg",
            "TOKEN",
            &mut seen,
            &mut warnings,
        );
        assert_eq!(expanded, "${DEFINITELY_UNSET_VAR_XYZ}");
        assert!(unresolved);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn env_expansion_dollar_var_silent() {
        std::env::set_var("MCP_TEST_EXPAND_VAR", "resolved");
        let mut seen = HashSet::new();
        let mut warnings = Vec::new();
        let (expanded, unresolved) =
            expand_env_value("$MCP_TEST_EXPAND_VAR", "pkg", "KEY", &mut seen, &mut warnings);
        assert_eq!(expanded, "resolved");
        assert!(!unresolved);
        assert!(warnings.is_empty());
    }

    #[test]
    fn disabled_package_skips_validation() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("c.json");
        std::fs::File::create(&f)
            .unwrap()
            .write_all(br#"{"mcpServers":{"d":{"disabled":true}}}"#)
            .unwrap();
        let result = load_files(&[f]).unwrap();
        assert_eq!(result.packages.len(), 1);
        assert!(result.packages[0].disabled);
        assert!(!result
            .warnings
            .iter()
            .any(|w| w.contains("requires a non-empty command")));
    }
}
