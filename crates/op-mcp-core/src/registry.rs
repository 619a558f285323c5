//! Package Registry (component E): owns the normalized package list, the
//! live `UpstreamClient` per package id, in-flight connect deduplication,
//! the connection-status map, and the eager-connect/retry policy.

use crate::error::{GatewayError, Result};
use crate::model::{ConnectionStatus, Package, Status, Transport};
use crate::singleflight::SingleFlight;
use futures::future::join_all;
use op_mcp_transport::{ClientFactory, PackageSpec, TransportKind, UpstreamClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 5;
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(10);

fn is_fatal(message: &str) -> bool {
    const FATAL_SUBSTRINGS: &[&str] = &[
        "disabled",
        "not found",
        "Invalid package",
        "command is required",
        "base_url is required",
    ];
    FATAL_SUBSTRINGS.iter().any(|s| message.contains(s))
}

fn to_spec(pkg: &Package) -> PackageSpec {
    PackageSpec {
        id: pkg.id.clone(),
        transport: match pkg.transport {
            Transport::Stdio => TransportKind::Stdio,
            Transport::Http => TransportKind::Http,
        },
        command: pkg.command.clone(),
        args: pkg.args.clone(),
        env: pkg.env.clone(),
        cwd: pkg.cwd.clone(),
        base_url: pkg.base_url.clone(),
        http_kind: match pkg.http_kind {
            Some(crate::model::HttpKind::Sse) => op_mcp_transport::http::HttpKind::Sse,
            _ => op_mcp_transport::http::HttpKind::Streamable,
        },
        extra_headers: pkg.extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        oauth: pkg.oauth,
    }
}

/// Owns package metadata, live upstream clients, and connection status.
/// Held behind an `Arc` by the gateway so watcher-driven reloads can swap
/// a whole new instance in without readers observing a half-built state.
pub struct PackageRegistry {
    factory: Arc<dyn ClientFactory>,
    packages: RwLock<HashMap<String, Package>>,
    clients: RwLock<HashMap<String, Arc<dyn UpstreamClient>>>,
    status: RwLock<HashMap<String, ConnectionStatus>>,
    inflight: SingleFlight<String, Result<Arc<dyn UpstreamClient>>>,
}

impl PackageRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>, packages: Vec<Package>) -> Self {
        let mut pkg_map = HashMap::new();
        let mut status_map = HashMap::new();
        for pkg in packages {
            status_map.insert(pkg.id.clone(), ConnectionStatus::init());
            pkg_map.insert(pkg.id.clone(), pkg);
        }
        Self {
            factory,
            packages: RwLock::new(pkg_map),
            clients: RwLock::new(HashMap::new()),
            status: RwLock::new(status_map),
            inflight: SingleFlight::new(),
        }
    }

    pub async fn package(&self, id: &str) -> Option<Package> {
        self.packages.read().await.get(id).cloned()
    }

    pub async fn packages(&self) -> Vec<Package> {
        self.packages.read().await.values().cloned().collect()
    }

    pub async fn status(&self, id: &str) -> Option<ConnectionStatus> {
        self.status.read().await.get(id).cloned()
    }

    pub async fn all_status(&self) -> HashMap<String, ConnectionStatus> {
        self.status.read().await.clone()
    }

    async fn set_status(&self, id: &str, status: ConnectionStatus) {
        self.status.write().await.insert(id.to_string(), status);
    }

    /// Evict a cached client, forcing the next `get_client` to reconnect.
    /// Used by `authenticate` after a successful OAuth exchange, since an
    /// HTTP transport is single-start and must never be re-driven.
    pub async fn evict(&self, id: &str) {
        self.clients.write().await.remove(id);
    }

    /// See spec §4.E: health-check-then-evict, in-flight dedup, cache on
    /// `NeedsAuth` rather than treating it as connect failure.
    pub async fn get_client(&self, id: &str) -> Result<Arc<dyn UpstreamClient>> {
        if let Some(client) = self.clients.read().await.get(id).cloned() {
            let health = client.health_check().await;
            if health.ok || health.needs_auth {
                return Ok(client);
            }
            self.clients.write().await.remove(id);
        }

        let pkg = self
            .package(id)
            .await
            .ok_or_else(|| GatewayError::PackageNotFound(id.to_string()))?;

        if pkg.disabled {
            return Err(GatewayError::PackageUnavailable(format!("{id} is disabled")));
        }

        let factory = self.factory.clone();
        let spec = to_spec(&pkg);
        let result = self
            .inflight
            .run(id.to_string(), move || async move {
                let client = factory
                    .build(&spec)
                    .map_err(|e| GatewayError::PackageUnavailable(e.to_string()))?;
                match client.connect().await {
                    Ok(()) => Ok(client),
                    Err(op_mcp_transport::TransportError::NeedsAuth) => Ok(client),
                    Err(e) => Err(GatewayError::PackageUnavailable(e.to_string())),
                }
            })
            .await;

        if let Ok(client) = &result {
            self.clients.write().await.insert(id.to_string(), client.clone());
        }
        result
    }

    /// Eagerly connect every enabled package with bounded retries, run
    /// fanned out across packages and serialized per package by
    /// `get_client`'s in-flight map.
    pub async fn eager_connect(self: &Arc<Self>) {
        let ids: Vec<String> = self.packages.read().await.keys().cloned().collect();
        let tasks = ids.into_iter().map(|id| {
            let this = self.clone();
            async move { this.connect_with_retry(&id).await }
        });
        join_all(tasks).await;
    }

    async fn connect_with_retry(&self, id: &str) {
        let Some(pkg) = self.package(id).await else {
            return;
        };
        if pkg.disabled {
            self.set_status(
                id,
                ConnectionStatus {
                    status: Status::Failed,
                    attempts: 0,
                    error: Some("disabled".to_string()),
                    health: None,
                },
            )
            .await;
            return;
        }

        self.set_status(
            id,
            ConnectionStatus {
                status: Status::Pending,
                attempts: 0,
                error: None,
                health: None,
            },
        )
        .await;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.get_client(id).await {
                Ok(client) => {
                    let health = client.health_check().await;
                    let status = if health.needs_auth {
                        Status::AuthRequired
                    } else {
                        Status::Connected
                    };
                    self.set_status(
                        id,
                        ConnectionStatus {
                            status,
                            attempts: attempt,
                            error: health.error.clone(),
                            health: Some(if health.ok { "ok".to_string() } else { "degraded".to_string() }),
                        },
                    )
                    .await;
                    info!("package {id} connected on attempt {attempt}");
                    return;
                }
                Err(e) => {
                    let message = e.to_string();
                    if is_fatal(&message) {
                        warn!("package {id} failed with fatal error, not retrying: {message}");
                        self.set_status(
                            id,
                            ConnectionStatus {
                                status: Status::Failed,
                                attempts: attempt,
                                error: Some(message),
                                health: None,
                            },
                        )
                        .await;
                        return;
                    }
                    if attempt == MAX_ATTEMPTS {
                        warn!("package {id} exhausted {MAX_ATTEMPTS} attempts: {message}");
                        self.set_status(
                            id,
                            ConnectionStatus {
                                status: Status::Failed,
                                attempts: attempt,
                                error: Some(message),
                                health: None,
                            },
                        )
                        .await;
                        return;
                    }
                    self.set_status(
                        id,
                        ConnectionStatus {
                            status: Status::Pending,
                            attempts: attempt,
                            error: Some(message),
                            health: None,
                        },
                    )
                    .await;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Close every cached client concurrently, ignoring individual
    /// failures, and clear the map. Called on hot reload (on the old
    /// Registry, after the swap) and on shutdown.
    pub async fn close_all(&self) {
        let clients: Vec<Arc<dyn UpstreamClient>> = self.clients.write().await.drain().map(|(_, c)| c).collect();
        join_all(clients.iter().map(|c| c.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use op_mcp_transport::{HealthReport, PackageSpec as Spec, ToolDefinition, TransportError};
    use serde_json::Value;

    #[derive(Debug)]
    struct FakeClient {
        healthy: bool,
    }

    #[async_trait]
    impl UpstreamClient for FakeClient {
        async fn connect(&self) -> op_mcp_transport::Result<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(TransportError::Other("boom".to_string()))
            }
        }
        async fn list_tools(&self) -> op_mcp_transport::Result<Vec<ToolDefinition>> {
            Ok(vec![])
        }
        async fn call_tool(&self, _name: &str, _args: Value) -> op_mcp_transport::Result<Value> {
            Ok(Value::Null)
        }
        async fn close(&self) {}
        async fn health_check(&self) -> HealthReport {
            if self.healthy {
                HealthReport::ok()
            } else {
                HealthReport::error("unhealthy")
            }
        }
        fn requires_auth(&self) -> bool {
            false
        }
        async fn is_authenticated(&self) -> bool {
            true
        }
    }

    struct FakeFactory {
        healthy: bool,
    }

    impl ClientFactory for FakeFactory {
        fn build(&self, _spec: &Spec) -> std::result::Result<Arc<dyn UpstreamClient>, TransportError> {
            Ok(Arc::new(FakeClient { healthy: self.healthy }))
        }
    }

    fn stdio_package(id: &str) -> Package {
        Package {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            transport: Transport::Stdio,
            http_kind: None,
            command: Some("echo".to_string()),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            base_url: None,
            extra_headers: HashMap::new(),
            oauth: false,
            auth: None,
            visibility: crate::model::Visibility::Default,
            disabled: false,
            source_file: None,
            env_warnings: vec![],
        }
    }

    #[tokio::test]
    async fn get_client_caches_healthy_client() {
        let registry = PackageRegistry::new(Arc::new(FakeFactory { healthy: true }), vec![stdio_package("a")]);
        let first = registry.get_client("a").await.unwrap();
        let second = registry.get_client("a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn get_client_errors_for_unknown_package() {
        let registry = PackageRegistry::new(Arc::new(FakeFactory { healthy: true }), vec![]);
        let err = registry.get_client("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::PackageNotFound(_)));
    }

    #[tokio::test]
    async fn get_client_errors_for_disabled_package() {
        let mut pkg = stdio_package("a");
        pkg.disabled = true;
        let registry = PackageRegistry::new(Arc::new(FakeFactory { healthy: true }), vec![pkg]);
        let err = registry.get_client("a").await.unwrap_err();
        assert!(matches!(err, GatewayError::PackageUnavailable(_)));
    }

    #[tokio::test]
    async fn eager_connect_marks_disabled_as_failed() {
        let mut pkg = stdio_package("a");
        pkg.disabled = true;
        let registry = Arc::new(PackageRegistry::new(Arc::new(FakeFactory { healthy: true }), vec![pkg]));
        registry.eager_connect().await;
        let status = registry.status("a").await.unwrap();
        assert_eq!(status.status, Status::Failed);
    }

    #[tokio::test]
    async fn close_all_clears_cache() {
        let registry = PackageRegistry::new(Arc::new(FakeFactory { healthy: true }), vec![stdio_package("a")]);
        registry.get_client("a").await.unwrap();
        registry.close_all().await;
        assert!(registry.clients.read().await.is_empty());
    }
}
