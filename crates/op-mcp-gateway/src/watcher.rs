//! Config Watcher (component I): watches the resolved config file paths
//! and triggers a debounced, atomic reload of the Registry+Catalog
//! snapshot when any of them change.
//!
//! Reload is serialized: events that arrive while a reload is already
//! running only mark another reload as pending, rather than spawning a
//! second one concurrently (mirrors the debounce/processor split in
//! ratchet-registry's filesystem watcher).

use crate::server::{GatewayContext, GatewayState};
use op_mcp_core::{PackageRegistry, ToolCatalog};
use op_mcp_transport::ClientFactory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{error, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Owns the `notify` watcher and the debounce/reload task. Dropping or
/// calling [`ConfigWatcher::stop`] tears both down.
pub struct ConfigWatcher {
    _watcher: Option<notify::RecommendedWatcher>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    processor_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Start watching the parent directories of `config_paths` (notify
    /// requires an existing directory; watching the directory rather than
    /// the file itself also survives editors that replace-on-save).
    pub fn start(ctx: GatewayContext, factory: Arc<dyn ClientFactory>, config_paths: Vec<PathBuf>) -> Self {
        use notify::{RecommendedWatcher, RecursiveMode, Watcher};

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = match RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(_event) => {
                    let _ = event_tx.send(());
                }
                Err(e) => error!("config watcher error: {e}"),
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                warn!("failed to create config file watcher, hot-reload disabled: {e}");
                return Self {
                    _watcher: None,
                    shutdown_tx: None,
                    processor_handle: None,
                };
            }
        };

        let mut watched_dirs = std::collections::HashSet::new();
        for path in &config_paths {
            let Some(dir) = path.parent() else { continue };
            if !dir.exists() || !watched_dirs.insert(dir.to_path_buf()) {
                continue;
            }
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("failed to watch config directory {}: {e}", dir.display());
            } else {
                info!("watching {} for config changes", dir.display());
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_processor(ctx, factory, config_paths, event_rx, shutdown_rx));

        Self {
            _watcher: Some(watcher),
            shutdown_tx: Some(shutdown_tx),
            processor_handle: Some(handle),
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.processor_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn run_processor(
    ctx: GatewayContext,
    factory: Arc<dyn ClientFactory>,
    config_paths: Vec<PathBuf>,
    mut event_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval(DEBOUNCE);
    let mut pending = false;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(()) => pending = true,
                    None => break,
                }
            }
            _ = ticker.tick(), if pending => {
                pending = false;
                while event_rx.try_recv().is_ok() {}
                reload_once(&ctx, factory.clone(), &config_paths).await;
            }
            _ = &mut shutdown_rx => {
                info!("config watcher shutting down");
                break;
            }
        }
    }
}

async fn reload_once(ctx: &GatewayContext, factory: Arc<dyn ClientFactory>, config_paths: &[PathBuf]) {
    info!("config change detected, reloading package registry");

    let load_result = match op_mcp_core::load_files(config_paths) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to reload config, keeping previous snapshot: {e}");
            return;
        }
    };
    for warning in &load_result.warnings {
        warn!("config reload: {warning}");
    }

    let registry = Arc::new(PackageRegistry::new(factory, load_result.packages));
    registry.eager_connect().await;
    let catalog = Arc::new(ToolCatalog::new(registry.clone()));
    let new_state = Arc::new(GatewayState { registry, catalog });

    let old_state = ctx.swap(new_state).await;
    old_state.registry.close_all().await;

    info!("config reload complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_mcp_oauth::{OAuthManager, OAuthStore};
    use op_mcp_transport::{PackageSpec, TransportError, UpstreamClient};

    struct NoopFactory;
    impl ClientFactory for NoopFactory {
        fn build(&self, _spec: &PackageSpec) -> Result<Arc<dyn UpstreamClient>, TransportError> {
            Err(TransportError::Other("not used in this test".to_string()))
        }
    }

    fn test_ctx() -> GatewayContext {
        let registry = Arc::new(PackageRegistry::new(Arc::new(NoopFactory), vec![]));
        let catalog = Arc::new(ToolCatalog::new(registry.clone()));
        let state = Arc::new(GatewayState { registry, catalog });
        let store = OAuthStore::new(tempfile::tempdir().unwrap().path().to_path_buf(), None);
        GatewayContext::new(state, Arc::new(OAuthManager::new(store)))
    }

    #[tokio::test]
    async fn reload_with_missing_files_keeps_empty_registry() {
        let ctx = test_ctx();
        reload_once(&ctx, Arc::new(NoopFactory), &[PathBuf::from("/nonexistent/config.json")]).await;
        let state = ctx.snapshot().await;
        assert!(state.registry.packages().await.is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_new_package_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"mcpServers": {"demo": {"command": "echo"}}}"#,
        )
        .unwrap();

        let ctx = test_ctx();
        reload_once(&ctx, Arc::new(NoopFactory), &[config_path]).await;

        let state = ctx.snapshot().await;
        let packages = state.registry.packages().await;
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].id, "demo");
    }
}
