//! Shared loopback OAuth callback listener (component D). A single
//! process-wide `axum` server binds once on `127.0.0.1:5173` and dispatches
//! incoming `/oauth/callback` requests to whichever package registered a
//! matching `state`.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 5173;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Code { code: String, state: Option<String> },
    Error { error: String, description: Option<String> },
}

struct Handler {
    state_token: Option<String>,
    sender: Option<oneshot::Sender<CallbackOutcome>>,
}

#[derive(Clone)]
struct ListenerState {
    handlers: Arc<Mutex<Vec<(String, Handler)>>>,
}

/// Process-wide OAuth callback listener. Bind once; register/unregister
/// per-package handlers as flows start and finish.
pub struct CallbackListener {
    state: ListenerState,
    bound: Mutex<bool>,
    port: u16,
}

impl CallbackListener {
    pub fn new(port: u16) -> Self {
        Self {
            state: ListenerState {
                handlers: Arc::new(Mutex::new(Vec::new())),
            },
            bound: Mutex::new(false),
            port,
        }
    }

    /// Bind the listener if it hasn't been already. Safe to call
    /// repeatedly; subsequent calls are no-ops.
    pub async fn ensure_started(&self) -> anyhow::Result<()> {
        let mut bound = self.bound.lock().await;
        if *bound {
            return Ok(());
        }

        let app_state = self.state.clone();
        let router = Router::new()
            .route("/oauth/callback", get(handle_callback))
            .with_state(app_state);

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind OAuth callback listener on {addr}: {e}"))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("OAuth callback listener exited: {e}");
            }
        });

        info!("OAuth callback listener bound on {addr}");
        *bound = true;
        Ok(())
    }

    /// Register a handler for `package_id`, keyed primarily by `state`
    /// (the CSRF token). Returns a future resolving to the first matching
    /// callback, or `None` if the channel is dropped first (timeout is
    /// the caller's responsibility, e.g. via `tokio::time::timeout`).
    pub async fn register(&self, package_id: &str, state_token: Option<String>) -> oneshot::Receiver<CallbackOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut handlers = self.state.handlers.lock().await;
        handlers.push((
            package_id.to_string(),
            Handler {
                state_token,
                sender: Some(tx),
            },
        ));
        rx
    }

    pub async fn unregister(&self, package_id: &str) {
        let mut handlers = self.state.handlers.lock().await;
        handlers.retain(|(id, _)| id != package_id);
    }
}

async fn handle_callback(
    State(state): State<ListenerState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = if let Some(error) = params.error {
        CallbackOutcome::Error {
            error,
            description: params.error_description,
        }
    } else if let Some(code) = params.code {
        CallbackOutcome::Code {
            code,
            state: params.state.clone(),
        }
    } else {
        CallbackOutcome::Error {
            error: "missing_code".to_string(),
            description: None,
        }
    };

    let mut handlers = state.handlers.lock().await;

    // The state parameter is authoritative for matching; if absent (a
    // known limitation, see design notes), the first registered handler
    // wins — dispatched in registration order.
    let target_idx = match &outcome {
        CallbackOutcome::Code { state: Some(s), .. } => handlers
            .iter()
            .position(|(_, h)| h.state_token.as_deref() == Some(s.as_str()))
            .or(Some(0)),
        _ => Some(0),
    };

    if let Some(idx) = target_idx {
        if idx < handlers.len() {
            if let Some(sender) = handlers[idx].1.sender.take() {
                let _ = sender.send(outcome);
            }
            handlers.remove(idx);
        }
    }

    Html("<html><body><h3>Authentication complete. You may close this tab.</h3></body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_without_bind_does_not_panic() {
        let listener = CallbackListener::new(0);
        let rx = listener.register("pkg", Some("state-1".to_string())).await;
        drop(rx);
        listener.unregister("pkg").await;
    }
}
