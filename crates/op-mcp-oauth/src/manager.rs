//! Ties together the callback listener, global lock, token store, and
//! flow driver into the single entry point the HTTP transport and the
//! `authenticate` meta-tool use.

use crate::callback::{CallbackListener, CallbackOutcome, DEFAULT_PORT};
use crate::flow::{self, FlowConfig, PendingFlow};
use crate::lock::{AcquireOutcome, GlobalOAuthLock};
use crate::state::{InvalidateScope, OAuthStore, Tokens};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const CALLBACK_WAIT: Duration = Duration::from_secs(60);

pub struct OAuthManager {
    store: OAuthStore,
    lock: GlobalOAuthLock,
    listener: CallbackListener,
    pending: Mutex<HashMap<String, PendingFlow>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    AlreadyAuthenticated,
    Authenticated,
    AuthRequired(String),
    Skipped,
}

impl OAuthManager {
    pub fn new(store: OAuthStore) -> Self {
        Self {
            store,
            lock: GlobalOAuthLock::new(),
            listener: CallbackListener::new(DEFAULT_PORT),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &OAuthStore {
        &self.store
    }

    pub fn lock(&self) -> &GlobalOAuthLock {
        &self.lock
    }

    pub fn tokens(&self, pkg: &str) -> Result<Option<Tokens>> {
        self.store.read_tokens(pkg)
    }

    pub fn invalidate(&self, pkg: &str, scope: InvalidateScope) -> Result<()> {
        self.store.invalidate(pkg, scope)
    }

    /// Drive a full interactive authorization-code flow for `pkg`,
    /// returning the browser authorize URL the caller must present to
    /// the user alongside the eventual outcome once the code arrives.
    pub async fn authenticate(&self, pkg: &str, cfg: FlowConfig) -> Result<(String, AuthOutcome)> {
        match self.lock.acquire(pkg).await {
            AcquireOutcome::Skip => {
                return Ok(("".to_string(), AuthOutcome::Skipped));
            }
            AcquireOutcome::Proceed => {}
        }

        self.lock.register(pkg).await;
        self.listener.ensure_started().await?;

        let pending = flow::start(&cfg)?;
        let authorize_url = pending.authorize_url.clone();
        let csrf = pending.csrf_token.clone();

        {
            let mut guard = self.pending.lock().await;
            guard.insert(pkg.to_string(), pending);
        }

        let rx = self.listener.register(pkg, Some(csrf)).await;

        let outcome = match tokio::time::timeout(CALLBACK_WAIT, rx).await {
            Ok(Ok(CallbackOutcome::Code { code, .. })) => match self.finish(pkg, code).await {
                Ok(_) => AuthOutcome::Authenticated,
                Err(e) => {
                    warn!("token exchange failed for {pkg}: {e}");
                    AuthOutcome::AuthRequired(e.to_string())
                }
            },
            Ok(Ok(CallbackOutcome::Error { error, description })) => {
                AuthOutcome::AuthRequired(description.unwrap_or(error))
            }
            Ok(Err(_)) => AuthOutcome::AuthRequired("callback channel closed".to_string()),
            Err(_) => AuthOutcome::AuthRequired("timed out waiting for authorization callback".to_string()),
        };

        self.listener.unregister(pkg).await;
        self.lock.complete(pkg).await;
        self.pending.lock().await.remove(pkg);

        Ok((authorize_url, outcome))
    }

    async fn finish(&self, pkg: &str, code: String) -> Result<Tokens> {
        let pending = {
            let mut guard = self.pending.lock().await;
            guard.remove(pkg).ok_or_else(|| anyhow!("no pending flow for {pkg}"))?
        };
        let tokens = flow::finish(pending, code).await?;
        self.store.write_tokens(pkg, &tokens)?;
        info!("OAuth flow completed for {pkg}");
        Ok(tokens)
    }

    pub async fn refresh(&self, pkg: &str, cfg: &FlowConfig) -> Result<Tokens> {
        let current = self
            .store
            .read_tokens(pkg)?
            .ok_or_else(|| anyhow!("no tokens to refresh for {pkg}"))?;
        let refreshed = flow::refresh(cfg, &current).await?;
        self.store.write_tokens(pkg, &refreshed)?;
        Ok(refreshed)
    }
}
