//! Global OAuth Lock (component D): a process-wide, per-package mutex
//! over authorization flows, so several concurrent tool listings don't
//! each pop open a browser window for the same package.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

const MAX_WAIT_TIME: Duration = Duration::from_secs(5 * 60);
const COOLDOWN: Duration = Duration::from_secs(30);

struct Entry {
    started_at: Instant,
    attempt: u32,
    completed_at: Option<Instant>,
    notify: Arc<Notify>,
}

/// Outcome of [`GlobalOAuthLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// No flow in flight or cooled down; caller may proceed.
    Proceed,
    /// A flow just completed within the cooldown window; caller should skip.
    Skip,
}

#[derive(Default)]
pub struct GlobalOAuthLock {
    entries: Mutex<HashMap<String, Entry>>,
}

impl GlobalOAuthLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// If a flow is in flight and younger than `MAX_WAIT_TIME`, await its
    /// completion. Afterward (or if nothing was in flight), decide whether
    /// the caller should proceed or skip due to cooldown.
    pub async fn acquire(&self, pkg: &str) -> AcquireOutcome {
        let notify = {
            let guard = self.entries.lock().await;
            guard.get(pkg).and_then(|e| {
                if e.completed_at.is_none() && e.started_at.elapsed() < MAX_WAIT_TIME {
                    Some(e.notify.clone())
                } else {
                    None
                }
            })
        };

        if let Some(notify) = notify {
            debug!("oauth flow already in flight for {pkg}, awaiting completion");
            notify.notified().await;
        }

        let guard = self.entries.lock().await;
        if let Some(entry) = guard.get(pkg) {
            if let Some(completed_at) = entry.completed_at {
                if completed_at.elapsed() < COOLDOWN {
                    return AcquireOutcome::Skip;
                }
            }
        }
        AcquireOutcome::Proceed
    }

    /// Record that a flow for `pkg` has started. Call [`Self::complete`]
    /// when the flow future settles; cleanup runs after `COOLDOWN`.
    pub async fn register(&self, pkg: &str) {
        let mut guard = self.entries.lock().await;
        let attempt = guard.get(pkg).map(|e| e.attempt + 1).unwrap_or(1);
        guard.insert(
            pkg.to_string(),
            Entry {
                started_at: Instant::now(),
                attempt,
                completed_at: None,
                notify: Arc::new(Notify::new()),
            },
        );
    }

    /// Mark the in-flight flow for `pkg` as settled, waking any awaiters
    /// and starting the cooldown clock.
    pub async fn complete(&self, pkg: &str) {
        let notify = {
            let mut guard = self.entries.lock().await;
            if let Some(entry) = guard.get_mut(pkg) {
                entry.completed_at = Some(Instant::now());
                Some(entry.notify.clone())
            } else {
                None
            }
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    pub async fn is_active(&self, pkg: &str) -> bool {
        let guard = self.entries.lock().await;
        guard
            .get(pkg)
            .map(|e| e.completed_at.is_none())
            .unwrap_or(false)
    }

    pub async fn wait(&self, pkg: &str) {
        let notify = {
            let guard = self.entries.lock().await;
            guard.get(pkg).map(|e| e.notify.clone())
        };
        if let Some(notify) = notify {
            notify.notified().await;
        }
    }

    pub async fn attempt_count(&self, pkg: &str) -> u32 {
        self.entries.lock().await.get(pkg).map(|e| e.attempt).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_then_proceeds_after_cooldown_elapses() {
        let lock = GlobalOAuthLock::new();
        lock.register("pkg").await;

        let lock = Arc::new(lock);
        let lock2 = lock.clone();
        let completer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lock2.complete("pkg").await;
        });

        // second caller awaits completion then, since cooldown (30s) has
        // not elapsed, is told to skip.
        let outcome = lock.acquire("pkg").await;
        completer.await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Skip);
    }

    #[tokio::test]
    async fn acquire_with_no_entry_proceeds_immediately() {
        let lock = GlobalOAuthLock::new();
        assert_eq!(lock.acquire("unseen").await, AcquireOutcome::Proceed);
    }

    #[tokio::test]
    async fn mutual_exclusion_only_one_active_flow_per_package() {
        let lock = GlobalOAuthLock::new();
        lock.register("pkg").await;
        assert!(lock.is_active("pkg").await);
        lock.complete("pkg").await;
        assert!(!lock.is_active("pkg").await);
    }
}
