//! `SingleFlight<Key, Value>`: deduplicates concurrent work for the same
//! key. Used by the Registry for per-package connect and could equally be
//! reused by the Catalog for per-package refresh (see design notes).

use futures::future::Shared;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Coalesces concurrent callers requesting the same key into one
/// in-flight future. The entry is cleared once the future resolves, so a
/// subsequent call starts fresh work.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Shared<BoxFuture<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make` to produce the value for `key`, or await an already
    /// in-flight call for the same key. Only one call to `make` is ever
    /// active per key at a time.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let existing = {
            let guard = self.inflight.lock().await;
            guard.get(&key).cloned()
        };

        if let Some(shared) = existing {
            return shared.await;
        }

        let fut: BoxFuture<V> = Box::pin(make());
        let shared: Shared<BoxFuture<V>> = fut.shared();

        {
            let mut guard = self.inflight.lock().await;
            guard.entry(key.clone()).or_insert_with(|| shared.clone());
        }

        let result = shared.await;

        {
            let mut guard = self.inflight.lock().await;
            guard.remove(&key);
        }

        result
    }

    pub async fn is_inflight(&self, key: &K) -> bool {
        self.inflight.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_calls_for_same_key_run_make_once() {
        let sf: Arc<SingleFlight<String, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.run("k".to_string(), || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        42u32
                    }
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_run_make_each_time() {
        let sf: SingleFlight<String, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            sf.run("k".to_string(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                7u32
            })
            .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
