//! Two-tier cache with promotion and per-key request coalescing.
//!
//! Lookup order is local tier, then distributed tier (with promotion into the
//! local tier on a distributed hit). `get_or_compute` is the coalescing entry
//! point used by the orchestrator: at most one concurrent computation runs per
//! key, and concurrent callers await the leader's outcome — value or error.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::backend::CacheBackend;
use crate::cache::local::LocalTier;
use crate::config::CacheConfig;
use crate::error::{CoreError, Result};

type FlightResult = Result<Value>;

/// Counters surfaced through the metrics snapshot.
#[derive(Debug, Default)]
struct CacheStats {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    coalesced_waits: AtomicU64,
}

/// Serializable view of the cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub local_hits: u64,
    pub distributed_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub coalesced_waits: u64,
    pub local_entries: usize,
}

/// Two-tier cache fronting expensive provider calls.
pub struct CacheLayer {
    local: LocalTier,
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    stats: CacheStats,
    inflight: DashMap<String, broadcast::Sender<FlightResult>>,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            local: LocalTier::new(config.local_max_entries),
            backend,
            default_ttl: config.default_ttl(),
            stats: CacheStats::default(),
            inflight: DashMap::new(),
        }
    }

    /// Look up a key across both tiers.
    ///
    /// A distributed-tier hit is promoted into the local tier. Backend errors
    /// are logged and treated as a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_inner(key, true).await
    }

    /// Tiered lookup. The leader's post-claim re-check passes
    /// `record_stats = false` so one logical lookup counts one outcome.
    async fn get_inner(&self, key: &str, record_stats: bool) -> Option<Value> {
        if let Some(value) = self.local.get(key) {
            if record_stats {
                self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            }
            return Some(value);
        }

        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.local.insert(key, value.clone(), self.default_ttl);
                if record_stats {
                    self.stats.distributed_hits.fetch_add(1, Ordering::Relaxed);
                }
                Some(value)
            }
            Ok(None) => {
                if record_stats {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Distributed cache unavailable, treating as miss");
                if record_stats {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// Write a value into both tiers.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.local.insert(key, value.clone(), ttl);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.backend.set(key, &value, ttl).await {
            warn!(key = %key, error = %e, "Distributed cache set failed, local tier only");
        }
    }

    /// Explicitly drop a key from both tiers.
    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Err(e) = self.backend.delete(key).await {
            warn!(key = %key, error = %e, "Distributed cache delete failed");
        }
    }

    /// Coalescing entry point: at most one concurrent `compute` per key.
    ///
    /// Concurrent callers for the same key await the leader's broadcast result
    /// and receive its value or its error; a leader dropped mid-computation
    /// aborts waiters with [`CoreError::ComputationAborted`] rather than
    /// hanging them.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        // Claim leadership or subscribe to the in-flight computation. The map
        // shard lock is held only for channel setup; no awaits inside.
        let mut receiver = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().subscribe(),
            Entry::Vacant(entry) => {
                let (tx, _) = broadcast::channel(1);
                entry.insert(tx.clone());
                return self.lead_computation(key, ttl, tx, compute).await;
            }
        };

        self.stats.coalesced_waits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Awaiting in-flight computation for key");
        match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ComputationAborted(key.to_string())),
        }
    }

    async fn lead_computation<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tx: broadcast::Sender<FlightResult>,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut guard = FlightGuard {
            inflight: &self.inflight,
            key,
            tx: Some(tx),
            done: false,
        };

        // Another leader may have completed between our miss and the claim;
        // that first miss already counted, so this re-check does not
        if let Some(value) = self.get_inner(key, false).await {
            guard.finish(Ok(value.clone()));
            return Ok(value);
        }

        let result = compute().await;
        if let Ok(ref value) = result {
            self.set(key, value.clone(), ttl).await;
        }
        guard.finish(result.clone());
        result
    }

    /// Current counters, read-only.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.stats.distributed_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            coalesced_waits: self.stats.coalesced_waits.load(Ordering::Relaxed),
            local_entries: self.local.len(),
        }
    }
}

/// Removes the in-flight entry and notifies waiters exactly once, including
/// when the leading future is dropped mid-computation.
struct FlightGuard<'a> {
    inflight: &'a DashMap<String, broadcast::Sender<FlightResult>>,
    key: &'a str,
    tx: Option<broadcast::Sender<FlightResult>>,
    done: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, result: FlightResult) {
        self.done = true;
        self.inflight.remove(self.key);
        if let Some(tx) = self.tx.take() {
            // No subscribers is fine; waiters may have timed out
            let _ = tx.send(result);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inflight.remove(self.key);
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(Err(CoreError::ComputationAborted(self.key.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{BackendError, InMemoryBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn layer() -> Arc<CacheLayer> {
        Arc::new(CacheLayer::new(
            &CacheConfig::default(),
            Arc::new(InMemoryBackend::new()),
        ))
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let cache = layer();
        cache
            .set("k", json!({"plan": "intro"}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, Some(json!({"plan": "intro"})));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = layer();
        cache.set("k", json!(1), Duration::from_millis(40)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn distributed_hit_promotes_to_local() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = CacheLayer::new(&CacheConfig::default(), backend.clone());

        backend
            .set("k", &json!("remote"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!("remote")));

        let stats = cache.stats();
        assert_eq!(stats.distributed_hits, 1);
        assert_eq!(stats.local_entries, 1);

        // Second read is served locally
        assert_eq!(cache.get("k").await, Some(json!("remote")));
        assert_eq!(cache.stats().local_hits, 1);
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> std::result::Result<Option<Value>, BackendError> {
            Err(BackendError::new("connection refused"))
        }

        async fn set(
            &self,
            _key: &str,
            _value: &Value,
            _ttl: Duration,
        ) -> std::result::Result<(), BackendError> {
            Err(BackendError::new("connection refused"))
        }

        async fn delete(&self, _key: &str) -> std::result::Result<(), BackendError> {
            Err(BackendError::new("connection refused"))
        }
    }

    #[tokio::test]
    async fn backend_unavailable_degrades_to_local_only() {
        let cache = CacheLayer::new(&CacheConfig::default(), Arc::new(DownBackend));

        assert_eq!(cache.get("k").await, None);
        cache.set("k", json!("local"), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(json!("local")));
    }

    #[tokio::test]
    async fn invalidate_drops_both_tiers() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = CacheLayer::new(&CacheConfig::default(), backend.clone());

        cache.set("k", json!(1), Duration::from_secs(60)).await;
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_get_or_compute_runs_compute_once() {
        let cache = layer();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("prompt-key", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!("generated"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!("generated"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cold_get_or_compute_counts_one_miss() {
        let cache = layer();
        cache
            .get_or_compute("cold-key", Duration::from_secs(60), || async move {
                Ok(json!("generated"))
            })
            .await
            .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.local_hits, 0);
        assert_eq!(stats.distributed_hits, 0);
    }

    #[tokio::test]
    async fn compute_error_propagates_to_all_waiters() {
        let cache = layer();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("bad-key", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err::<Value, _>(CoreError::NoEligibleProvider)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(CoreError::NoEligibleProvider));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Errors are not cached; a later call recomputes
        assert_eq!(cache.get("bad-key").await, None);
    }
}
