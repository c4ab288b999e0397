//! Distributed cache backend contract.
//!
//! The distributed tier is an external key/value service reachable over the
//! network (Redis in the deployed system). The core only consumes this
//! contract; backend unavailability surfaces as [`BackendError`] and the cache
//! layer degrades it to a miss.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Distributed-tier failure. Never propagated past the cache layer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache backend error: {message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Key/value store with TTL semantics, consumed by [`CacheLayer`](crate::cache::CacheLayer).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError>;
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// In-memory backend used for tests and single-process deployments.
///
/// Relies on TTL expiry only, mirroring the external store's semantics.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, (Value, Instant)>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value().clone();
            if expires_at > Instant::now() {
                return Ok(Some(value));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), BackendError> {
        self.entries
            .insert(key.to_string(), (value.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }
}
