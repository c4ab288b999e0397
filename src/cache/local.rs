//! Bounded in-process cache tier with TTL and least-recently-used eviction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Value,
    expires_at: Instant,
    last_accessed: Instant,
}

/// The local tier: a size-bounded map with LRU eviction at capacity.
///
/// Lookups and inserts take a short internal lock; no await points while held.
#[derive(Debug)]
pub struct LocalTier {
    entries: Mutex<HashMap<String, LocalEntry>>,
    max_entries: usize,
}

impl LocalTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Fetch a live entry, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.last_accessed = Instant::now();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            // Evict the least recently used entry
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_and_expiry() {
        let tier = LocalTier::new(10);
        tier.insert("k", json!("v"), Duration::from_millis(40));
        assert_eq!(tier.get("k"), Some(json!("v")));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(tier.get("k"), None);
        assert!(tier.is_empty());
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let tier = LocalTier::new(2);
        tier.insert("a", json!(1), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));
        tier.insert("b", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));

        // Touch "a" so "b" becomes the eviction candidate
        assert!(tier.get("a").is_some());
        std::thread::sleep(Duration::from_millis(5));
        tier.insert("c", json!(3), Duration::from_secs(60));

        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn overwrite_does_not_evict() {
        let tier = LocalTier::new(1);
        tier.insert("a", json!(1), Duration::from_secs(60));
        tier.insert("a", json!(2), Duration::from_secs(60));
        assert_eq!(tier.get("a"), Some(json!(2)));
        assert_eq!(tier.len(), 1);
    }
}
