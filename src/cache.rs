//! In-process expiring key-value store.
//!
//! A small TTL-bound map used for ephemeral keyed state (pending uploads).
//! Entries are invisible once their deadline passes; expired entries are
//! reclaimed lazily by [`ExpiringCache::purge_expired`] or on [`take`].
//!
//! [`take`]: ExpiringCache::take

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe expiring map.
#[derive(Debug)]
pub struct ExpiringCache<V> {
    inner: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V> Clone for ExpiringCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiringCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a value under `key`, valid for `ttl` from now. Replaces any
    /// existing entry under the same key.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut guard = self.inner.write().unwrap();
        guard.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Look up a live entry. An expired entry is treated as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let guard = self.inner.read().unwrap();
        guard
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Remove and return a live entry. Expired entries are dropped and
    /// reported as absent; the removal is atomic, so two concurrent takers
    /// of the same key cannot both succeed.
    #[must_use]
    pub fn take(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.write().unwrap();
        let entry = guard.remove(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value)
        } else {
            None
        }
    }

    /// Drop all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut guard = self.inner.write().unwrap();
        let before = guard.len();
        let now = Instant::now();
        guard.retain(|_, e| e.expires_at > now);
        before - guard.len()
    }

    /// Number of entries, live or not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ExpiringCache::new();
        cache.put("a", 1u32, Duration::from_secs(60));

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache = ExpiringCache::new();
        cache.put("a", 1u32, Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.take("a"), None);
    }

    #[test]
    fn test_take_is_single_use() {
        let cache = ExpiringCache::new();
        cache.put("a", 1u32, Duration::from_secs(60));

        assert_eq!(cache.take("a"), Some(1));
        assert_eq!(cache.take("a"), None);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_purge_expired() {
        let cache = ExpiringCache::new();
        cache.put("old", 1u32, Duration::from_millis(10));
        cache.put("live", 2u32, Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("live"), Some(2));
    }
}
