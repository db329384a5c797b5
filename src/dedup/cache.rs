//! Bounded LRU cache from content fingerprints to ledger URLs.
//!
//! The cache only accelerates lookups. Evicting an entry never touches the
//! ledger, and a miss always falls back to the ledger's hash columns.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

/// Thread-safe LRU map of fingerprint -> owning ledger URL.
///
/// One instance is shared by all workers of a run; every operation,
/// reads included, takes the same lock since a read updates recency.
pub struct SignatureCache {
    inner: Mutex<LruCache<String, String>>,
    capacity: NonZeroUsize,
}

impl SignatureCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, String>> {
        // A panicking holder cannot leave the LRU structurally broken.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a fingerprint, marking it most recently used.
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        self.lock().get(fingerprint).cloned()
    }

    /// Insert or replace a mapping, evicting the least recently used entry when full.
    pub fn put(&self, fingerprint: &str, url: &str) {
        let evicted = self.lock().push(fingerprint.to_string(), url.to_string());
        if let Some((old_fingerprint, old_url)) = evicted {
            if old_fingerprint != fingerprint {
                debug!(fingerprint = %old_fingerprint, url = %old_url, "Evicted cache entry");
            }
        }
    }

    /// Refresh recency without changing the value. Returns whether the key was present.
    pub fn touch(&self, fingerprint: &str) -> bool {
        self.lock().get(fingerprint).is_some()
    }

    /// Drop a mapping. Returns the URL it pointed to.
    pub fn invalidate(&self, fingerprint: &str) -> Option<String> {
        self.lock().pop(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for SignatureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_capacity_bound_evicts_least_recently_used() {
        let cache = SignatureCache::new(3);
        for i in 0..5 {
            cache.put(&format!("h{i}"), &format!("https://a.example/{i}"));
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("h0"));
        assert!(!cache.contains("h1"));
        assert_eq!(cache.get("h4").as_deref(), Some("https://a.example/4"));
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let cache = SignatureCache::new(2);
        cache.put("a", "https://a.example/a");
        cache.put("b", "https://a.example/b");
        assert!(cache.touch("a"));
        cache.put("c", "https://a.example/c");

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(!cache.touch("b"));
        assert_eq!(cache.get("a").as_deref(), Some("https://a.example/a"));
    }

    #[test]
    fn test_put_replaces_and_invalidate_removes() {
        let cache = SignatureCache::new(4);
        cache.put("h", "https://a.example/old");
        cache.put("h", "https://a.example/new");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate("h").as_deref(), Some("https://a.example/new"));
        assert!(cache.is_empty());
        assert!(cache.invalidate("h").is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = SignatureCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", "1");
        cache.put("b", "2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shared_across_threads() {
        let cache = Arc::new(SignatureCache::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..32 {
                        cache.put(&format!("{t}-{i}"), "https://a.example");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
