//! Cache store implementation
//!
//! In-memory byte cache with per-entry TTL and oldest-first eviction.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::CacheConfig;
use crate::types::Result;

/// Key/value backend the mirror writes through to
///
/// Values are opaque serialized records; the mirror owns their encoding.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<()>;
}

/// A cached entry with expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Remaining TTL in seconds
    pub fn remaining_ttl_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory content cache
pub struct ContentCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Live entry for a key; expired entries are dropped on access
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                return Some(entry.clone());
            }
            drop(entry); // release the shard before removing
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache miss");
        None
    }

    /// Store an entry with explicit TTL
    pub fn put(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        debug!(key, ttl_secs = ttl.as_secs(), "Cache set");
        self.entries.insert(key.to_string(), CacheEntry::new(data, ttl));
        self.maybe_evict();
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }

        if count > 0 {
            debug!(count, "Cleaned up expired cache entries");
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Evict oldest entries once over capacity
    fn maybe_evict(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        // Evict a little extra to avoid thrashing at the limit
        let slack = (self.config.max_entries / 100).max(1);
        let to_evict = self.entries.len() - self.config.max_entries + slack;

        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();

        entries.sort_by_key(|(_, created)| *created);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(evicted = to_evict, "Evicted cache entries");
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl CacheBackend for ContentCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_entry(key).map(|entry| entry.data))
    }

    async fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<()> {
        self.put(key, data, ttl);
        Ok(())
    }
}

/// Spawn a background task to periodically cleanup expired entries
pub fn spawn_cleanup_task(cache: Arc<ContentCache>) -> tokio::task::JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    info!("Cache cleanup task started");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed,
                entries = stats.entries,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Cache cleanup completed"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_get_put() {
        let cache = ContentCache::with_defaults();
        let key = "flr-1/a-7";

        assert!(cache.get_entry(key).is_none());

        cache.put(key, b"{}".to_vec(), Duration::from_secs(300));
        let entry = cache.get_entry(key).expect("Should have entry");
        assert_eq!(entry.data, b"{}");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = ContentCache::with_defaults();
        let key = "a-1";

        cache.put(key, b"will expire".to_vec(), Duration::from_millis(10));
        assert!(cache.get_entry(key).is_some());

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get_entry(key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let cache = ContentCache::with_defaults();
        cache.put("short", b"x".to_vec(), Duration::from_millis(5));
        cache.put("long", b"y".to_vec(), Duration::from_secs(300));

        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.cleanup(), 1);
        assert!(cache.get_entry("long").is_some());
    }

    #[test]
    fn test_eviction_over_capacity() {
        let cache = ContentCache::new(CacheConfig {
            max_entries: 3,
            ..Default::default()
        });
        for i in 0..4 {
            cache.put(&format!("a-{}", i), vec![i as u8], Duration::from_secs(300));
        }

        let stats = cache.stats();
        assert!(stats.entries <= 3);
        assert!(stats.evictions >= 1);
    }

    #[tokio::test]
    async fn test_backend_roundtrip() {
        let cache = ContentCache::with_defaults();
        CacheBackend::set(&cache, "a-1", b"abc".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        let data = CacheBackend::get(&cache, "a-1").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"abc"[..]));
    }
}
