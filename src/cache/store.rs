//! In-memory cache backend
//!
//! A [`DashMap`] of serialized review snapshots. Each entry carries its own
//! deadline and a strong ETag. When the map grows past `max_entries` the
//! entries written longest ago are dropped first.

use super::{CacheBackend, CacheConfig, CacheError};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Strong ETag over a serialized body: quoted hex of the first 16 SHA-256 bytes
pub fn compute_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

/// One stored snapshot
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub etag: String,
    /// Write order, used for eviction
    seq: u64,
    deadline: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration, seq: u64) -> Self {
        Self {
            etag: compute_etag(&data),
            data,
            seq,
            deadline: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline <= Instant::now()
    }

    /// Time left before the entry stops being served
    pub fn time_to_live(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Point-in-time counters, reported by `/health`
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hits over lookups, in percent
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            lookups => self.hits as f64 * 100.0 / lookups as f64,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

/// In-memory [`CacheBackend`]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    counters: Counters,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            counters: Counters::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, counting the hit or miss
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let live = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.clone()),
            _ => None,
        };

        match live {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                Some(entry)
            }
            None => {
                // Shard guard is released above
                self.entries.remove_if(key, |_, entry| entry.is_expired());
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache miss");
                None
            }
        }
    }

    /// Store a snapshot, evicting the oldest writes when over capacity
    pub fn insert(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        let seq = self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.entries
            .insert(key.to_string(), CacheEntry::new(data, ttl, seq));
        debug!(key, ttl_secs = ttl.as_secs(), "Cache set");

        let excess = self.entries.len().saturating_sub(self.config.max_entries);
        if excess > 0 {
            self.evict_oldest(excess);
        }
    }

    /// Drop an entry; true if a live one was there
    pub fn invalidate(&self, key: &str) -> bool {
        matches!(self.entries.remove(key), Some((_, entry)) if !entry.is_expired())
    }

    /// Whether a live entry exists. Does not touch the counters.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Drop every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn evict_oldest(&self, count: usize) {
        let mut by_age: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.seq, entry.key().clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, key) in by_age.into_iter().take(count) {
            if self.entries.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(evicted = count, "Evicted oldest cache entries");
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.lookup(key).map(|entry| entry.data))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.invalidate(key))
    }
}

/// Purge expired entries every `cleanup_interval` for the life of the process
pub fn spawn_cleanup_task(cache: Arc<MemoryCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                let stats = cache.stats();
                debug!(
                    purged,
                    entries = stats.entries,
                    hit_rate = format!("{:.1}%", stats.hit_rate()),
                    "Purged expired cache entries"
                );
            }
        }
    });

    info!("Cache cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn etag_depends_only_on_content() {
        assert_eq!(compute_etag(b"{\"rating\":5}"), compute_etag(b"{\"rating\":5}"));
        assert_ne!(compute_etag(b"{\"rating\":5}"), compute_etag(b"{\"rating\":4}"));

        let etag = compute_etag(b"x");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 34);
    }

    #[test]
    fn lookup_counts_hits_and_misses() {
        let cache = MemoryCache::with_defaults();

        assert!(cache.lookup("review:abc").is_none());
        cache.insert("review:abc", b"{}".to_vec(), MINUTE);
        let entry = cache.lookup("review:abc").expect("entry after insert");
        assert_eq!(entry.data, b"{}");
        assert_eq!(entry.etag, compute_etag(b"{}"));

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = MemoryCache::with_defaults();
        cache.insert("reviews:all", b"[1]".to_vec(), Duration::from_millis(10));
        assert!(cache.contains("reviews:all"));

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.lookup("reviews:all").is_none());
        assert!(!cache.contains("reviews:all"));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = MemoryCache::with_defaults();
        cache.insert("review:old", b"o".to_vec(), Duration::from_millis(5));
        cache.insert("review:new", b"n".to_vec(), MINUTE);
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.contains("review:new"));
    }

    #[test]
    fn invalidate_reports_presence() {
        let cache = MemoryCache::with_defaults();
        cache.insert("review:1", b"x".to_vec(), MINUTE);

        assert!(cache.invalidate("review:1"));
        assert!(!cache.invalidate("review:1"));
    }

    #[test]
    fn eviction_drops_oldest_write() {
        let cache = MemoryCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });

        cache.insert("review:1", b"1".to_vec(), MINUTE);
        cache.insert("review:2", b"2".to_vec(), MINUTE);
        cache.insert("review:3", b"3".to_vec(), MINUTE);

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.evictions), (2, 1));
        assert!(!cache.contains("review:1"));
        assert!(cache.contains("review:2"));
        assert!(cache.contains("review:3"));
    }

    #[tokio::test]
    async fn backend_trait_round() {
        let cache = MemoryCache::with_defaults();
        cache.set("review:9", b"nine".to_vec(), MINUTE).await.unwrap();

        assert_eq!(cache.get("review:9").await.unwrap(), Some(b"nine".to_vec()));
        assert!(cache.delete("review:9").await.unwrap());
        assert!(!cache.delete("review:9").await.unwrap());
        assert_eq!(cache.get("review:9").await.unwrap(), None);
    }
}
