// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-local embedding cache.
//!
//! Entries carry an absolute deadline checked on every read. The optional
//! sweeper only frees memory held by entries that already read as misses.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::cache::{CacheError, CacheStats, EmbeddingCache, StatsCounter};

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Clone)]
pub struct InMemoryEmbeddingCache {
    inner: Arc<Inner>,
}

struct Inner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: StatsCounter,
    closed: AtomicBool,
    max_entries: Option<usize>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// When `max_entries` is reached, expired entries are purged first and then
    /// the entry closest to expiry is evicted.
    pub fn with_capacity(max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                stats: StatsCounter::default(),
                closed: AtomicBool::new(false),
                max_entries,
                sweeper: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Periodically drops expired entries. Requires a running tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                let removed = inner.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, "Swept expired embedding cache entries");
                }
            }
        });
        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryEmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl EmbeddingCache for InMemoryEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        // Counted under the read lock so a concurrent clear() cannot interleave.
        let entries = self.inner.entries.read();
        let found = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.embedding.clone());
        match &found {
            Some(_) => self.inner.stats.record_hit(),
            None => self.inner.stats.record_miss(),
        }
        Ok(found)
    }

    async fn set(&self, key: &str, embedding: &[f32], ttl: Duration) -> Result<(), CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let entry = CacheEntry {
            embedding: embedding.to_vec(),
            expires_at: if ttl.is_zero() { None } else { Some(now + ttl) },
        };

        let mut entries = self.inner.entries.write();
        if let Some(max) = self.inner.max_entries {
            if !entries.contains_key(key) && entries.len() >= max {
                entries.retain(|_, e| e.is_live(now));
                if entries.len() >= max {
                    let victim = entries
                        .iter()
                        .min_by_key(|(_, e)| e.expires_at.map_or((1, now), |d| (0, d)))
                        .map(|(k, _)| k.clone());
                    if let Some(victim) = victim {
                        entries.remove(&victim);
                    }
                }
            }
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let removed = self.inner.entries.write().remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        // Hold the write lock across the stats reset so no reader observes
        // emptied entries with stale counters.
        let mut entries = self.inner.entries.write();
        entries.clear();
        self.inner.stats.reset();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let entries = self.inner.entries.read();
        let live = entries.values().filter(|entry| entry.is_live(now)).count() as u64;
        Ok(self.inner.stats.snapshot(live))
    }

    async fn close(&self) -> Result<(), CacheError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::Closed);
        }
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.entries.write().clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.ensure_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_until_expiry() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("k", &[0.6, 0.8], Duration::from_secs(2)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(vec![0.6, 0.8]));

        tokio::time::advance(Duration::from_secs(3)).await;
        let before = cache.stats().await.unwrap().misses;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().misses, before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("k", &[1.0], Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_hit_rate_after_misses_then_hits() {
        let cache = InMemoryEmbeddingCache::new();
        for _ in 0..3 {
            assert!(cache.get("k").await.unwrap().is_none());
        }
        cache.set("k", &[1.0], Duration::from_secs(60)).await.unwrap();
        for _ in 0..5 {
            assert!(cache.get("k").await.unwrap().is_some());
        }
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 5);
        assert_eq!(stats.misses, 3);
        assert!((stats.hit_rate - 5.0 / 8.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_keys, 1);
    }

    #[tokio::test]
    async fn test_clear_resets_entries_and_stats() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("a", &[1.0], Duration::from_secs(60)).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_closed_cache_fails_cleanly() {
        let cache = InMemoryEmbeddingCache::new();
        cache.close().await.unwrap();
        assert_eq!(cache.get("k").await, Err(CacheError::Closed));
        assert_eq!(cache.set("k", &[1.0], Duration::ZERO).await, Err(CacheError::Closed));
        assert_eq!(cache.health_check().await, Err(CacheError::Closed));
        assert_eq!(cache.close().await, Err(CacheError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_nearest_deadline() {
        let cache = InMemoryEmbeddingCache::with_capacity(Some(2));
        cache.set("short", &[1.0], Duration::from_secs(10)).await.unwrap();
        cache.set("long", &[2.0], Duration::from_secs(100)).await.unwrap();
        cache.set("new", &[3.0], Duration::from_secs(50)).await.unwrap();

        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("long").await.unwrap().is_some());
        assert!(cache.get("new").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_entries() {
        let cache = InMemoryEmbeddingCache::new();
        cache.spawn_sweeper(Duration::from_secs(1));
        cache.set("k", &[1.0], Duration::from_millis(500)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.inner.entries.read().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_counters_do_not_lose_updates() {
        let cache = InMemoryEmbeddingCache::new();
        cache.set("k", &[1.0], Duration::ZERO).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let key = if i % 2 == 0 { "k" } else { "missing" };
                        cache.get(key).await.unwrap();
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 800);
        assert_eq!(stats.misses, 800);
    }
}
