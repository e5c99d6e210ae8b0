// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Embedding Cache Contract
//!
//! Key → vector store with per-entry expiry and hit/miss accounting. Expiry is
//! always evaluated at read time against an absolute deadline; any background
//! sweep only reclaims memory.
//!
//! | Implementation | Scope | Health check |
//! |----------------|-------|--------------|
//! | `InMemoryEmbeddingCache` | process-local | always healthy until closed |
//! | `PostgresEmbeddingCache` | shared across processes | round-trip to the server |
//!
//! A `ttl` of zero means the entry never expires, for every implementation.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Cache trait, statistics and key derivation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Cache is closed")]
    Closed,

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 before the first lookup
    pub hit_rate: f64,
    /// Live (unexpired) entries
    pub total_keys: u64,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, total_keys: u64) -> Self {
        let observations = hits + misses;
        let hit_rate = if observations == 0 {
            0.0
        } else {
            hits as f64 / observations as f64
        };
        Self { hits, misses, hit_rate, total_keys }
    }
}

/// Lock-free hit/miss counters shared by the cache implementations.
#[derive(Debug, Default)]
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsCounter {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::telemetry::CACHE_HITS).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::telemetry::CACHE_MISSES).increment(1);
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, total_keys: u64) -> CacheStats {
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            total_keys,
        )
    }
}

#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// `None` on a miss or an expired entry. A missing key is never an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError>;

    /// Upsert with a per-entry TTL. `Duration::ZERO` disables expiry.
    async fn set(&self, key: &str, embedding: &[f32], ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Drops every entry and zeroes the statistics.
    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Releases backend resources. Later calls fail with [`CacheError::Closed`].
    async fn close(&self) -> Result<(), CacheError>;

    async fn health_check(&self) -> Result<(), CacheError>;
}

/// Which generator input a cache key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyKind {
    Text,
    Action,
    Context,
}

impl CacheKeyKind {
    fn as_str(&self) -> &'static str {
        match self {
            CacheKeyKind::Text => "text",
            CacheKeyKind::Action => "action",
            CacheKeyKind::Context => "context",
        }
    }
}

/// Stable cache key: `embedding:<generator>:<kind>:<sha256 of canonical input>`.
///
/// `generator` is the producing generator's identity, so a cache shared by
/// deployments with different models or dimensions never mixes their vectors.
pub fn cache_key(generator: &str, kind: CacheKeyKind, canonical_input: &str) -> String {
    let digest = Sha256::digest(canonical_input.as_bytes());
    format!("embedding:{}:{}:{}", generator, kind.as_str(), hex::encode(digest))
}
