// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Shared Embedding Cache on PostgreSQL
//!
//! Network-reachable cache shared by every process pointed at the same
//! database. Entries live in an `UNLOGGED` table (no WAL, truncated after a
//! crash, which is acceptable for a cache). Expiry is evaluated in the `WHERE`
//! clause against the server clock, so an expired row never reads as a hit
//! even before [`PostgresEmbeddingCache::purge_expired`] removes it.
//!
//! Hit/miss counters are per process; `total_keys` reflects the shared table.

use async_trait::async_trait;
use sqlx::Row;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::cache::{CacheError, CacheStats, EmbeddingCache, StatsCounter};
use crate::domain::config::PostgresConfig;
use crate::infrastructure::db::Database;

const SCHEMA: &str = r#"
CREATE UNLOGGED TABLE IF NOT EXISTS embedding_cache (
    cache_key TEXT PRIMARY KEY,
    embedding REAL[] NOT NULL,
    expires_at TIMESTAMPTZ
)
"#;

pub struct PostgresEmbeddingCache {
    db: Database,
    stats: StatsCounter,
    closed: AtomicBool,
    operation_timeout: Duration,
}

impl PostgresEmbeddingCache {
    pub async fn connect(config: &PostgresConfig, operation_timeout: Duration) -> Result<Self, CacheError> {
        let db = Database::connect(config, operation_timeout)
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to cache database: {}", e)))?;
        Self::from_database(db, operation_timeout).await
    }

    pub async fn from_database(db: Database, operation_timeout: Duration) -> Result<Self, CacheError> {
        let cache = Self {
            db,
            stats: StatsCounter::default(),
            closed: AtomicBool::new(false),
            operation_timeout,
        };
        cache
            .bounded(async {
                sqlx::query(SCHEMA).execute(cache.db.get_pool()).await?;
                Ok(())
            })
            .await?;
        info!("Embedding cache table ready");
        Ok(cache)
    }

    /// Deletes expired rows. Only reclaims space; reads already ignore them.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.ensure_open()?;
        let removed = self
            .bounded(async {
                let result = sqlx::query("DELETE FROM embedding_cache WHERE expires_at IS NOT NULL AND expires_at <= now()")
                    .execute(self.db.get_pool())
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;
        debug!(removed, "Purged expired embedding cache rows");
        Ok(removed)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T, sqlx::Error>>) -> Result<T, CacheError> {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Timeout(self.operation_timeout)),
        }
    }
}

#[async_trait]
impl EmbeddingCache for PostgresEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
        self.ensure_open()?;
        let row = self
            .bounded(
                sqlx::query(
                    "SELECT embedding FROM embedding_cache \
                     WHERE cache_key = $1 AND (expires_at IS NULL OR expires_at > now())",
                )
                .bind(key)
                .fetch_optional(self.db.get_pool()),
            )
            .await?;

        match row {
            Some(row) => {
                let embedding: Vec<f32> = row
                    .try_get("embedding")
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                self.stats.record_hit();
                Ok(Some(embedding))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, embedding: &[f32], ttl: Duration) -> Result<(), CacheError> {
        self.ensure_open()?;
        let ttl_secs: Option<f64> = if ttl.is_zero() { None } else { Some(ttl.as_secs_f64()) };
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO embedding_cache (cache_key, embedding, expires_at)
                VALUES ($1, $2, now() + make_interval(secs => $3::double precision))
                ON CONFLICT (cache_key) DO UPDATE SET
                    embedding = EXCLUDED.embedding,
                    expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(key)
            .bind(embedding.to_vec())
            .bind(ttl_secs)
            .execute(self.db.get_pool()),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let row = self
            .bounded(
                sqlx::query(
                    "DELETE FROM embedding_cache WHERE cache_key = $1 \
                     RETURNING (expires_at IS NULL OR expires_at > now()) AS live",
                )
                .bind(key)
                .fetch_optional(self.db.get_pool()),
            )
            .await?;
        Ok(row.and_then(|r| r.try_get::<bool, _>("live").ok()).unwrap_or(false))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.bounded(sqlx::query("DELETE FROM embedding_cache").execute(self.db.get_pool()))
            .await?;
        self.stats.reset();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.ensure_open()?;
        let total: i64 = self
            .bounded(
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM embedding_cache WHERE expires_at IS NULL OR expires_at > now()",
                )
                .fetch_one(self.db.get_pool()),
            )
            .await?;
        Ok(self.stats.snapshot(total.max(0) as u64))
    }

    async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::Closed);
        }
        self.db.close().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.bounded(self.db.ping()).await
    }
}
