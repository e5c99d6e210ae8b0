// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Store Interface
//!
//! Persistence contract for [`ActionPattern`]s, following the repository
//! pattern: the trait lives in the domain layer and is implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Implementation | Similarity search | Intended use |
//! |----------------|-------------------|--------------|
//! | `InMemoryPatternStore` | linear scan | development, tests |
//! | `PostgresPatternStore` | pgvector HNSW index | production |
//!
//! Both backends rank through [`rank_candidates`], so the same dataset and
//! thresholds yield the same logical order regardless of backend.
//!
//! ## Ranking
//!
//! Cosine similarity clamped to [0, 1], descending. Ties go to the pattern
//! with the more recent `updated_at`, then to the lexicographically smaller id.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::time::Duration;

use crate::domain::analytics::PatternAnalytics;
use crate::domain::embedding::EmbeddingError;
use crate::domain::pattern::{ActionPattern, SimilarPattern};

#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Upsert keyed by `id`. `created_at` is set on first insert and preserved
    /// afterwards; `updated_at` is refreshed on every write.
    async fn store_action_pattern(&self, pattern: &ActionPattern) -> Result<(), PatternStoreError>;

    /// At most `limit` patterns with similarity >= `min_similarity`, ranked 1..N.
    async fn find_similar_patterns(
        &self,
        target: &ActionPattern,
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<SimilarPattern>, PatternStoreError>;

    /// Embeds `query` and ranks like `find_similar_patterns` with the store's
    /// default similarity floor.
    async fn search_by_semantics(&self, query: &str, limit: usize) -> Result<Vec<SimilarPattern>, PatternStoreError>;

    /// Updates only the effectiveness score and `updated_at`.
    async fn update_pattern_effectiveness(&self, id: &str, score: f64) -> Result<(), PatternStoreError>;

    /// Fails with `NotFound` when the id is unknown, including on a repeated delete.
    async fn delete_pattern(&self, id: &str) -> Result<(), PatternStoreError>;

    async fn get_pattern(&self, id: &str) -> Result<Option<ActionPattern>, PatternStoreError>;

    async fn list_patterns(&self) -> Result<Vec<ActionPattern>, PatternStoreError>;

    async fn get_pattern_analytics(&self) -> Result<PatternAnalytics, PatternStoreError>;

    /// Cheap liveness check; never scans the store.
    async fn is_healthy(&self) -> Result<(), PatternStoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Pattern store errors
#[derive(Debug, thiserror::Error)]
pub enum PatternStoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pattern not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Contention: {0}")]
    Contention(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl PatternStoreError {
    /// Whether a caller may retry the operation with backoff. Transport
    /// failures reaching the embedding provider count as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PatternStoreError::Unavailable(_)
                | PatternStoreError::Contention(_)
                | PatternStoreError::Timeout(_)
                | PatternStoreError::Embedding(EmbeddingError::Network(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PatternStoreError::NotFound(_))
    }
}

impl From<sqlx::Error> for PatternStoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => PatternStoreError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available, query_canceled
                Some("40001") | Some("40P01") | Some("55P03") | Some("57014") => {
                    PatternStoreError::Contention(db_err.message().to_string())
                }
                Some(code) if code.starts_with("22") => PatternStoreError::Validation(db_err.message().to_string()),
                Some(code) if code.starts_with("08") => PatternStoreError::Unavailable(db_err.message().to_string()),
                _ => PatternStoreError::Database(err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                PatternStoreError::Unavailable(err.to_string())
            }
            _ => PatternStoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PatternStoreError {
    fn from(err: serde_json::Error) -> Self {
        PatternStoreError::Serialization(err.to_string())
    }
}

/// Filters, orders and ranks scored candidates.
pub fn rank_candidates(
    candidates: impl IntoIterator<Item = (ActionPattern, f64)>,
    limit: usize,
    min_similarity: f64,
) -> Vec<SimilarPattern> {
    let mut kept: Vec<(ActionPattern, f64)> = candidates
        .into_iter()
        .map(|(pattern, similarity)| (pattern, similarity.clamp(0.0, 1.0)))
        .filter(|(_, similarity)| *similarity >= min_similarity)
        .collect();

    kept.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    kept.truncate(limit);

    kept.into_iter()
        .enumerate()
        .map(|(i, (pattern, similarity))| SimilarPattern {
            pattern,
            similarity,
            rank: i + 1,
        })
        .collect()
}
