// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory pattern store.
//!
//! Rows live in a sharded `DashMap`, so writers to different ids rarely share a
//! lock and writers to the same id serialize on its shard. Similarity search is
//! a full linear scan, which is fine for development and tests.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::analytics::PatternAnalytics;
use crate::domain::embedding::{cosine_similarity, EmbeddingGenerator};
use crate::domain::pattern::{
    validate_min_similarity, validate_score, ActionPattern, EffectivenessData, SimilarPattern,
};
use crate::domain::repository::{rank_candidates, PatternStore, PatternStoreError};
use crate::telemetry;

const BACKEND: &str = "memory";

#[derive(Clone)]
pub struct InMemoryPatternStore {
    patterns: Arc<DashMap<String, ActionPattern>>,
    generator: Arc<dyn EmbeddingGenerator>,
    default_min_similarity: f64,
}

impl InMemoryPatternStore {
    pub fn new(generator: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            patterns: Arc::new(DashMap::new()),
            generator,
            default_min_similarity: 0.3,
        }
    }

    pub fn with_default_min_similarity(mut self, threshold: f64) -> Self {
        self.default_min_similarity = threshold;
        self
    }

    fn dimension(&self) -> usize {
        self.generator.embedding_dimension()
    }

    fn check_query_embedding(&self, embedding: &[f32], min_similarity: f64) -> Result<(), PatternStoreError> {
        validate_min_similarity(min_similarity)?;
        if embedding.len() != self.dimension() {
            return Err(PatternStoreError::Validation(format!(
                "invalid query embedding dimension: expected {}, got {}",
                self.dimension(),
                embedding.len()
            )));
        }
        Ok(())
    }

    fn scan(&self, embedding: &[f32], limit: usize, min_similarity: f64) -> Vec<SimilarPattern> {
        let candidates: Vec<(ActionPattern, f64)> = self
            .patterns
            .iter()
            .map(|row| {
                let similarity = cosine_similarity(embedding, &row.embedding);
                (row.value().clone(), similarity)
            })
            .collect();
        rank_candidates(candidates, limit, min_similarity)
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn store_action_pattern(&self, pattern: &ActionPattern) -> Result<(), PatternStoreError> {
        pattern.validate(self.dimension())?;
        telemetry::record_store_operation(BACKEND, "store");

        let now = Utc::now();
        let mut row = pattern.clone();
        match self.patterns.entry(pattern.id.clone()) {
            Entry::Occupied(mut existing) => {
                row.created_at = existing.get().created_at;
                row.updated_at = now.max(existing.get().updated_at);
                existing.insert(row);
                debug!(pattern_id = %pattern.id, "Replaced action pattern");
            }
            Entry::Vacant(slot) => {
                row.created_at = now;
                row.updated_at = now;
                slot.insert(row);
                debug!(pattern_id = %pattern.id, "Inserted action pattern");
            }
        }
        Ok(())
    }

    async fn find_similar_patterns(
        &self,
        target: &ActionPattern,
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<SimilarPattern>, PatternStoreError> {
        self.check_query_embedding(&target.embedding, min_similarity)?;
        telemetry::record_store_operation(BACKEND, "find_similar");
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _timer = telemetry::SearchTimer::start(BACKEND);
        Ok(self.scan(&target.embedding, limit, min_similarity))
    }

    async fn search_by_semantics(&self, query: &str, limit: usize) -> Result<Vec<SimilarPattern>, PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "search_semantic");
        let embedding = self.generator.generate_text_embedding(query).await?;
        self.check_query_embedding(&embedding, self.default_min_similarity)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _timer = telemetry::SearchTimer::start(BACKEND);
        Ok(self.scan(&embedding, limit, self.default_min_similarity))
    }

    async fn update_pattern_effectiveness(&self, id: &str, score: f64) -> Result<(), PatternStoreError> {
        validate_score(score)?;
        telemetry::record_store_operation(BACKEND, "update_effectiveness");

        let mut row = self
            .patterns
            .get_mut(id)
            .ok_or_else(|| PatternStoreError::NotFound(id.to_string()))?;
        row.effectiveness_data
            .get_or_insert_with(|| EffectivenessData::with_score(score))
            .score = score;
        row.updated_at = Utc::now().max(row.updated_at);
        Ok(())
    }

    async fn delete_pattern(&self, id: &str) -> Result<(), PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "delete");
        self.patterns
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PatternStoreError::NotFound(id.to_string()))
    }

    async fn get_pattern(&self, id: &str) -> Result<Option<ActionPattern>, PatternStoreError> {
        Ok(self.patterns.get(id).map(|row| row.value().clone()))
    }

    async fn list_patterns(&self) -> Result<Vec<ActionPattern>, PatternStoreError> {
        let mut patterns: Vec<ActionPattern> = self.patterns.iter().map(|row| row.value().clone()).collect();
        patterns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(patterns)
    }

    async fn get_pattern_analytics(&self) -> Result<PatternAnalytics, PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "analytics");
        Ok(PatternAnalytics::from_patterns(self.list_patterns().await?))
    }

    async fn is_healthy(&self) -> Result<(), PatternStoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
