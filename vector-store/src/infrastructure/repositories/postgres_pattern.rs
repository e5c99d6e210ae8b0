// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Pattern Store
//!
//! Production `PatternStore` backed by the `action_patterns` table and the
//! `pgvector` extension. The embedding column is a fixed-dimension `vector(D)`
//! with an HNSW index (`vector_cosine_ops`), so similarity queries walk the
//! index instead of scanning the table. Index entries are maintained by
//! Postgres inside the same transaction as the row write.
//!
//! Candidates returned by the index are re-scored with the exact cosine used
//! by the in-memory store and ranked by the shared `rank_candidates`, keeping
//! both backends' ordering logically identical.
//!
//! Every call is bounded by `operation_timeout` on the client and by
//! `statement_timeout` on the server. A dropped or timed-out write either
//! committed or rolled back as a whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::analytics::PatternAnalytics;
use crate::domain::config::VectorIndexConfig;
use crate::domain::embedding::{cosine_similarity, EmbeddingGenerator};
use crate::domain::pattern::{
    validate_min_similarity, validate_score, ActionPattern, EffectivenessData, SimilarPattern,
};
use crate::domain::repository::{rank_candidates, PatternStore, PatternStoreError};
use crate::infrastructure::db::Database;
use crate::telemetry;

const BACKEND: &str = "postgres";

/// Extra index candidates fetched beyond `limit`. Thresholding happens after
/// the exact re-score, so ties at the cut-off follow the shared tie-break.
const CANDIDATE_OVERSAMPLE: usize = 16;

/// Upper bound pgvector accepts for `hnsw.ef_search`.
const MAX_EF_SEARCH: usize = 1000;

/// How a similarity query reaches its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPlan {
    /// Walk the HNSW index with the given `ef_search` and row limit.
    Index { ef_search: usize, candidates: i64 },
    /// Exact ordering over every row, index scans disabled. `None` means no limit.
    Exact { candidates: Option<i64> },
}

impl SearchPlan {
    fn for_limit(limit: usize, configured_ef_search: usize) -> Self {
        let candidates = limit.saturating_add(CANDIDATE_OVERSAMPLE);
        if candidates <= MAX_EF_SEARCH {
            SearchPlan::Index {
                ef_search: configured_ef_search.max(candidates).min(MAX_EF_SEARCH),
                candidates: candidates as i64,
            }
        } else {
            SearchPlan::Exact {
                candidates: i64::try_from(candidates).ok(),
            }
        }
    }
}

const PATTERN_COLUMNS: &str = r#"
    id, action_type, alert_name, alert_severity, namespace, resource_type, resource_name,
    action_parameters, context_labels, pre_conditions, post_conditions, metadata,
    embedding::text AS embedding, effectiveness_data, created_at, updated_at
"#;

pub struct PostgresPatternStore {
    db: Database,
    generator: Arc<dyn EmbeddingGenerator>,
    index: VectorIndexConfig,
    default_min_similarity: f64,
    operation_timeout: Duration,
}

impl PostgresPatternStore {
    pub fn new(
        db: Database,
        generator: Arc<dyn EmbeddingGenerator>,
        index: VectorIndexConfig,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            generator,
            index,
            default_min_similarity: 0.3,
            operation_timeout,
        }
    }

    pub fn with_default_min_similarity(mut self, threshold: f64) -> Self {
        self.default_min_similarity = threshold;
        self
    }

    fn pool(&self) -> &PgPool {
        self.db.get_pool()
    }

    fn dimension(&self) -> usize {
        self.generator.embedding_dimension()
    }

    /// Creates the extension, table and indexes if missing. The embedding
    /// column dimension is fixed at creation time.
    pub async fn initialize(&self) -> Result<(), PatternStoreError> {
        let ddl = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS action_patterns (
                    id TEXT PRIMARY KEY,
                    action_type TEXT NOT NULL,
                    alert_name TEXT NOT NULL,
                    alert_severity TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    resource_type TEXT NOT NULL,
                    resource_name TEXT NOT NULL,
                    action_parameters JSONB NOT NULL DEFAULT '{{}}',
                    context_labels JSONB NOT NULL DEFAULT '{{}}',
                    pre_conditions JSONB NOT NULL DEFAULT '{{}}',
                    post_conditions JSONB NOT NULL DEFAULT '{{}}',
                    metadata JSONB NOT NULL DEFAULT '{{}}',
                    embedding vector({dim}) NOT NULL,
                    effectiveness_data JSONB,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )
                "#,
                dim = self.dimension()
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS action_patterns_embedding_hnsw ON action_patterns \
                 USING hnsw (embedding vector_cosine_ops) WITH (m = {}, ef_construction = {})",
                self.index.m, self.index.ef_construction
            ),
            "CREATE INDEX IF NOT EXISTS action_patterns_action_type_idx ON action_patterns (action_type)".to_string(),
            "CREATE INDEX IF NOT EXISTS action_patterns_created_at_idx ON action_patterns (created_at DESC)".to_string(),
        ];

        for stmt in ddl {
            self.bounded(async { sqlx::query(&stmt).execute(self.pool()).await.map_err(PatternStoreError::from) })
                .await?;
        }
        info!(dimension = self.dimension(), "Action pattern schema ready");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, PatternStoreError>>,
    ) -> Result<T, PatternStoreError> {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| PatternStoreError::Timeout(self.operation_timeout))?
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

    async fn ranked_search(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<SimilarPattern>, PatternStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _timer = telemetry::SearchTimer::start(BACKEND);
        let plan = SearchPlan::for_limit(limit, self.index.ef_search as usize);
        let target_vector = format_vector(embedding);

        let rows = self
            .bounded(async {
                let mut tx = self.pool().begin().await?;
                // LIMIT NULL is LIMIT ALL
                let candidates = match plan {
                    SearchPlan::Index { ef_search, candidates } => {
                        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search))
                            .execute(&mut *tx)
                            .await?;
                        Some(candidates)
                    }
                    SearchPlan::Exact { candidates } => {
                        sqlx::query("SET LOCAL enable_indexscan = off")
                            .execute(&mut *tx)
                            .await?;
                        candidates
                    }
                };
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM action_patterns ORDER BY embedding <=> $1::vector LIMIT $2",
                    PATTERN_COLUMNS
                ))
                .bind(&target_vector)
                .bind(candidates)
                .fetch_all(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<_, PatternStoreError>(rows)
            })
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let pattern = parse_pattern_row(&row)?;
            let similarity = cosine_similarity(embedding, &pattern.embedding);
            candidates.push((pattern, similarity));
        }
        debug!(candidates = candidates.len(), limit, ?plan, "Ranked search candidates");
        Ok(rank_candidates(candidates, limit, min_similarity))
    }
}

#[async_trait]
impl PatternStore for PostgresPatternStore {
    async fn store_action_pattern(&self, pattern: &ActionPattern) -> Result<(), PatternStoreError> {
        pattern.validate(self.dimension())?;
        telemetry::record_store_operation(BACKEND, "store");

        let action_parameters = serde_json::to_value(&pattern.action_parameters)?;
        let context_labels = serde_json::to_value(&pattern.context_labels)?;
        let pre_conditions = serde_json::to_value(&pattern.pre_conditions)?;
        let post_conditions = serde_json::to_value(&pattern.post_conditions)?;
        let metadata = serde_json::to_value(&pattern.metadata)?;
        let effectiveness = pattern
            .effectiveness_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let embedding = format_vector(&pattern.embedding);
        let now = Utc::now();

        // ON CONFLICT takes the row lock, so concurrent writers of one id
        // serialize and the last committed statement wins whole.
        self.bounded(async {
            sqlx::query(
                r#"
                INSERT INTO action_patterns (
                    id, action_type, alert_name, alert_severity, namespace,
                    resource_type, resource_name, action_parameters, context_labels,
                    pre_conditions, post_conditions, metadata, embedding,
                    effectiveness_data, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13::vector, $14, $15, $15)
                ON CONFLICT (id) DO UPDATE SET
                    action_type = EXCLUDED.action_type,
                    alert_name = EXCLUDED.alert_name,
                    alert_severity = EXCLUDED.alert_severity,
                    namespace = EXCLUDED.namespace,
                    resource_type = EXCLUDED.resource_type,
                    resource_name = EXCLUDED.resource_name,
                    action_parameters = EXCLUDED.action_parameters,
                    context_labels = EXCLUDED.context_labels,
                    pre_conditions = EXCLUDED.pre_conditions,
                    post_conditions = EXCLUDED.post_conditions,
                    metadata = EXCLUDED.metadata,
                    embedding = EXCLUDED.embedding,
                    effectiveness_data = EXCLUDED.effectiveness_data,
                    updated_at = GREATEST(EXCLUDED.updated_at, action_patterns.updated_at)
                "#,
            )
            .bind(&pattern.id)
            .bind(&pattern.action_type)
            .bind(&pattern.alert_name)
            .bind(&pattern.alert_severity)
            .bind(&pattern.namespace)
            .bind(&pattern.resource_type)
            .bind(&pattern.resource_name)
            .bind(action_parameters)
            .bind(context_labels)
            .bind(pre_conditions)
            .bind(post_conditions)
            .bind(metadata)
            .bind(embedding)
            .bind(effectiveness)
            .bind(now)
            .execute(self.pool())
            .await?;
            Ok::<_, PatternStoreError>(())
        })
        .await?;

        debug!(pattern_id = %pattern.id, "Stored action pattern");
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
        self.ranked_search(&target.embedding, limit, min_similarity).await
    }

    async fn search_by_semantics(&self, query: &str, limit: usize) -> Result<Vec<SimilarPattern>, PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "search_semantic");
        let embedding = self.generator.generate_text_embedding(query).await?;
        self.check_query_embedding(&embedding, self.default_min_similarity)?;
        self.ranked_search(&embedding, limit, self.default_min_similarity).await
    }

    async fn update_pattern_effectiveness(&self, id: &str, score: f64) -> Result<(), PatternStoreError> {
        validate_score(score)?;
        telemetry::record_store_operation(BACKEND, "update_effectiveness");
        let initial = serde_json::to_value(EffectivenessData::with_score(score))?;

        let result = self
            .bounded(async {
                let result = sqlx::query(
                    r#"
                    UPDATE action_patterns SET
                        effectiveness_data = jsonb_set(
                            COALESCE(effectiveness_data, $3::jsonb), '{score}', to_jsonb($2::double precision)
                        ),
                        updated_at = GREATEST($4, updated_at)
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(score)
                .bind(initial)
                .bind(Utc::now())
                .execute(self.pool())
                .await?;
                Ok::<_, PatternStoreError>(result)
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(PatternStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_pattern(&self, id: &str) -> Result<(), PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "delete");
        let result = self
            .bounded(async {
                let result = sqlx::query("DELETE FROM action_patterns WHERE id = $1")
                    .bind(id)
                    .execute(self.pool())
                    .await?;
                Ok::<_, PatternStoreError>(result)
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(PatternStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_pattern(&self, id: &str) -> Result<Option<ActionPattern>, PatternStoreError> {
        let row = self
            .bounded(async {
                let row = sqlx::query(&format!("SELECT {} FROM action_patterns WHERE id = $1", PATTERN_COLUMNS))
                    .bind(id)
                    .fetch_optional(self.pool())
                    .await?;
                Ok::<_, PatternStoreError>(row)
            })
            .await?;

        row.as_ref().map(parse_pattern_row).transpose()
    }

    async fn list_patterns(&self) -> Result<Vec<ActionPattern>, PatternStoreError> {
        let rows = self
            .bounded(async {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM action_patterns ORDER BY created_at DESC, id ASC",
                    PATTERN_COLUMNS
                ))
                .fetch_all(self.pool())
                .await?;
                Ok::<_, PatternStoreError>(rows)
            })
            .await?;

        rows.iter().map(parse_pattern_row).collect()
    }

    async fn get_pattern_analytics(&self) -> Result<PatternAnalytics, PatternStoreError> {
        telemetry::record_store_operation(BACKEND, "analytics");
        Ok(PatternAnalytics::from_patterns(self.list_patterns().await?))
    }

    async fn is_healthy(&self) -> Result<(), PatternStoreError> {
        self.bounded(async { self.db.ping().await.map_err(PatternStoreError::from) }).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// pgvector text literal, e.g. `[0.1,0.2,0.3]`.
pub(crate) fn format_vector(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 10 + 2);
    out.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

pub(crate) fn parse_vector(text: &str) -> Result<Vec<f32>, PatternStoreError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| PatternStoreError::Serialization(format!("malformed vector literal: {}", text)))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|e| PatternStoreError::Serialization(format!("invalid vector component {:?}: {}", v, e)))
        })
        .collect()
}

fn json_column<T: serde::de::DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, PatternStoreError> {
    let value: serde_json::Value = row.try_get(column)?;
    serde_json::from_value(value)
        .map_err(|e| PatternStoreError::Serialization(format!("Failed to deserialize {}: {}", column, e)))
}

fn parse_pattern_row(row: &PgRow) -> Result<ActionPattern, PatternStoreError> {
    let embedding_text: String = row.try_get("embedding")?;
    let effectiveness: Option<serde_json::Value> = row.try_get("effectiveness_data")?;
    let effectiveness_data = effectiveness
        .map(serde_json::from_value::<EffectivenessData>)
        .transpose()
        .map_err(|e| PatternStoreError::Serialization(format!("Failed to deserialize effectiveness_data: {}", e)))?;
    let context_labels: HashMap<String, String> = json_column(row, "context_labels")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(ActionPattern {
        id: row.try_get("id")?,
        action_type: row.try_get("action_type")?,
        alert_name: row.try_get("alert_name")?,
        alert_severity: row.try_get("alert_severity")?,
        namespace: row.try_get("namespace")?,
        resource_type: row.try_get("resource_type")?,
        resource_name: row.try_get("resource_name")?,
        action_parameters: json_column(row, "action_parameters")?,
        context_labels,
        pre_conditions: json_column(row, "pre_conditions")?,
        post_conditions: json_column(row, "post_conditions")?,
        metadata: json_column(row, "metadata")?,
        embedding: parse_vector(&embedding_text)?,
        effectiveness_data,
        created_at,
        updated_at,
    })
}
