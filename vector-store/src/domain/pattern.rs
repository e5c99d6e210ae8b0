// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Action Pattern Aggregate
//!
//! An [`ActionPattern`] pairs a remediation action with the alert context that
//! triggered it, plus the embedding used to find it again. Patterns are
//! independent rows keyed by `id`; similarity between them is computed at query
//! time and never stored.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value types and validation shared by every store backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::repository::PatternStoreError;

/// Open map of semi-structured data. Opaque to the store beyond persistence.
pub type Attributes = HashMap<String, serde_json::Value>;

/// Historical effectiveness of an action pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessData {
    /// Score in [0, 1]
    pub score: f64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Mean execution time in seconds
    pub average_execution_time: f64,
    pub side_effects_count: u64,
    pub recurrence_rate: f64,
    pub last_assessed: DateTime<Utc>,
}

impl EffectivenessData {
    pub fn with_score(score: f64) -> Self {
        Self {
            score,
            success_count: 0,
            failure_count: 0,
            average_execution_time: 0.0,
            side_effects_count: 0,
            recurrence_rate: 0.0,
            last_assessed: Utc::now(),
        }
    }
}

/// A remediation action plus the alert context that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPattern {
    pub id: String,
    pub action_type: String,
    pub alert_name: String,
    pub alert_severity: String,
    pub namespace: String,
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default)]
    pub action_parameters: Attributes,
    #[serde(default)]
    pub context_labels: HashMap<String, String>,
    #[serde(default)]
    pub pre_conditions: Attributes,
    #[serde(default)]
    pub post_conditions: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effectiveness_data: Option<EffectivenessData>,
    /// Assigned by the store on first insert; ignored on input.
    pub created_at: DateTime<Utc>,
    /// Assigned by the store on every successful mutation; ignored on input.
    pub updated_at: DateTime<Utc>,
}

impl ActionPattern {
    pub fn new(id: impl Into<String>, action_type: impl Into<String>, alert_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            action_type: action_type.into(),
            alert_name: alert_name.into(),
            alert_severity: String::new(),
            namespace: String::new(),
            resource_type: String::new(),
            resource_name: String::new(),
            action_parameters: HashMap::new(),
            context_labels: HashMap::new(),
            pre_conditions: HashMap::new(),
            post_conditions: HashMap::new(),
            metadata: HashMap::new(),
            embedding: Vec::new(),
            effectiveness_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.alert_severity = severity.into();
        self
    }

    pub fn with_resource(
        mut self,
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        self.namespace = namespace.into();
        self.resource_type = resource_type.into();
        self.resource_name = resource_name.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_effectiveness(mut self, data: EffectivenessData) -> Self {
        self.effectiveness_data = Some(data);
        self
    }

    /// Effectiveness score, if the pattern has been assessed.
    pub fn score(&self) -> Option<f64> {
        self.effectiveness_data.as_ref().map(|e| e.score)
    }

    /// Canonical text used to embed this pattern for semantic lookup.
    pub fn embedding_text(&self) -> String {
        [
            self.action_type.as_str(),
            self.alert_name.as_str(),
            self.namespace.as_str(),
            self.resource_type.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Rejects the pattern before any mutation happens.
    pub fn validate(&self, dimension: usize) -> Result<(), PatternStoreError> {
        if self.id.trim().is_empty() {
            return Err(PatternStoreError::Validation("pattern id must not be empty".to_string()));
        }
        if self.embedding.len() != dimension {
            return Err(PatternStoreError::Validation(format!(
                "invalid embedding dimension for pattern {}: expected {}, got {}",
                self.id,
                dimension,
                self.embedding.len()
            )));
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(PatternStoreError::Validation(format!(
                "embedding for pattern {} contains non-finite values",
                self.id
            )));
        }
        if let Some(score) = self.score() {
            validate_score(score)?;
        }
        Ok(())
    }
}

pub fn validate_score(score: f64) -> Result<(), PatternStoreError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(PatternStoreError::Validation(format!(
            "effectiveness score must be within [0, 1], got {}",
            score
        )));
    }
    Ok(())
}

pub fn validate_min_similarity(min_similarity: f64) -> Result<(), PatternStoreError> {
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(PatternStoreError::Validation(format!(
            "similarity threshold must be within [0, 1], got {}",
            min_similarity
        )));
    }
    Ok(())
}

/// A search hit, ranked 1..N in result order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPattern {
    pub pattern: ActionPattern,
    pub similarity: f64,
    pub rank: usize,
}
