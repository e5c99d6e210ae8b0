// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Embedding Generation Contract
//!
//! [`EmbeddingGenerator`] turns text, action parameters, or alert context into
//! a fixed-length vector. Every implementation returns near unit-normalized
//! vectors so cosine similarity and dot product agree.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Generator trait, errors and the vector math shared by stores

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::domain::pattern::Attributes;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Cannot combine an empty set of embeddings")]
    EmptyInput,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Empty text is valid and yields a degenerate but well-formed vector.
    async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn generate_action_embedding(
        &self,
        action_type: &str,
        parameters: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError>;

    async fn generate_context_embedding(
        &self,
        labels: &HashMap<String, String>,
        metadata: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError>;

    /// Element-wise mean of the inputs, re-normalized. Zero inputs is an error.
    fn combine_embeddings(&self, embeddings: &[Vec<f32>]) -> Result<Vec<f32>, EmbeddingError> {
        average_embeddings(embeddings, self.embedding_dimension())
    }

    fn embedding_dimension(&self) -> usize;

    /// Names the vector space this generator produces (provider, model and
    /// dimension). Vectors from generators with different identities are not
    /// interchangeable, so caches scope their keys by it.
    fn generator_identity(&self) -> String {
        format!("dim{}", self.embedding_dimension())
    }
}

/// Deterministic text form of an action, with parameters in key order.
pub fn canonical_action_input(action_type: &str, parameters: &Attributes) -> String {
    let ordered: BTreeMap<&String, &serde_json::Value> = parameters.iter().collect();
    let mut out = format!("action {}", action_type);
    for (key, value) in ordered {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        out.push_str(&render_value(value));
    }
    out
}

/// Deterministic text form of alert labels plus metadata, both in key order.
pub fn canonical_context_input(labels: &HashMap<String, String>, metadata: &Attributes) -> String {
    let labels: BTreeMap<&String, &String> = labels.iter().collect();
    let metadata: BTreeMap<&String, &serde_json::Value> = metadata.iter().collect();
    let mut out = String::from("context");
    for (key, value) in labels {
        out.push_str(&format!(" {}={}", key, value));
    }
    for (key, value) in metadata {
        out.push_str(&format!(" {}={}", key, render_value(value)));
    }
    out
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        // serde_json object maps are key-ordered, so nested values render stably
        other => other.to_string(),
    }
}

/// Scales `vector` to unit length in place. A zero vector is left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn average_embeddings(embeddings: &[Vec<f32>], dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
    if embeddings.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    let mut combined = vec![0.0f32; dimension];
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
        for (acc, v) in combined.iter_mut().zip(embedding) {
            *acc += v;
        }
    }
    let count = embeddings.len() as f32;
    for v in combined.iter_mut() {
        *v /= count;
    }
    normalize(&mut combined);
    Ok(combined)
}

/// Cosine similarity clamped to [0, 1]. Opposed or degenerate vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}
