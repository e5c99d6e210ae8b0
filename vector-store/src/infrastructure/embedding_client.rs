// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local Embedding Generator
//!
//! Deterministic embeddings without an external model service.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `EmbeddingGenerator` with signed feature hashing
//!
//! Each word token and each character trigram is hashed (SHA-256) into one
//! of `dimension` buckets with a pseudo-random sign; the result is normalized
//! to unit length. Texts sharing vocabulary land close together, which is all
//! pattern matching on alert and action names needs. Empty input maps to a
//! fixed unit vector.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::domain::embedding::{
    canonical_action_input, canonical_context_input, normalize, EmbeddingError, EmbeddingGenerator,
};
use crate::domain::pattern::Attributes;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.35;
const EMPTY_INPUT_TOKEN: &str = "\u{0}empty";

pub struct LocalEmbeddingGenerator {
    dimension: usize,
}

impl LocalEmbeddingGenerator {
    /// 384 matches all-MiniLM-L6-v2, the default remote model dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            self.accumulate(&mut vector, EMPTY_INPUT_TOKEN, WORD_WEIGHT);
            normalize(&mut vector);
            return vector;
        }

        for word in &words {
            self.accumulate(&mut vector, word, WORD_WEIGHT);
            let padded: Vec<char> = format!("#{}#", word).chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.accumulate(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for LocalEmbeddingGenerator {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingGenerator for LocalEmbeddingGenerator {
    async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }

    async fn generate_action_embedding(
        &self,
        action_type: &str,
        parameters: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(&canonical_action_input(action_type, parameters)))
    }

    async fn generate_context_embedding(
        &self,
        labels: &HashMap<String, String>,
        metadata: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(&canonical_context_input(labels, metadata)))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn generator_identity(&self) -> String {
        format!("local:hashed:{}", self.dimension)
    }
}
