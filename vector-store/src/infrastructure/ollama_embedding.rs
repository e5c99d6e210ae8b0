// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama Embedding Adapter
//
// Anti-Corruption Layer for an Ollama-hosted sentence embedding model
// (e.g. all-minilm, nomic-embed-text). Returned vectors are checked against
// the configured dimension and re-normalized. Ollama answers blank prompts
// with an empty vector, so blank input maps to a fixed unit vector locally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::embedding::{
    canonical_action_input, canonical_context_input, normalize, EmbeddingError, EmbeddingGenerator,
};
use crate::domain::pattern::Attributes;

pub struct OllamaEmbeddingGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbeddingGenerator {
    pub fn new(endpoint: String, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            dimension,
        }
    }

    /// Equal-weight unit vector used for input with no content.
    fn blank_input_embedding(&self) -> Vec<f32> {
        let component = 1.0 / (self.dimension as f32).sqrt();
        vec![component; self.dimension]
    }

    async fn embed(&self, prompt: &str) -> Result<Vec<f32>, EmbeddingError> {
        if prompt.trim().is_empty() {
            return Ok(self.blank_input_embedding());
        }

        let url = format!("{}/api/embeddings", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!("HTTP {}: {}", status, error_text)));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("Failed to parse response: {}", e)))?;

        if body.embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: body.embedding.len(),
            });
        }

        let mut embedding = body.embedding;
        normalize(&mut embedding);
        Ok(embedding)
    }

    pub async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EmbeddingError::Network(format!("HTTP {}", response.status())))
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for OllamaEmbeddingGenerator {
    async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    async fn generate_action_embedding(
        &self,
        action_type: &str,
        parameters: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(&canonical_action_input(action_type, parameters)).await
    }

    async fn generate_context_embedding(
        &self,
        labels: &HashMap<String, String>,
        metadata: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(&canonical_context_input(labels, metadata)).await
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn generator_identity(&self) -> String {
        format!("ollama:{}:{}", self.model, self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_is_normalized() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding": [3.0, 4.0, 0.0]}"#)
            .create_async()
            .await;

        let generator = OllamaEmbeddingGenerator::new(server.url(), "all-minilm".to_string(), 3);
        let embedding = generator.generate_text_embedding("restart_pod").await.unwrap();

        mock.assert_async().await;
        assert!((embedding[0] - 0.6).abs() < 1e-6);
        assert!((embedding[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(r#"{"embedding": [1.0, 0.0]}"#)
            .create_async()
            .await;

        let generator = OllamaEmbeddingGenerator::new(server.url(), "all-minilm".to_string(), 384);
        let err = generator.generate_text_embedding("restart_pod").await.unwrap_err();
        assert_eq!(err, EmbeddingError::DimensionMismatch { expected: 384, actual: 2 });
    }

    #[tokio::test]
    async fn test_blank_text_embeds_without_calling_the_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(r#"{"embedding": []}"#)
            .expect(0)
            .create_async()
            .await;

        let generator = OllamaEmbeddingGenerator::new(server.url(), "all-minilm".to_string(), 4);
        for text in ["", "   ", "\n\t"] {
            let embedding = generator.generate_text_embedding(text).await.unwrap();
            assert_eq!(embedding.len(), 4);
            let norm: f32 = embedding.iter().map(|x| x * x).sum();
            assert!((norm - 1.0).abs() < 1e-6);
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/embeddings")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let generator = OllamaEmbeddingGenerator::new(server.url(), "all-minilm".to_string(), 3);
        let err = generator.generate_text_embedding("x").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Provider(_)));
    }
}
