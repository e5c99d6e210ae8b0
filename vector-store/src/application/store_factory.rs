// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Factory - Application Layer
//!
//! Builds the generator, cache and pattern store from a validated
//! [`VectorStoreConfig`]. Every call returns fresh instances; nothing is held
//! in process-wide state.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the vector store

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::cached_embedding_service::CachedEmbeddingService;
use crate::domain::cache::EmbeddingCache;
use crate::domain::config::{CacheBackend, CacheConfig, EmbeddingConfig, EmbeddingProvider, StoreBackend, VectorStoreConfig};
use crate::domain::embedding::EmbeddingGenerator;
use crate::domain::repository::PatternStore;
use crate::infrastructure::cache::{InMemoryEmbeddingCache, PostgresEmbeddingCache};
use crate::infrastructure::db::Database;
use crate::infrastructure::embedding_client::LocalEmbeddingGenerator;
use crate::infrastructure::ollama_embedding::OllamaEmbeddingGenerator;
use crate::infrastructure::repositories::{InMemoryPatternStore, PostgresPatternStore};

/// Everything a caller needs, wired together.
pub struct VectorStore {
    /// Generator used by the store; the cached service when a cache is available
    pub embeddings: Arc<dyn EmbeddingGenerator>,
    /// `None` when running uncached
    pub cached_embeddings: Option<Arc<CachedEmbeddingService>>,
    pub store: Arc<dyn PatternStore>,
}

/// Creates an EmbeddingGenerator implementation based on the configured provider
pub fn create_embedding_generator(config: &EmbeddingConfig) -> Arc<dyn EmbeddingGenerator> {
    match &config.provider {
        EmbeddingProvider::Local => Arc::new(LocalEmbeddingGenerator::new(config.dimension)),
        EmbeddingProvider::Ollama { endpoint, model } => Arc::new(OllamaEmbeddingGenerator::new(
            endpoint.clone(),
            model.clone(),
            config.dimension,
        )),
    }
}

/// Creates the configured cache. An unreachable shared cache degrades to
/// running uncached instead of failing startup. Cache calls are bounded by
/// `config.timeout`, not the store's `operation_timeout`.
pub async fn create_embedding_cache(config: &CacheConfig) -> Option<Arc<dyn EmbeddingCache>> {
    match &config.backend {
        CacheBackend::Memory => {
            let cache = InMemoryEmbeddingCache::with_capacity(config.max_entries);
            if let Some(interval) = config.sweep_interval {
                cache.spawn_sweeper(interval);
            }
            Some(Arc::new(cache))
        }
        CacheBackend::Postgres(pg) => match PostgresEmbeddingCache::connect(pg, config.timeout).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!("Shared embedding cache unavailable, continuing without cache: {}", e);
                crate::telemetry::record_cache_error("connect");
                None
            }
        },
    }
}

/// Creates a PatternStore implementation based on the configured backend
pub async fn create_pattern_store(
    config: &VectorStoreConfig,
    generator: Arc<dyn EmbeddingGenerator>,
) -> Result<Arc<dyn PatternStore>> {
    let min_similarity = config.search.default_min_similarity;
    match &config.backend {
        StoreBackend::InMemory => Ok(Arc::new(
            InMemoryPatternStore::new(generator).with_default_min_similarity(min_similarity),
        )),
        StoreBackend::Postgres(pg) => {
            let db = Database::connect(pg, config.operation_timeout)
                .await
                .context("Failed to connect to pattern store database")?;
            let store = PostgresPatternStore::new(db, generator, pg.index.clone(), config.operation_timeout)
                .with_default_min_similarity(min_similarity);
            store
                .initialize()
                .await
                .context("Failed to initialize action pattern schema")?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn build_vector_store(config: &VectorStoreConfig) -> Result<VectorStore> {
    config.validate().context("Invalid vector store configuration")?;

    let generator = create_embedding_generator(&config.embedding);
    let cached_embeddings = create_embedding_cache(&config.cache)
        .await
        .map(|cache| {
            let service = CachedEmbeddingService::new(generator.clone(), cache, config.cache.ttl)
                .with_cache_timeout(config.cache.timeout);
            service.set_cache_enabled(config.cache.enabled);
            Arc::new(service)
        });

    let embeddings: Arc<dyn EmbeddingGenerator> = match &cached_embeddings {
        Some(service) => service.clone(),
        None => generator,
    };
    let store = create_pattern_store(config, embeddings.clone()).await?;

    info!(
        backend = store.backend_name(),
        dimension = embeddings.embedding_dimension(),
        cached = cached_embeddings.is_some(),
        "Vector store ready"
    );

    Ok(VectorStore {
        embeddings,
        cached_embeddings,
        store,
    })
}
