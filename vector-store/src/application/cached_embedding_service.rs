// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cached Embedding Service
//!
//! Wraps any [`EmbeddingGenerator`] with any [`EmbeddingCache`] and implements
//! the generator contract itself, so stores and callers cannot tell whether
//! they hold the raw generator or the cached one.
//!
//! Cache failures never fail an embedding call. A failed or slow read falls
//! through to the generator; a failed or slow write is logged and the fresh
//! vector is returned. Both are counted in `embedding_cache_errors_total`.
//! Cache calls are bounded by their own `cache_timeout`, kept short so a
//! partitioned cache costs little on the critical path.
//!
//! Keys are scoped by [`EmbeddingGenerator::generator_identity`], and a cached
//! vector whose length differs from the generator's dimension is a miss.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Read-through embedding cache decorator

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::cache::{cache_key, CacheError, CacheKeyKind, CacheStats, EmbeddingCache};
use crate::domain::embedding::{canonical_action_input, canonical_context_input, EmbeddingError, EmbeddingGenerator};
use crate::domain::pattern::Attributes;
use crate::telemetry;

/// Default bound on a single cache read or write.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct CachedEmbeddingService {
    generator: Arc<dyn EmbeddingGenerator>,
    cache: Arc<dyn EmbeddingCache>,
    ttl: Duration,
    cache_timeout: Duration,
    enabled: AtomicBool,
}

impl CachedEmbeddingService {
    pub fn new(generator: Arc<dyn EmbeddingGenerator>, cache: Arc<dyn EmbeddingCache>, ttl: Duration) -> Self {
        Self {
            generator,
            cache,
            ttl,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    /// While disabled, calls go straight to the generator: no cache reads,
    /// no writes, no statistics changes.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(enabled, "Embedding cache toggled");
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cache_timeout
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, CacheError> {
        self.cache.stats().await
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    async fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let result = tokio::time::timeout(self.cache_timeout, self.cache.get(key))
            .await
            .unwrap_or(Err(CacheError::Timeout(self.cache_timeout)));
        match result {
            Ok(Some(embedding)) if embedding.len() != self.generator.embedding_dimension() => {
                warn!(
                    expected = self.generator.embedding_dimension(),
                    actual = embedding.len(),
                    "Cached embedding has the wrong dimension, regenerating"
                );
                telemetry::record_cache_error("dimension");
                None
            }
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "Embedding cache read failed, generating directly");
                telemetry::record_cache_error("get");
                None
            }
        }
    }

    async fn store(&self, key: &str, embedding: &[f32]) {
        let result = tokio::time::timeout(self.cache_timeout, self.cache.set(key, embedding, self.ttl))
            .await
            .unwrap_or(Err(CacheError::Timeout(self.cache_timeout)));
        if let Err(e) = result {
            warn!(error = %e, "Embedding cache write failed");
            telemetry::record_cache_error("set");
        }
    }

    async fn read_through<F>(&self, kind: CacheKeyKind, canonical_input: &str, generate: F) -> Result<Vec<f32>, EmbeddingError>
    where
        F: std::future::Future<Output = Result<Vec<f32>, EmbeddingError>> + Send,
    {
        if !self.is_cache_enabled() {
            return generate.await;
        }

        let key = cache_key(&self.generator.generator_identity(), kind, canonical_input);
        if let Some(embedding) = self.lookup(&key).await {
            return Ok(embedding);
        }

        let embedding = generate.await?;
        self.store(&key, &embedding).await;
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingGenerator for CachedEmbeddingService {
    async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.read_through(CacheKeyKind::Text, text, self.generator.generate_text_embedding(text))
            .await
    }

    async fn generate_action_embedding(
        &self,
        action_type: &str,
        parameters: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let input = canonical_action_input(action_type, parameters);
        self.read_through(
            CacheKeyKind::Action,
            &input,
            self.generator.generate_action_embedding(action_type, parameters),
        )
        .await
    }

    async fn generate_context_embedding(
        &self,
        labels: &HashMap<String, String>,
        metadata: &Attributes,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let input = canonical_context_input(labels, metadata);
        self.read_through(
            CacheKeyKind::Context,
            &input,
            self.generator.generate_context_embedding(labels, metadata),
        )
        .await
    }

    fn combine_embeddings(&self, embeddings: &[Vec<f32>]) -> Result<Vec<f32>, EmbeddingError> {
        self.generator.combine_embeddings(embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.generator.embedding_dimension()
    }

    fn generator_identity(&self) -> String {
        self.generator.generator_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryEmbeddingCache;
    use crate::infrastructure::embedding_client::LocalEmbeddingGenerator;
    use std::sync::atomic::AtomicUsize;

    /// Counts calls reaching the wrapped generator.
    struct CountingGenerator {
        inner: LocalEmbeddingGenerator,
        calls: AtomicUsize,
    }

    impl CountingGenerator {
        fn new() -> Self {
            Self {
                inner: LocalEmbeddingGenerator::new(32),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingGenerator for CountingGenerator {
        async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate_text_embedding(text).await
        }

        async fn generate_action_embedding(
            &self,
            action_type: &str,
            parameters: &Attributes,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate_action_embedding(action_type, parameters).await
        }

        async fn generate_context_embedding(
            &self,
            labels: &HashMap<String, String>,
            metadata: &Attributes,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate_context_embedding(labels, metadata).await
        }

        fn embedding_dimension(&self) -> usize {
            self.inner.embedding_dimension()
        }

        fn generator_identity(&self) -> String {
            self.inner.generator_identity()
        }
    }

    /// Reads and writes never complete, like a partitioned remote cache.
    struct HangingCache;

    #[async_trait]
    impl EmbeddingCache for HangingCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<f32>>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _embedding: &[f32], _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            std::future::pending().await
        }
        async fn clear(&self) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn stats(&self) -> Result<CacheStats, CacheError> {
            std::future::pending().await
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    /// Every operation reports the backend as unreachable.
    struct UnreachableCache;

    #[async_trait]
    impl EmbeddingCache for UnreachableCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<f32>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        async fn set(&self, _key: &str, _embedding: &[f32], _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    fn service(generator: Arc<CountingGenerator>, cache: Arc<dyn EmbeddingCache>) -> CachedEmbeddingService {
        CachedEmbeddingService::new(generator, cache, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(InMemoryEmbeddingCache::new()));

        let first = svc.generate_text_embedding("pod OOMKilled").await.unwrap();
        let second = svc.generate_text_embedding("pod OOMKilled").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generator.calls(), 1);
        let stats = svc.cache_stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses, stats.total_keys), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_action_key_ignores_parameter_order() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(InMemoryEmbeddingCache::new()));

        let mut a = Attributes::new();
        a.insert("replicas".to_string(), serde_json::json!(3));
        a.insert("namespace".to_string(), serde_json::json!("prod"));
        let mut b = Attributes::new();
        b.insert("namespace".to_string(), serde_json::json!("prod"));
        b.insert("replicas".to_string(), serde_json::json!(3));

        svc.generate_action_embedding("scale_deployment", &a).await.unwrap();
        svc.generate_action_embedding("scale_deployment", &b).await.unwrap();
        assert_eq!(generator.calls(), 1);

        // same text under a different kind is a different key
        svc.generate_text_embedding("scale_deployment").await.unwrap();
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_context_embeddings_are_cached() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(InMemoryEmbeddingCache::new()));
        let labels = HashMap::from([("alertname".to_string(), "HighMemoryUsage".to_string())]);

        svc.generate_context_embedding(&labels, &Attributes::new()).await.unwrap();
        svc.generate_context_embedding(&labels, &Attributes::new()).await.unwrap();
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_bypassed() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(InMemoryEmbeddingCache::new()));
        svc.set_cache_enabled(false);
        assert!(!svc.is_cache_enabled());

        svc.generate_text_embedding("disk pressure").await.unwrap();
        svc.generate_text_embedding("disk pressure").await.unwrap();

        assert_eq!(generator.calls(), 2);
        assert_eq!(svc.cache_stats().await.unwrap(), CacheStats::default());

        svc.set_cache_enabled(true);
        svc.generate_text_embedding("disk pressure").await.unwrap();
        assert_eq!(svc.cache_stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_unreachable_cache_falls_back_to_generator() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(UnreachableCache));

        let embedding = svc.generate_text_embedding("node not ready").await.unwrap();
        let direct = LocalEmbeddingGenerator::new(32)
            .generate_text_embedding("node not ready")
            .await
            .unwrap();

        assert_eq!(embedding, direct);
        assert_eq!(generator.calls(), 1);
        assert!(svc.cache_stats().await.is_err());
    }

    #[tokio::test]
    async fn test_pure_operations_delegate() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = service(generator.clone(), Arc::new(UnreachableCache));

        assert_eq!(svc.embedding_dimension(), 32);
        assert_eq!(svc.combine_embeddings(&[]), Err(EmbeddingError::EmptyInput));
        let v = svc.generate_text_embedding("x").await.unwrap();
        assert_eq!(svc.combine_embeddings(&[v.clone()]).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_generators_of_different_dimensions_share_a_cache_safely() {
        let cache: Arc<dyn EmbeddingCache> = Arc::new(InMemoryEmbeddingCache::new());
        let small = CachedEmbeddingService::new(
            Arc::new(LocalEmbeddingGenerator::new(64)),
            cache.clone(),
            Duration::from_secs(60),
        );
        let large = CachedEmbeddingService::new(
            Arc::new(LocalEmbeddingGenerator::new(128)),
            cache.clone(),
            Duration::from_secs(60),
        );

        assert_eq!(small.generate_text_embedding("HighMemoryUsage").await.unwrap().len(), 64);
        assert_eq!(large.generate_text_embedding("HighMemoryUsage").await.unwrap().len(), 128);
        assert_eq!(small.generate_text_embedding("HighMemoryUsage").await.unwrap().len(), 64);
        assert_eq!(cache.stats().await.unwrap().total_keys, 2);
    }

    #[tokio::test]
    async fn test_wrong_dimension_entry_is_regenerated() {
        let generator = Arc::new(CountingGenerator::new());
        let cache: Arc<dyn EmbeddingCache> = Arc::new(InMemoryEmbeddingCache::new());
        let key = cache_key(&generator.generator_identity(), CacheKeyKind::Text, "disk pressure");
        cache.set(&key, &[1.0, 0.0], Duration::ZERO).await.unwrap();

        let svc = service(generator.clone(), cache.clone());
        let embedding = svc.generate_text_embedding("disk pressure").await.unwrap();

        assert_eq!(embedding.len(), 32);
        assert_eq!(generator.calls(), 1);
        assert_eq!(cache.get(&key).await.unwrap().map(|v| v.len()), Some(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_cache_is_abandoned_after_cache_timeout() {
        let generator = Arc::new(CountingGenerator::new());
        let svc = CachedEmbeddingService::new(generator.clone(), Arc::new(HangingCache), Duration::from_secs(60))
            .with_cache_timeout(Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let embedding = svc.generate_text_embedding("node not ready").await.unwrap();

        assert_eq!(embedding.len(), 32);
        assert_eq!(generator.calls(), 1);
        // one bounded read plus one bounded write
        assert!(started.elapsed() <= Duration::from_millis(250));
    }
}
