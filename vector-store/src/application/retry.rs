// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded retry with exponential backoff for pattern store calls.
//!
//! Only errors that report [`PatternStoreError::is_retryable`] are retried:
//! unavailable, contention, timeout, and embedding provider transport
//! failures. Validation and not-found errors return on the first attempt.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::domain::repository::PatternStoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, PatternStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PatternStoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Pattern store call failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::domain::embedding::{EmbeddingError, EmbeddingGenerator};
    use crate::domain::pattern::{ActionPattern, Attributes};
    use crate::domain::repository::PatternStore;
    use crate::infrastructure::repositories::InMemoryPatternStore;
    use crate::infrastructure::LocalEmbeddingGenerator;

    /// Fails with a transport error for the first `failures` text embeddings.
    struct FlakyGenerator {
        inner: LocalEmbeddingGenerator,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingGenerator for FlakyGenerator {
        async fn generate_text_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(EmbeddingError::Network("connection reset by peer".to_string()));
            }
            self.inner.generate_text_embedding(text).await
        }

        async fn generate_action_embedding(
            &self,
            action_type: &str,
            parameters: &Attributes,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.inner.generate_action_embedding(action_type, parameters).await
        }

        async fn generate_context_embedding(
            &self,
            labels: &HashMap<String, String>,
            metadata: &Attributes,
        ) -> Result<Vec<f32>, EmbeddingError> {
            self.inner.generate_context_embedding(labels, metadata).await
        }

        fn embedding_dimension(&self) -> usize {
            self.inner.embedding_dimension()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_contention_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff(&RetryPolicy::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PatternStoreError::Contention("deadlock detected".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff(&RetryPolicy::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PatternStoreError::Unavailable("connection refused".to_string()))
        })
        .await;

        assert!(matches!(result, Err(PatternStoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff(&RetryPolicy::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PatternStoreError::NotFound("p-1".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_semantic_search_retries_embedding_network_failures() {
        let generator = Arc::new(FlakyGenerator {
            inner: LocalEmbeddingGenerator::new(64),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let store = InMemoryPatternStore::new(generator.clone());
        let pattern = ActionPattern::new("p-1", "restart_pod", "CrashLoopBackOff");
        let embedding = generator.inner.generate_text_embedding(&pattern.embedding_text()).await.unwrap();
        store.store_action_pattern(&pattern.with_embedding(embedding)).await.unwrap();

        let store = &store;
        let results = with_backoff(&RetryPolicy::default(), move || async move {
            store.search_by_semantics("restart_pod CrashLoopBackOff", 5).await
        })
        .await
        .unwrap();

        assert_eq!(results[0].pattern.id, "p-1");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }
}
