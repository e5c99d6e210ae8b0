// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cached_embedding_service;
pub mod retry;
pub mod store_factory;

pub use cached_embedding_service::CachedEmbeddingService;
pub use retry::{with_backoff, RetryPolicy};
pub use store_factory::{build_vector_store, VectorStore};
