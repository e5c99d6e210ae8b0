// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod pattern;
pub mod embedding;
pub mod cache;
pub mod repository;
pub mod analytics;
pub mod config;

pub use pattern::{ActionPattern, Attributes, EffectivenessData, SimilarPattern};
pub use embedding::{EmbeddingError, EmbeddingGenerator};
pub use cache::{CacheError, CacheStats, EmbeddingCache};
pub use repository::{PatternStore, PatternStoreError};
pub use analytics::PatternAnalytics;
pub use config::{ConfigError, VectorStoreConfig};
