// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Vector Store Configuration
//
// Selects the pattern store backend, the embedding cache backend, the embedding
// provider and dimension, cache TTL and search defaults. Loaded from YAML by the
// platform's configuration loader and validated before it reaches the factory.
//
// Example:
//
//   backend:
//     type: postgres
//     connection_string: postgres://aegis@db/patterns
//   embedding:
//     dimension: 384
//   cache:
//     ttl: 1h
//     timeout: 500ms
//     backend:
//       type: memory
//   operation_timeout: 5s

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Pattern store backend
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Upper bound on every store and cache call
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    InMemory,
    Postgres(PostgresConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub connection_string: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// HNSW index build and query parameters
    #[serde(default)]
    pub index: VectorIndexConfig,
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            max_connections: default_max_connections(),
            acquire_timeout: default_acquire_timeout(),
            index: VectorIndexConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    #[serde(default = "default_hnsw_m")]
    pub m: u32,
    #[serde(default = "default_hnsw_ef_construction")]
    pub ef_construction: u32,
    #[serde(default = "default_hnsw_ef_search")]
    pub ef_search: u32,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            m: default_hnsw_m(),
            ef_construction: default_hnsw_ef_construction(),
            ef_search: default_hnsw_ef_search(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub provider: EmbeddingProvider,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            provider: EmbeddingProvider::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic hashed-token embeddings, no external service
    #[default]
    Local,
    Ollama { endpoint: String, model: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Zero disables expiry
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Bound on each cache read or write before falling back to the generator
    #[serde(default = "default_cache_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Local cache only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,

    /// Local cache only; reclaims memory held by expired entries
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::default(),
            ttl: default_cache_ttl(),
            timeout: default_cache_timeout(),
            max_entries: None,
            sweep_interval: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Postgres(PostgresConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Similarity floor for semantic (text) search
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_min_similarity: default_min_similarity(),
        }
    }
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_hnsw_m() -> u32 {
    16
}

fn default_hnsw_ef_construction() -> u32 {
    64
}

fn default_hnsw_ef_search() -> u32 {
    100
}

fn default_dimension() -> usize {
    384
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_cache_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_min_similarity() -> f64 {
    0.3
}

impl VectorStoreConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be greater than zero".to_string()));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Invalid("operation_timeout must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.search.default_min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "search.default_min_similarity must be within [0, 1], got {}",
                self.search.default_min_similarity
            )));
        }
        if let StoreBackend::Postgres(pg) = &self.backend {
            validate_postgres("backend", pg)?;
        }
        if let CacheBackend::Postgres(pg) = &self.cache.backend {
            validate_postgres("cache.backend", pg)?;
        }
        if self.cache.timeout.is_zero() {
            return Err(ConfigError::Invalid("cache.timeout must be greater than zero".to_string()));
        }
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::Invalid("cache.max_entries must be greater than zero".to_string()));
        }
        if let EmbeddingProvider::Ollama { endpoint, model } = &self.embedding.provider {
            if endpoint.trim().is_empty() || model.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "embedding.provider requires both endpoint and model for ollama".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_postgres(field: &str, pg: &PostgresConfig) -> Result<(), ConfigError> {
    if pg.connection_string.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{}.connection_string must not be empty", field)));
    }
    if pg.max_connections == 0 {
        return Err(ConfigError::Invalid(format!("{}.max_connections must be greater than zero", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VectorStoreConfig::default();
        config.validate().unwrap();
        assert!(matches!(config.backend, StoreBackend::InMemory));
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
backend:
  type: postgres
  connection_string: postgres://aegis@localhost/patterns
  max_connections: 8
embedding:
  dimension: 768
  provider:
    type: ollama
    endpoint: http://localhost:11434
    model: nomic-embed-text
cache:
  ttl: 2s
  max_entries: 1000
  backend:
    type: memory
search:
  default_min_similarity: 0.5
operation_timeout: 3s
"#;
        let config = VectorStoreConfig::from_yaml_str(yaml).unwrap();
        match &config.backend {
            StoreBackend::Postgres(pg) => {
                assert_eq!(pg.max_connections, 8);
                assert_eq!(pg.index.m, 16);
            }
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.cache.ttl, Duration::from_secs(2));
        assert_eq!(config.cache.timeout, Duration::from_millis(500));
        assert_eq!(config.cache.max_entries, Some(1000));
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
        assert_eq!(config.search.default_min_similarity, 0.5);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = VectorStoreConfig::default();
        config.embedding.dimension = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = VectorStoreConfig::default();
        config.backend = StoreBackend::Postgres(PostgresConfig::new("  "));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = VectorStoreConfig::default();
        config.search.default_min_similarity = 1.5;
        assert!(config.validate().is_err());

        assert!(VectorStoreConfig::from_yaml_str("operation_timeout: 0s").is_err());
        assert!(VectorStoreConfig::from_yaml_str("cache:\n  timeout: 0s").is_err());
    }
}
