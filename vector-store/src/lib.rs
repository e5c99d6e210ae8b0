// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remediation Vector Store
//!
//! Embedding-indexed storage for remediation action patterns: embedding
//! generation with a TTL cache in front of it, similarity and semantic search
//! over stored patterns, and aggregate analytics.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Pattern memory for automated incident remediation

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod telemetry;

pub use domain::*;
pub use application::{build_vector_store, CachedEmbeddingService, VectorStore};
