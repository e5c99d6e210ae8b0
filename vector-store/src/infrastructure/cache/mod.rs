// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedding cache implementations: a process-local map and a shared table.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryEmbeddingCache;
pub use postgres::PostgresEmbeddingCache;
