// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod embedding_client;
pub mod ollama_embedding;
pub mod cache;
pub mod repositories;

pub use embedding_client::LocalEmbeddingGenerator;
pub use ollama_embedding::OllamaEmbeddingGenerator;
