// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod memory;
pub mod postgres_pattern;

pub use memory::InMemoryPatternStore;
pub use postgres_pattern::PostgresPatternStore;
