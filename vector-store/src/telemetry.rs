// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Logging setup and metric helpers.
//!
//! The library only emits `tracing` events and `metrics` samples; installing a
//! subscriber or a metrics exporter is left to the host process.

use anyhow::{Context, Result};
use std::time::Instant;

pub const CACHE_HITS: &str = "embedding_cache_hits_total";
pub const CACHE_MISSES: &str = "embedding_cache_misses_total";
pub const CACHE_ERRORS: &str = "embedding_cache_errors_total";
pub const STORE_OPERATIONS: &str = "pattern_store_operations_total";
pub const STORE_SEARCH_SECONDS: &str = "pattern_store_search_seconds";

/// Initialize tracing subscriber for logging. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    // A host that already installed a subscriber keeps it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    Ok(())
}

pub fn record_store_operation(backend: &'static str, op: &'static str) {
    metrics::counter!(STORE_OPERATIONS, "backend" => backend, "op" => op).increment(1);
}

pub fn record_cache_error(operation: &'static str) {
    metrics::counter!(CACHE_ERRORS, "op" => operation).increment(1);
}

/// Records search latency into `pattern_store_search_seconds` when dropped.
pub struct SearchTimer {
    backend: &'static str,
    started: Instant,
}

impl SearchTimer {
    pub fn start(backend: &'static str) -> Self {
        Self {
            backend,
            started: Instant::now(),
        }
    }
}

impl Drop for SearchTimer {
    fn drop(&mut self) {
        metrics::histogram!(STORE_SEARCH_SECONDS, "backend" => self.backend)
            .record(self.started.elapsed().as_secs_f64());
    }
}
