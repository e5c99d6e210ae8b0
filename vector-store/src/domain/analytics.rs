// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern analytics, aggregated on demand from the current store contents.
//! Nothing here is maintained incrementally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::pattern::ActionPattern;

pub const TOP_PERFORMING_LIMIT: usize = 10;
pub const RECENT_PATTERNS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalytics {
    pub total_patterns: usize,
    pub patterns_by_action_type: HashMap<String, usize>,
    pub patterns_by_severity: HashMap<String, usize>,
    /// Mean score over assessed patterns; 0 when none are assessed
    pub average_effectiveness: f64,
    pub top_performing_patterns: Vec<ActionPattern>,
    pub recent_patterns: Vec<ActionPattern>,
    pub generated_at: DateTime<Utc>,
}

impl PatternAnalytics {
    pub fn from_patterns(patterns: Vec<ActionPattern>) -> Self {
        let mut by_action_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut score_sum = 0.0;
        let mut scored = 0usize;

        for pattern in &patterns {
            *by_action_type.entry(pattern.action_type.clone()).or_default() += 1;
            *by_severity.entry(pattern.alert_severity.clone()).or_default() += 1;
            if let Some(score) = pattern.score() {
                score_sum += score;
                scored += 1;
            }
        }

        let average_effectiveness = if scored == 0 { 0.0 } else { score_sum / scored as f64 };

        let mut top: Vec<&ActionPattern> = patterns.iter().filter(|p| p.score().is_some()).collect();
        top.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let top_performing_patterns = top.into_iter().take(TOP_PERFORMING_LIMIT).cloned().collect();

        let mut recent: Vec<&ActionPattern> = patterns.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let recent_patterns = recent.into_iter().take(RECENT_PATTERNS_LIMIT).cloned().collect();

        Self {
            total_patterns: patterns.len(),
            patterns_by_action_type: by_action_type,
            patterns_by_severity: by_severity,
            average_effectiveness,
            top_performing_patterns,
            recent_patterns,
            generated_at: Utc::now(),
        }
    }
}
