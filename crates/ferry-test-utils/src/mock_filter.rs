// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filter engine with keyword blocking and per-pair overrides.

use std::collections::HashMap;
use std::sync::Mutex;

use ferry_core::{Content, FilterDecision, FilterEngine, PairId};

/// Blocks content containing any configured keyword, otherwise returns the
/// pair's override decision, otherwise allows.
#[derive(Default)]
pub struct StaticFilter {
    blocked_words: Mutex<Vec<String>>,
    overrides: Mutex<HashMap<PairId, FilterDecision>>,
}

impl StaticFilter {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn block_containing(&self, word: &str) {
        self.blocked_words
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(word.to_lowercase());
    }

    pub fn set_decision(&self, pair_id: PairId, decision: FilterDecision) {
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pair_id, decision);
    }
}

impl FilterEngine for StaticFilter {
    fn decide(&self, pair_id: PairId, content: &Content) -> FilterDecision {
        let text = content.text.to_lowercase();
        let blocked = self
            .blocked_words
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|word| text.contains(word.as_str()))
            .cloned();
        if let Some(word) = blocked {
            return FilterDecision::Block {
                reason: format!("contains `{word}`"),
            };
        }
        self.overrides
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pair_id)
            .cloned()
            .unwrap_or(FilterDecision::Allow)
    }
}
