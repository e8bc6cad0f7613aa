// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content filter trait.

use crate::types::{Content, FilterDecision, PairId};

/// Pure `(pair, content) -> decision` function run before formatting.
pub trait FilterEngine: Send + Sync {
    fn decide(&self, pair_id: PairId, content: &Content) -> FilterDecision;
}
