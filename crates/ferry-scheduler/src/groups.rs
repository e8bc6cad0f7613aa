// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker groups: per-session chunks of pairs.
//!
//! Groups are derived state. They are recomputed from the store's
//! pair -> session assignments after every ownership change, keeping
//! existing membership where possible so running workers are not shuffled.

use std::collections::HashSet;
use std::fmt;

use ferry_core::PairId;
use serde::Serialize;

/// A bounded set of pairs served together by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerGroup {
    pub session: String,
    pub index: u32,
    pub pair_ids: Vec<PairId>,
}

impl WorkerGroup {
    pub fn len(&self) -> usize {
        self.pair_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_ids.is_empty()
    }
}

impl fmt::Display for WorkerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session, self.index)
    }
}

/// Largest group a session may have: never above its capacity.
pub fn group_limit(capacity: u32, max_pairs_per_group: usize) -> usize {
    (capacity as usize).min(max_pairs_per_group).max(1)
}

/// Total pairs across a session's groups.
pub fn assigned(groups: &[WorkerGroup]) -> usize {
    groups.iter().map(WorkerGroup::len).sum()
}

/// Recompute `session`'s groups so they hold exactly `pairs`.
///
/// Pairs keep their current group when they can. Departed pairs are
/// dropped, empty groups disappear, and newcomers fill existing groups
/// before new ones are opened.
pub fn regroup(
    session: &str,
    existing: &[WorkerGroup],
    pairs: &[PairId],
    limit: usize,
) -> Vec<WorkerGroup> {
    let wanted: HashSet<PairId> = pairs.iter().copied().collect();
    let mut placed = HashSet::with_capacity(pairs.len());
    let mut groups = Vec::with_capacity(existing.len());

    for group in existing {
        let members: Vec<PairId> = group
            .pair_ids
            .iter()
            .copied()
            .filter(|id| wanted.contains(id))
            .take(limit)
            .collect();
        if members.is_empty() {
            continue;
        }
        placed.extend(members.iter().copied());
        groups.push(WorkerGroup {
            session: session.to_string(),
            index: group.index,
            pair_ids: members,
        });
    }

    let mut next_index = groups.iter().map(|g| g.index + 1).max().unwrap_or(0);
    let newcomers: Vec<PairId> = pairs
        .iter()
        .copied()
        .filter(|id| !placed.contains(id))
        .collect();
    for id in newcomers {
        if !placed.insert(id) {
            continue;
        }
        match groups.iter_mut().find(|g| g.len() < limit) {
            Some(group) => group.pair_ids.push(id),
            None => {
                groups.push(WorkerGroup {
                    session: session.to_string(),
                    index: next_index,
                    pair_ids: vec![id],
                });
                next_index += 1;
            }
        }
    }

    groups
}

/// Whether a session's groups are fragmented enough to be repacked.
///
/// True when more groups exist than the pair count needs and their
/// average fill is below `threshold`.
pub fn needs_consolidation(groups: &[WorkerGroup], limit: usize, threshold: f64) -> bool {
    if groups.len() < 2 {
        return false;
    }
    let total = assigned(groups);
    let needed = total.div_ceil(limit).max(1);
    let fill = total as f64 / (groups.len() * limit) as f64;
    groups.len() > needed && fill < threshold
}

/// Repack groups densely, preserving pair order.
pub fn consolidate(session: &str, groups: &[WorkerGroup], limit: usize) -> Vec<WorkerGroup> {
    let pairs: Vec<PairId> = groups.iter().flat_map(|g| g.pair_ids.iter().copied()).collect();
    pairs
        .chunks(limit)
        .enumerate()
        .map(|(index, chunk)| WorkerGroup {
            session: session.to_string(),
            index: index as u32,
            pair_ids: chunk.to_vec(),
        })
        .collect()
}
