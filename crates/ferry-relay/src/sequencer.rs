// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-key event sequencing.
//!
//! Events for the same key run one at a time. Events tagged with a
//! sequence number run in sequence order: a replay of an already-applied
//! number is dropped, and a gap is waited on for at most the reorder
//! timeout before the sequencer skips ahead. Sequence numbers start at 0
//! for every key.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of running one event through the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequenced<T> {
    Ran(T),
    /// The sequence number was already applied; the event was not run.
    Stale,
}

struct GateState {
    next: u64,
    last_used: Instant,
}

struct Gate {
    state: Mutex<GateState>,
    advanced: Notify,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                next: 0,
                last_used: Instant::now(),
            }),
            advanced: Notify::new(),
        }
    }
}

/// Moves a gate past `seq` when dropped, even if the event was cancelled.
struct Advance<'a> {
    state: MutexGuard<'a, GateState>,
    gate: &'a Gate,
    seq: u64,
}

impl Drop for Advance<'_> {
    fn drop(&mut self) {
        self.state.next = self.state.next.max(self.seq + 1);
        self.state.last_used = Instant::now();
        self.gate.advanced.notify_waiters();
    }
}

/// Serializes work per key and orders sequenced work within a key.
pub struct Sequencer<K> {
    gates: DashMap<K, Arc<Gate>>,
    reorder_timeout: Duration,
}

impl<K> Sequencer<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(reorder_timeout: Duration) -> Self {
        Self {
            gates: DashMap::new(),
            reorder_timeout,
        }
    }

    fn gate(&self, key: &K) -> Arc<Gate> {
        self.gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Gate::new()))
            .clone()
    }

    /// Run `work` for `key`, honouring `seq` if given.
    ///
    /// `work` is not polled at all when the event turns out to be stale.
    pub async fn run<F, T>(&self, key: &K, seq: Option<u64>, work: F) -> Sequenced<T>
    where
        F: Future<Output = T>,
    {
        let gate = self.gate(key);
        let Some(seq) = seq else {
            let mut state = gate.state.lock().await;
            let out = work.await;
            state.last_used = Instant::now();
            return Sequenced::Ran(out);
        };

        let deadline = Instant::now() + self.reorder_timeout;
        loop {
            let notified = gate.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = gate.state.lock().await;
            if seq < state.next {
                debug!(?key, seq, next = state.next, "dropping stale event");
                return Sequenced::Stale;
            }
            if seq == state.next || Instant::now() >= deadline {
                if seq > state.next {
                    warn!(
                        ?key,
                        seq,
                        missing_from = state.next,
                        "predecessor never arrived, skipping ahead"
                    );
                }
                let _advance = Advance {
                    state,
                    gate: &gate,
                    seq,
                };
                return Sequenced::Ran(work.await);
            }
            drop(state);

            // Woken by an advance, or by the deadline; either way re-check.
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    /// Drop gates that nobody holds and that have been idle for `idle`.
    /// Returns how many were removed.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let before = self.gates.len();
        self.gates.retain(|_, gate| {
            if Arc::strong_count(gate) > 1 {
                return true;
            }
            match gate.state.try_lock() {
                Ok(state) => state.last_used.elapsed() < idle,
                Err(_) => true,
            }
        });
        before - self.gates.len()
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
