// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory credential and correlation store.
//!
//! `MemoryStore` mirrors the SQLite store's semantics (atomic ownership
//! changes, create-once correlation records) and lets tests force
//! compare-and-swap conflicts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ferry_core::{
    ChangeOutcome, CorrelationRecord, CorrelationStore, CredentialStore, FerryError,
    ForwardingPair, HealthState, Hop, InsertOutcome, MessageId, NewPair, PairId, PairStatus,
    SessionChange, SessionRecord,
};

#[derive(Default)]
struct State {
    sessions: Vec<SessionRecord>,
    pairs: BTreeMap<PairId, ForwardingPair>,
    correlations: HashMap<(PairId, MessageId), CorrelationRecord>,
    next_pair_id: i64,
}

/// An in-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    forced_conflicts: AtomicU32,
    change_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a session directly, bypassing the scheduler.
    pub fn seed_session(&self, name: &str, capacity: u32, priority: i32, health: HealthState) {
        self.state().sessions.push(SessionRecord {
            name: name.to_string(),
            capacity,
            priority,
            health,
            registered_at: Utc::now(),
            last_probed_at: None,
        });
    }

    /// Add a pair with a fixed id, optionally already owned by `session`.
    pub fn seed_pair(&self, id: i64, session: Option<&str>) -> PairId {
        let mut state = self.state();
        let pair_id = PairId(id);
        state.next_pair_id = state.next_pair_id.max(id);
        state.pairs.insert(
            pair_id,
            ForwardingPair {
                id: pair_id,
                name: format!("pair-{id}"),
                source_chat: format!("source-{id}").as_str().into(),
                relay_chat: format!("relay-{id}").as_str().into(),
                destination_chat: format!("destination-{id}").as_str().into(),
                session: session.map(str::to_string),
                enabled: true,
                status: if session.is_some() {
                    PairStatus::Active
                } else {
                    PairStatus::Unassigned
                },
                last_activity: None,
                message_count: 0,
                created_at: Utc::now(),
            },
        );
        pair_id
    }

    /// Make the next `n` ownership changes report a conflict without applying.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of `set_pair_session` calls made so far.
    pub fn change_calls(&self) -> u32 {
        self.change_calls.load(Ordering::SeqCst)
    }

    pub fn pair(&self, id: PairId) -> Option<ForwardingPair> {
        self.state().pairs.get(&id).cloned()
    }

    pub fn pairs_on(&self, session: &str) -> Vec<PairId> {
        self.state()
            .pairs
            .values()
            .filter(|p| p.session.as_deref() == Some(session))
            .map(|p| p.id)
            .collect()
    }

    pub fn session_health(&self, name: &str) -> Option<HealthState> {
        self.state()
            .sessions
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.health)
    }

    pub fn correlation(&self, pair_id: PairId, source: &str) -> Option<CorrelationRecord> {
        self.state()
            .correlations
            .get(&(pair_id, MessageId::from(source)))
            .cloned()
    }

    /// Overwrite a stored correlation record, e.g. to age it.
    pub fn put_correlation(&self, record: CorrelationRecord) {
        self.state().correlations.insert(
            (record.pair_id, record.source_message_id.clone()),
            record,
        );
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), FerryError> {
        let mut state = self.state();
        if state.sessions.iter().any(|s| s.name == session.name) {
            return Err(FerryError::AlreadyExists {
                kind: "session",
                id: session.name.clone(),
            });
        }
        state.sessions.push(session.clone());
        Ok(())
    }

    async fn get_session(&self, name: &str) -> Result<Option<SessionRecord>, FerryError> {
        Ok(self.state().sessions.iter().find(|s| s.name == name).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, FerryError> {
        Ok(self.state().sessions.clone())
    }

    async fn update_session_health(
        &self,
        name: &str,
        health: HealthState,
        probed_at: Option<DateTime<Utc>>,
    ) -> Result<(), FerryError> {
        let mut state = self.state();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| FerryError::NotFound {
                kind: "session",
                id: name.to_string(),
            })?;
        session.health = health;
        if probed_at.is_some() {
            session.last_probed_at = probed_at;
        }
        Ok(())
    }

    async fn insert_pair(&self, pair: &NewPair) -> Result<ForwardingPair, FerryError> {
        let mut state = self.state();
        state.next_pair_id += 1;
        let id = PairId(state.next_pair_id);
        let stored = ForwardingPair {
            id,
            name: pair.name.clone(),
            source_chat: pair.source_chat.clone(),
            relay_chat: pair.relay_chat.clone(),
            destination_chat: pair.destination_chat.clone(),
            session: None,
            enabled: true,
            status: PairStatus::Unassigned,
            last_activity: None,
            message_count: 0,
            created_at: Utc::now(),
        };
        state.pairs.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_pair(&self, id: PairId) -> Result<Option<ForwardingPair>, FerryError> {
        Ok(self.pair(id))
    }

    async fn list_pairs(&self) -> Result<Vec<ForwardingPair>, FerryError> {
        Ok(self.state().pairs.values().cloned().collect())
    }

    async fn list_pairs_by_session(&self, name: &str) -> Result<Vec<ForwardingPair>, FerryError> {
        Ok(self
            .state()
            .pairs
            .values()
            .filter(|p| p.session.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn set_pair_session(&self, change: &SessionChange) -> Result<ChangeOutcome, FerryError> {
        self.change_calls.fetch_add(1, Ordering::SeqCst);
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            if let Some(first) = change.moves.first() {
                return Ok(ChangeOutcome::Conflict {
                    pair_id: first.pair_id,
                });
            }
        }

        let mut state = self.state();
        for mv in &change.moves {
            match state.pairs.get(&mv.pair_id) {
                Some(pair) if pair.session == mv.expected_session => {}
                _ => return Ok(ChangeOutcome::Conflict { pair_id: mv.pair_id }),
            }
        }

        if let (Some(target), Some(capacity)) = (&change.target, change.capacity) {
            let assigned = state
                .pairs
                .values()
                .filter(|p| p.session.as_deref() == Some(target.as_str()))
                .count() as u32;
            let incoming = change
                .moves
                .iter()
                .filter(|mv| mv.expected_session.as_deref() != Some(target.as_str()))
                .count() as u32;
            if assigned + incoming > capacity {
                return Ok(ChangeOutcome::CapacityExceeded {
                    assigned: assigned + incoming,
                    capacity,
                });
            }
        }

        for mv in &change.moves {
            if let Some(pair) = state.pairs.get_mut(&mv.pair_id) {
                match &change.target {
                    Some(target) => {
                        if pair.status == PairStatus::Orphaned {
                            pair.enabled = true;
                        }
                        pair.session = Some(target.clone());
                        pair.status = PairStatus::Active;
                    }
                    None => {
                        pair.session = None;
                        pair.status = PairStatus::Orphaned;
                        pair.enabled = false;
                    }
                }
            }
        }
        Ok(ChangeOutcome::Applied)
    }

    async fn set_pair_enabled(&self, id: PairId, enabled: bool) -> Result<(), FerryError> {
        let mut state = self.state();
        let pair = state.pairs.get_mut(&id).ok_or_else(|| FerryError::NotFound {
            kind: "pair",
            id: id.to_string(),
        })?;
        pair.enabled = enabled;
        Ok(())
    }

    async fn record_pair_activity(&self, id: PairId, at: DateTime<Utc>) -> Result<(), FerryError> {
        if let Some(pair) = self.state().pairs.get_mut(&id) {
            pair.last_activity = Some(at);
            pair.message_count += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn get_correlation(
        &self,
        pair_id: PairId,
        source: &MessageId,
    ) -> Result<Option<CorrelationRecord>, FerryError> {
        Ok(self
            .state()
            .correlations
            .get(&(pair_id, source.clone()))
            .cloned())
    }

    async fn insert_correlation(
        &self,
        record: &CorrelationRecord,
    ) -> Result<InsertOutcome, FerryError> {
        let mut state = self.state();
        if !state.pairs.contains_key(&record.pair_id) {
            return Err(FerryError::NotFound {
                kind: "pair",
                id: record.pair_id.to_string(),
            });
        }
        let key = (record.pair_id, record.source_message_id.clone());
        if let Some(existing) = state.correlations.get(&key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        state.correlations.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn set_destination_id(
        &self,
        pair_id: PairId,
        source: &MessageId,
        destination: &MessageId,
    ) -> Result<(), FerryError> {
        let mut state = self.state();
        let record = state
            .correlations
            .get_mut(&(pair_id, source.clone()))
            .ok_or_else(|| FerryError::NotFound {
                kind: "correlation",
                id: format!("{pair_id}/{source}"),
            })?;
        if record.deleted_at.is_none() {
            record.destination_message_id = Some(destination.clone());
        }
        Ok(())
    }

    async fn clear_hop(
        &self,
        pair_id: PairId,
        source: &MessageId,
        hop: Hop,
    ) -> Result<(), FerryError> {
        let mut state = self.state();
        if let Some(record) = state.correlations.get_mut(&(pair_id, source.clone())) {
            match hop {
                Hop::Relay => record.relay_message_id = None,
                Hop::Destination => record.destination_message_id = None,
            }
            if record.relay_message_id.is_none()
                && record.destination_message_id.is_none()
                && record.deleted_at.is_none()
            {
                record.deleted_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn purge_correlations(&self, older_than: DateTime<Utc>) -> Result<u64, FerryError> {
        let mut state = self.state();
        let before = state.correlations.len();
        state.correlations.retain(|_, r| r.created_at >= older_than);
        Ok((before - state.correlations.len()) as u64)
    }
}
