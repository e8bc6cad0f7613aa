// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session/worker scheduler.
//!
//! Session metadata, health, and worker groups live in a [`DashMap`] keyed
//! by session name. Ownership changes go through the credential store's
//! compare-and-swap [`CredentialStore::set_pair_session`] while holding the
//! per-session locks of every session involved. Locks are always taken in
//! name order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use ferry_config::model::{HealthConfig, SchedulerConfig};
use ferry_core::{
    ChangeOutcome, CredentialStore, FerryError, ForwardingPair, HealthProber, HealthState, PairId,
    PairMove, PairStatus, ProbeOutcome, SessionChange, SessionRecord,
};

use crate::groups::{self, WorkerGroup};
use crate::health;

/// Scheduler-side view of one session.
struct SessionEntry {
    capacity: u32,
    priority: i32,
    /// Registration order, used as the last assignment tie-break.
    seq: u64,
    health: HealthState,
    consecutive_failures: u32,
    groups: Vec<WorkerGroup>,
    /// Serializes ownership changes touching this session.
    lock: Arc<Mutex<()>>,
    /// Serializes probes of this session.
    probe_lock: Arc<Mutex<()>>,
}

impl SessionEntry {
    fn new(capacity: u32, priority: i32, seq: u64, health: HealthState) -> Self {
        Self {
            capacity,
            priority,
            seq,
            health,
            consecutive_failures: 0,
            groups: Vec::new(),
            lock: Arc::new(Mutex::new(())),
            probe_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Point-in-time status of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub health: HealthState,
    pub capacity: u32,
    pub priority: i32,
    pub assigned: usize,
    pub utilization_percent: f64,
    pub consecutive_failures: u32,
    pub groups: Vec<WorkerGroup>,
}

/// Where the pairs of a failed or deleted session ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReassignmentReport {
    pub reassigned: Vec<(PairId, String)>,
    pub orphaned: Vec<PairId>,
}

/// Group counts before and after a rebalancing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub sessions: usize,
    pub groups_before: usize,
    pub groups_after: usize,
    pub consolidated: Vec<String>,
}

/// A pair together with its current owner's health, as seen right now.
#[derive(Debug, Clone)]
pub struct PairResolution {
    pub pair: ForwardingPair,
    pub session_health: Option<HealthState>,
}

impl PairResolution {
    /// The owning session's name if it is healthy enough to deliver.
    pub fn deliverable_session(&self) -> Result<&str, FerryError> {
        let unavailable = |reason: String| FerryError::SessionUnavailable {
            pair_id: self.pair.id,
            session: self.pair.session.clone(),
            reason,
        };
        match (&self.pair.session, self.session_health) {
            (Some(name), Some(HealthState::Healthy)) => Ok(name.as_str()),
            (Some(name), Some(state)) => Err(unavailable(format!("session {name} is {state}"))),
            (Some(name), None) => Err(unavailable(format!("session {name} is not registered"))),
            (None, _) => Err(unavailable(format!("pair is {}", self.pair.status))),
        }
    }
}

/// Snapshot used to rank assignment candidates.
struct Candidate {
    name: String,
    capacity: u32,
    priority: i32,
    seq: u64,
    assigned: u32,
}

/// Capacity-aware assignment of forwarding pairs to sessions.
pub struct Scheduler {
    store: Arc<dyn CredentialStore>,
    prober: Arc<dyn HealthProber>,
    config: SchedulerConfig,
    health: HealthConfig,
    table: DashMap<String, SessionEntry>,
    next_seq: AtomicU64,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        prober: Arc<dyn HealthProber>,
        config: SchedulerConfig,
        health: HealthConfig,
    ) -> Self {
        Self {
            store,
            prober,
            config,
            health,
            table: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Rebuild the session table and worker groups from the store.
    ///
    /// Removed sessions are skipped. Failure streaks start from zero.
    /// Pairs still pointing at an `Unauthorized` or `Removed` session, left
    /// behind by an interrupted reassignment, are moved off before this
    /// returns.
    pub async fn load(&self) -> Result<(), FerryError> {
        let sessions = self.store.list_sessions().await?;
        let pairs = self.store.list_pairs().await?;

        self.table.clear();
        let mut stranded = Vec::new();
        for record in sessions {
            let owned: Vec<PairId> = pairs
                .iter()
                .filter(|p| p.session.as_deref() == Some(record.name.as_str()))
                .map(|p| p.id)
                .collect();
            if record.health.is_terminal() && !owned.is_empty() {
                stranded.push(record.name.clone());
            }
            if record.health == HealthState::Removed {
                continue;
            }
            let limit = groups::group_limit(record.capacity, self.config.max_pairs_per_group);
            let mut entry = SessionEntry::new(
                record.capacity,
                record.priority,
                self.next_seq.fetch_add(1, Ordering::SeqCst),
                record.health,
            );
            entry.groups = groups::regroup(&record.name, &[], &owned, limit);
            self.table.insert(record.name, entry);
        }
        info!(sessions = self.table.len(), "scheduler state loaded");

        for session in stranded {
            let report = self.handle_unhealthy_session(&session).await?;
            warn!(
                session = %session,
                reassigned = report.reassigned.len(),
                orphaned = report.orphaned.len(),
                "pairs moved off failed session on load"
            );
        }
        Ok(())
    }

    /// Register a new session. It starts `Unverified` and takes no pairs
    /// until a probe succeeds. Missing capacity or priority fall back to the
    /// configured defaults.
    pub async fn register_session(
        &self,
        name: &str,
        capacity: Option<u32>,
        priority: Option<i32>,
    ) -> Result<SessionRecord, FerryError> {
        let capacity = capacity.unwrap_or(self.config.default_capacity);
        let priority = priority.unwrap_or(self.config.default_priority);
        if capacity == 0 {
            return Err(FerryError::InvalidState(format!(
                "session {name} needs a capacity of at least 1"
            )));
        }
        if self.table.contains_key(name) {
            return Err(FerryError::AlreadyExists {
                kind: "session",
                id: name.to_string(),
            });
        }

        let record = SessionRecord {
            name: name.to_string(),
            capacity,
            priority,
            health: HealthState::Unverified,
            registered_at: Utc::now(),
            last_probed_at: None,
        };
        self.store.insert_session(&record).await?;
        self.table.insert(
            name.to_string(),
            SessionEntry::new(
                capacity,
                priority,
                self.next_seq.fetch_add(1, Ordering::SeqCst),
                HealthState::Unverified,
            ),
        );
        info!(session = %name, capacity, priority, "session registered");
        Ok(record)
    }

    /// Probe a session and apply the resulting health transition.
    ///
    /// A session that becomes `Unauthorized` has its pairs reassigned (or
    /// orphaned) before this returns.
    pub async fn probe_health(&self, session: &str) -> Result<HealthState, FerryError> {
        let _probing = self.lock_probe(session).await?;

        let (current, failures) = self
            .table
            .get(session)
            .map(|e| (e.health, e.consecutive_failures))
            .ok_or_else(|| not_found_session(session))?;
        if current.is_terminal() {
            debug!(session = %session, state = %current, "skipping probe of terminal session");
            return Ok(current);
        }

        let timeout = self.health.probe_timeout();
        let outcome = match tokio::time::timeout(timeout, self.prober.probe(session)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ProbeOutcome::Error {
                reason: e.to_string(),
            },
            Err(_) => ProbeOutcome::Error {
                reason: format!("probe timed out after {timeout:?}"),
            },
        };

        let next = health::transition(current, failures, &outcome, self.health.failure_threshold);
        self.store
            .update_session_health(session, next.state, Some(Utc::now()))
            .await?;
        {
            let Some(mut entry) = self.table.get_mut(session) else {
                return Err(not_found_session(session));
            };
            entry.health = next.state;
            entry.consecutive_failures = next.consecutive_failures;
        }

        if next.state != current {
            match next.state {
                HealthState::Healthy => {
                    info!(session = %session, from = %current, "session healthy")
                }
                _ => warn!(
                    session = %session,
                    from = %current,
                    to = %next.state,
                    failures = next.consecutive_failures,
                    ?outcome,
                    "session health changed"
                ),
            }
        }

        if next.state == HealthState::Unauthorized && current != HealthState::Unauthorized {
            let report = self.handle_unhealthy_session(session).await?;
            info!(
                session = %session,
                reassigned = report.reassigned.len(),
                orphaned = report.orphaned.len(),
                "pairs moved off unauthorized session"
            );
        }
        Ok(next.state)
    }

    /// Assign a pair to the best healthy session with free capacity.
    ///
    /// Ranking: highest priority, then lowest utilization, then earliest
    /// registration. The pair itself is not counted against its current
    /// session, so re-running this on an assigned pair may leave it in place.
    /// Store conflicts are retried up to `cas_max_attempts` times.
    pub async fn assign_pair(&self, pair_id: PairId) -> Result<String, FerryError> {
        for attempt in 1..=self.config.cas_max_attempts {
            let pair = self
                .store
                .get_pair(pair_id)
                .await?
                .ok_or_else(|| FerryError::NotFound {
                    kind: "pair",
                    id: pair_id.to_string(),
                })?;
            let current = pair.session.clone();

            let Some(target) = self.best_candidate(current.as_deref()) else {
                return Err(FerryError::NoCapacity {
                    detail: format!("no healthy session has room for pair {pair_id}"),
                });
            };

            let mut involved = vec![target.name.clone()];
            involved.extend(current.clone());
            let _guards = self.lock_sessions(&involved).await;

            if self.health_of(&target.name) != Some(HealthState::Healthy) {
                debug!(session = %target.name, attempt, "candidate changed health, retrying");
                continue;
            }
            if current.as_deref() == Some(target.name.as_str()) {
                return Ok(target.name);
            }

            let change = SessionChange {
                moves: vec![PairMove {
                    pair_id,
                    expected_session: current.clone(),
                }],
                target: Some(target.name.clone()),
                capacity: Some(target.capacity),
            };
            match self.store.set_pair_session(&change).await? {
                ChangeOutcome::Applied => {
                    self.resync_groups(&involved).await?;
                    info!(
                        pair_id = %pair_id,
                        session = %target.name,
                        from = current.as_deref().unwrap_or("-"),
                        "pair assigned"
                    );
                    return Ok(target.name);
                }
                ChangeOutcome::Conflict { .. } => {
                    debug!(pair_id = %pair_id, attempt, "pair owner changed, retrying");
                }
                ChangeOutcome::CapacityExceeded { assigned, capacity } => {
                    debug!(
                        pair_id = %pair_id,
                        session = %target.name,
                        assigned,
                        capacity,
                        attempt,
                        "candidate filled up, retrying"
                    );
                    self.resync_groups(&[target.name.clone()]).await?;
                }
            }
        }

        Err(FerryError::InvalidState(format!(
            "assignment of pair {pair_id} did not settle after {} attempts",
            self.config.cas_max_attempts
        )))
    }

    /// Move every pair in `pair_ids` to `target`, or none of them.
    ///
    /// Returns how many pairs changed owner. Fails with `NoCapacity` when the
    /// batch does not fit and with `InvalidState` when the target is not
    /// healthy.
    pub async fn bulk_reassign(
        &self,
        pair_ids: &[PairId],
        target: &str,
    ) -> Result<usize, FerryError> {
        let ids: Vec<PairId> = pair_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let capacity = self
            .table
            .get(target)
            .map(|e| e.capacity)
            .ok_or_else(|| not_found_session(target))?;

        for attempt in 1..=self.config.cas_max_attempts {
            let mut moves = Vec::with_capacity(ids.len());
            let mut involved = vec![target.to_string()];
            for id in &ids {
                let pair = self
                    .store
                    .get_pair(*id)
                    .await?
                    .ok_or_else(|| FerryError::NotFound {
                        kind: "pair",
                        id: id.to_string(),
                    })?;
                involved.extend(pair.session.clone());
                moves.push(PairMove {
                    pair_id: *id,
                    expected_session: pair.session,
                });
            }

            let _guards = self.lock_sessions(&involved).await;
            match self.health_of(target) {
                Some(HealthState::Healthy) => {}
                Some(state) => {
                    return Err(FerryError::InvalidState(format!(
                        "target session {target} is {state}"
                    )));
                }
                None => return Err(not_found_session(target)),
            }

            let moving = moves
                .iter()
                .filter(|mv| mv.expected_session.as_deref() != Some(target))
                .count();
            let change = SessionChange {
                moves,
                target: Some(target.to_string()),
                capacity: Some(capacity),
            };
            match self.store.set_pair_session(&change).await? {
                ChangeOutcome::Applied => {
                    self.resync_groups(&involved).await?;
                    info!(session = %target, moved = moving, "pairs reassigned in bulk");
                    return Ok(moving);
                }
                ChangeOutcome::CapacityExceeded { assigned, capacity } => {
                    return Err(FerryError::NoCapacity {
                        detail: format!(
                            "session {target} would hold {assigned} pairs, capacity is {capacity}"
                        ),
                    });
                }
                ChangeOutcome::Conflict { pair_id } => {
                    debug!(pair_id = %pair_id, attempt, "bulk move raced, retrying");
                }
            }
        }

        Err(FerryError::InvalidState(format!(
            "bulk reassignment to {target} did not settle after {} attempts",
            self.config.cas_max_attempts
        )))
    }

    /// Move every pair off `session`: reassign each one, or orphan it when
    /// no healthy session has room. No pair is left pointing at `session`.
    pub async fn handle_unhealthy_session(
        &self,
        session: &str,
    ) -> Result<ReassignmentReport, FerryError> {
        let mut report = ReassignmentReport::default();
        let pairs = self.store.list_pairs_by_session(session).await?;

        for pair in pairs {
            match self.assign_pair(pair.id).await {
                Ok(target) => {
                    if target != session {
                        report.reassigned.push((pair.id, target));
                    }
                    continue;
                }
                Err(FerryError::NoCapacity { .. }) => {}
                Err(e @ FerryError::Storage { .. }) => return Err(e),
                Err(e) => {
                    warn!(pair_id = %pair.id, session = %session, error = %e, "reassignment failed");
                }
            }
            if self.orphan(pair.id, session).await? {
                report.orphaned.push(pair.id);
            }
        }

        self.resync_groups(&[session.to_string()]).await?;
        Ok(report)
    }

    /// Delete a session. Refuses while pairs are assigned unless `force`,
    /// in which case the pairs are reassigned or orphaned first.
    ///
    /// Waits for an in-flight probe of the session to finish, so a probe
    /// result is never written over `Removed`.
    pub async fn delete_session(
        &self,
        session: &str,
        force: bool,
    ) -> Result<ReassignmentReport, FerryError> {
        let _probing = self.lock_probe(session).await?;
        if matches!(self.health_of(session), None | Some(HealthState::Removed)) {
            return Err(not_found_session(session));
        }
        let assigned = self.store.list_pairs_by_session(session).await?.len();
        if assigned > 0 && !force {
            return Err(FerryError::InvalidState(format!(
                "session {session} still serves {assigned} pairs; delete with force to reassign them"
            )));
        }

        self.store
            .update_session_health(session, HealthState::Removed, None)
            .await?;
        if let Some(mut entry) = self.table.get_mut(session) {
            entry.health = HealthState::Removed;
        }

        let report = if assigned > 0 {
            self.handle_unhealthy_session(session).await?
        } else {
            ReassignmentReport::default()
        };
        self.table.remove(session);
        info!(
            session = %session,
            reassigned = report.reassigned.len(),
            orphaned = report.orphaned.len(),
            "session removed"
        );
        Ok(report)
    }

    /// Return an `Unauthorized` session to `Unverified` after external
    /// re-authentication. The next successful probe makes it assignable.
    pub async fn mark_reauthenticated(&self, session: &str) -> Result<(), FerryError> {
        let _probing = self.lock_probe(session).await?;
        let current = self
            .health_of(session)
            .ok_or_else(|| not_found_session(session))?;
        if current != HealthState::Unauthorized {
            return Err(FerryError::InvalidState(format!(
                "session {session} is {current}, only unauthorized sessions can be re-authenticated"
            )));
        }
        self.store
            .update_session_health(session, HealthState::Unverified, None)
            .await?;
        if let Some(mut entry) = self.table.get_mut(session) {
            entry.health = HealthState::Unverified;
            entry.consecutive_failures = 0;
        }
        info!(session = %session, "session re-authenticated");
        Ok(())
    }

    /// Recompute every session's groups from the store, consolidating
    /// fragmented ones.
    pub async fn rebalance(&self) -> Result<RebalanceReport, FerryError> {
        let pairs = self.store.list_pairs().await?;
        let mut by_session: BTreeMap<&str, Vec<PairId>> = BTreeMap::new();
        for pair in &pairs {
            if let Some(session) = pair.session.as_deref() {
                by_session.entry(session).or_default().push(pair.id);
            }
        }

        let mut report = RebalanceReport::default();
        for mut entry in self.table.iter_mut() {
            let name = entry.key().clone();
            let limit = groups::group_limit(entry.capacity, self.config.max_pairs_per_group);
            let owned = by_session.get(name.as_str()).map(Vec::as_slice).unwrap_or(&[]);

            report.sessions += 1;
            report.groups_before += entry.groups.len();
            let mut regrouped = groups::regroup(&name, &entry.groups, owned, limit);
            if groups::needs_consolidation(
                &regrouped,
                limit,
                self.config.consolidation_threshold,
            ) {
                regrouped = groups::consolidate(&name, &regrouped, limit);
                report.consolidated.push(name.clone());
            }
            report.groups_after += regrouped.len();
            entry.groups = regrouped;
        }

        debug!(
            sessions = report.sessions,
            before = report.groups_before,
            after = report.groups_after,
            "worker groups rebalanced"
        );
        Ok(report)
    }

    /// Status of one session, with its assigned count read from the store.
    pub async fn session_status(&self, session: &str) -> Result<SessionStatus, FerryError> {
        let assigned = self.store.list_pairs_by_session(session).await?.len();
        let entry = self
            .table
            .get(session)
            .ok_or_else(|| not_found_session(session))?;
        Ok(SessionStatus {
            name: session.to_string(),
            health: entry.health,
            capacity: entry.capacity,
            priority: entry.priority,
            assigned,
            utilization_percent: assigned as f64 * 100.0 / f64::from(entry.capacity),
            consecutive_failures: entry.consecutive_failures,
            groups: entry.groups.clone(),
        })
    }

    /// Status of every registered session, in registration order.
    pub async fn sessions(&self) -> Result<Vec<SessionStatus>, FerryError> {
        let mut names: Vec<(u64, String)> = self
            .table
            .iter()
            .map(|e| (e.seq, e.key().clone()))
            .collect();
        names.sort();

        let mut statuses = Vec::with_capacity(names.len());
        for (_, name) in names {
            statuses.push(self.session_status(&name).await?);
        }
        Ok(statuses)
    }

    /// Pairs waiting for operator attention.
    pub async fn orphaned_pairs(&self) -> Result<Vec<ForwardingPair>, FerryError> {
        Ok(self
            .store
            .list_pairs()
            .await?
            .into_iter()
            .filter(|p| p.status == PairStatus::Orphaned)
            .collect())
    }

    /// Sessions stuck in `Unauthorized` until re-authenticated.
    pub fn unauthorized_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .iter()
            .filter(|e| e.health == HealthState::Unauthorized)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Assigned pair count per registered session.
    pub async fn distribution(&self) -> Result<BTreeMap<String, usize>, FerryError> {
        let mut counts: BTreeMap<String, usize> =
            self.table.iter().map(|e| (e.key().clone(), 0)).collect();
        for pair in self.store.list_pairs().await? {
            if let Some(session) = pair.session {
                *counts.entry(session).or_default() += 1;
            }
        }
        Ok(counts)
    }

    /// Look up a pair and the current health of its owner.
    pub async fn resolve_pair(&self, pair_id: PairId) -> Result<PairResolution, FerryError> {
        let pair = self
            .store
            .get_pair(pair_id)
            .await?
            .ok_or_else(|| FerryError::NotFound {
                kind: "pair",
                id: pair_id.to_string(),
            })?;
        let session_health = pair.session.as_deref().and_then(|s| self.health_of(s));
        Ok(PairResolution {
            pair,
            session_health,
        })
    }

    /// Current health of a registered session.
    pub fn health_of(&self, session: &str) -> Option<HealthState> {
        self.table.get(session).map(|e| e.health)
    }

    /// Sessions the health monitor should probe.
    pub fn probe_targets(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = self
            .table
            .iter()
            .filter(|e| !e.health.is_terminal())
            .map(|e| (e.seq, e.key().clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn health_config(&self) -> &HealthConfig {
        &self.health
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // --- internals ---

    /// Best assignable session, ignoring one pair currently on `owner`.
    fn best_candidate(&self, owner: Option<&str>) -> Option<Candidate> {
        self.table
            .iter()
            .filter(|e| e.health == HealthState::Healthy)
            .map(|e| {
                let mut assigned = groups::assigned(&e.groups) as u32;
                if owner == Some(e.key().as_str()) {
                    assigned = assigned.saturating_sub(1);
                }
                Candidate {
                    name: e.key().clone(),
                    capacity: e.capacity,
                    priority: e.priority,
                    seq: e.seq,
                    assigned,
                }
            })
            .filter(|c| c.assigned < c.capacity)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| {
                        let lhs = u64::from(a.assigned) * u64::from(b.capacity);
                        let rhs = u64::from(b.assigned) * u64::from(a.capacity);
                        lhs.cmp(&rhs)
                    })
                    .then_with(|| a.seq.cmp(&b.seq))
            })
    }

    /// Take the ownership locks of `sessions` in name order.
    async fn lock_sessions(&self, sessions: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&String> = sessions.iter().collect();
        let locks: Vec<Arc<Mutex<()>>> = ordered
            .into_iter()
            .filter_map(|name| self.table.get(name).map(|e| e.lock.clone()))
            .collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Take the probe lock of `session`. Health writes for a session happen
    /// only under this lock.
    async fn lock_probe(&self, session: &str) -> Result<OwnedMutexGuard<()>, FerryError> {
        let lock = self
            .table
            .get(session)
            .map(|e| e.probe_lock.clone())
            .ok_or_else(|| not_found_session(session))?;
        Ok(lock.lock_owned().await)
    }

    /// Recompute groups of `sessions` from the store, keeping membership.
    async fn resync_groups(&self, sessions: &[String]) -> Result<(), FerryError> {
        for name in sessions.iter().collect::<BTreeSet<_>>() {
            let owned: Vec<PairId> = self
                .store
                .list_pairs_by_session(name)
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect();
            if let Some(mut entry) = self.table.get_mut(name.as_str()) {
                let limit = groups::group_limit(entry.capacity, self.config.max_pairs_per_group);
                entry.groups = groups::regroup(name, &entry.groups, &owned, limit);
            }
        }
        Ok(())
    }

    /// Orphan one pair still owned by `session`. Returns false if another
    /// task moved it first.
    async fn orphan(&self, pair_id: PairId, session: &str) -> Result<bool, FerryError> {
        let _guards = self.lock_sessions(&[session.to_string()]).await;
        let change = SessionChange {
            moves: vec![PairMove {
                pair_id,
                expected_session: Some(session.to_string()),
            }],
            target: None,
            capacity: None,
        };
        match self.store.set_pair_session(&change).await? {
            ChangeOutcome::Applied => {
                warn!(pair_id = %pair_id, from = %session, "pair orphaned, no healthy session has room");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn not_found_session(name: &str) -> FerryError {
    FerryError::NotFound {
        kind: "session",
        id: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_test_utils::{MemoryStore, ScriptedProber};

    fn scheduler(store: Arc<MemoryStore>, prober: Arc<ScriptedProber>) -> Scheduler {
        Scheduler::new(
            store,
            prober,
            SchedulerConfig::default(),
            HealthConfig::default(),
        )
    }

    #[tokio::test]
    async fn registration_uses_defaults_and_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));

        let record = sched.register_session("s1", None, None).await.unwrap();
        assert_eq!(record.capacity, 30);
        assert_eq!(record.priority, 1);
        assert_eq!(record.health, HealthState::Unverified);

        let err = sched.register_session("s1", Some(2), None).await.unwrap_err();
        assert!(matches!(err, FerryError::AlreadyExists { .. }));
        let err = sched.register_session("s2", Some(0), None).await.unwrap_err();
        assert!(matches!(err, FerryError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unverified_sessions_take_no_pairs() {
        let store = Arc::new(MemoryStore::new());
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.register_session("s1", Some(2), None).await.unwrap();
        let pair = store.seed_pair(1, None);

        let err = sched.assign_pair(pair).await.unwrap_err();
        assert!(matches!(err, FerryError::NoCapacity { .. }));

        assert_eq!(sched.probe_health("s1").await.unwrap(), HealthState::Healthy);
        assert_eq!(sched.assign_pair(pair).await.unwrap(), "s1");
    }

    #[tokio::test]
    async fn lower_utilization_wins_between_equal_priorities() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("big", 10, 1, HealthState::Healthy);
        store.seed_session("small", 2, 1, HealthState::Healthy);
        store.seed_pair(1, Some("big"));
        store.seed_pair(2, Some("small"));
        let fresh = store.seed_pair(3, None);
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        // big is 1/10 used, small is 1/2 used.
        assert_eq!(sched.assign_pair(fresh).await.unwrap(), "big");
    }

    #[tokio::test]
    async fn earliest_registration_breaks_full_ties() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("later-name-first", 2, 1, HealthState::Healthy);
        store.seed_session("a-second", 2, 1, HealthState::Healthy);
        let pair = store.seed_pair(1, None);
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        assert_eq!(sched.assign_pair(pair).await.unwrap(), "later-name-first");
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_consistent() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 2, 1, HealthState::Healthy);
        let pair = store.seed_pair(1, None);
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        store.force_conflicts(3);
        assert_eq!(sched.assign_pair(pair).await.unwrap(), "s1");
        assert_eq!(store.change_calls(), 4);
    }

    #[tokio::test]
    async fn endless_conflicts_give_up_after_bound() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 2, 1, HealthState::Healthy);
        let pair = store.seed_pair(1, None);
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        store.force_conflicts(u32::MAX);
        let err = sched.assign_pair(pair).await.unwrap_err();
        assert!(matches!(err, FerryError::InvalidState(_)));
        assert_eq!(store.change_calls(), SchedulerConfig::default().cas_max_attempts);
        assert!(store.pair(pair).unwrap().session.is_none());
    }

    #[tokio::test]
    async fn groups_track_assignments() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 3, 1, HealthState::Healthy);
        let sched = Scheduler::new(
            store.clone(),
            Arc::new(ScriptedProber::new()),
            SchedulerConfig {
                max_pairs_per_group: 2,
                ..SchedulerConfig::default()
            },
            HealthConfig::default(),
        );
        sched.load().await.unwrap();
        for id in 1..=3 {
            let pair = store.seed_pair(id, None);
            sched.assign_pair(pair).await.unwrap();
        }

        let status = sched.session_status("s1").await.unwrap();
        assert_eq!(status.assigned, 3);
        assert_eq!(status.groups.len(), 2);
        assert_eq!(status.utilization_percent, 100.0);
        assert_eq!(
            status.groups.iter().map(WorkerGroup::len).sum::<usize>(),
            3
        );
    }

    #[tokio::test]
    async fn bulk_reassign_rejects_unhealthy_target() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 5, 1, HealthState::Healthy);
        store.seed_session("s2", 5, 1, HealthState::Degraded);
        let pair = store.seed_pair(1, Some("s1"));
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        let err = sched.bulk_reassign(&[pair], "s2").await.unwrap_err();
        assert!(matches!(err, FerryError::InvalidState(_)));
        assert_eq!(store.pairs_on("s1"), vec![pair]);
    }

    #[tokio::test]
    async fn delete_without_force_refuses_when_pairs_remain() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 5, 1, HealthState::Healthy);
        store.seed_session("s2", 5, 1, HealthState::Healthy);
        let pair = store.seed_pair(1, Some("s1"));
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        let err = sched.delete_session("s1", false).await.unwrap_err();
        assert!(matches!(err, FerryError::InvalidState(_)));

        let report = sched.delete_session("s1", true).await.unwrap();
        assert_eq!(report.reassigned, vec![(pair, "s2".to_string())]);
        assert_eq!(store.session_health("s1"), Some(HealthState::Removed));
        assert!(sched.health_of("s1").is_none());
    }

    #[tokio::test]
    async fn reauthentication_only_leaves_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 5, 1, HealthState::Unauthorized);
        store.seed_session("s2", 5, 1, HealthState::Healthy);
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        assert_eq!(sched.unauthorized_sessions(), vec!["s1".to_string()]);
        assert!(sched.mark_reauthenticated("s2").await.is_err());
        sched.mark_reauthenticated("s1").await.unwrap();
        assert_eq!(sched.health_of("s1"), Some(HealthState::Unverified));
        assert_eq!(store.session_health("s1"), Some(HealthState::Unverified));
        assert!(sched.unauthorized_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_counts_as_transient_failure() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 5, 1, HealthState::Healthy);
        let prober = Arc::new(ScriptedProber::new());
        prober.hang("s1");
        let sched = scheduler(store.clone(), prober);
        sched.load().await.unwrap();

        assert_eq!(sched.probe_health("s1").await.unwrap(), HealthState::Degraded);
        assert_eq!(sched.session_status("s1").await.unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn rebalance_consolidates_fragmented_groups() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 6, 1, HealthState::Healthy);
        store.seed_session("s2", 6, 1, HealthState::Healthy);
        let sched = Scheduler::new(
            store.clone(),
            Arc::new(ScriptedProber::new()),
            SchedulerConfig {
                max_pairs_per_group: 3,
                ..SchedulerConfig::default()
            },
            HealthConfig::default(),
        );
        sched.load().await.unwrap();
        let mut ids = Vec::new();
        for id in 1..=6 {
            let pair = store.seed_pair(id, None);
            sched.bulk_reassign(&[pair], "s1").await.unwrap();
            ids.push(pair);
        }
        // Groups were [1, 2, 3] and [4, 5, 6]; leave one pair in each.
        sched.bulk_reassign(&[ids[1], ids[2], ids[3], ids[5]], "s2").await.unwrap();
        assert_eq!(sched.session_status("s1").await.unwrap().groups.len(), 2);

        let report = sched.rebalance().await.unwrap();
        assert_eq!(report.consolidated, vec!["s1".to_string()]);
        let status = sched.session_status("s1").await.unwrap();
        assert_eq!(status.groups.len(), 1);
        assert_eq!(status.groups[0].pair_ids, vec![ids[0], ids[4]]);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn orphaning_is_logged() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 1, 1, HealthState::Healthy);
        store.seed_pair(1, Some("s1"));
        let sched = scheduler(store.clone(), Arc::new(ScriptedProber::new()));
        sched.load().await.unwrap();

        sched.delete_session("s1", true).await.unwrap();
        assert!(logs_contain("pair orphaned"));
        assert!(logs_contain("session removed"));
    }
}
