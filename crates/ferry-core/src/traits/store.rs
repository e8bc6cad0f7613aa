// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential store: sessions and forwarding pairs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FerryError;
use crate::types::{
    ChangeOutcome, ForwardingPair, HealthState, NewPair, PairId, SessionChange, SessionRecord,
};

/// Source of truth for session metadata and pair -> session ownership.
///
/// Scheduler state is always rebuilt from what this store reports.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a new session. Fails with `AlreadyExists` if the name is taken.
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), FerryError>;

    async fn get_session(&self, name: &str) -> Result<Option<SessionRecord>, FerryError>;

    /// All sessions in registration order.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, FerryError>;

    async fn update_session_health(
        &self,
        name: &str,
        state: HealthState,
        probed_at: Option<DateTime<Utc>>,
    ) -> Result<(), FerryError>;

    async fn insert_pair(&self, pair: &NewPair) -> Result<ForwardingPair, FerryError>;

    async fn get_pair(&self, id: PairId) -> Result<Option<ForwardingPair>, FerryError>;

    async fn list_pairs(&self) -> Result<Vec<ForwardingPair>, FerryError>;

    async fn list_pairs_by_session(&self, name: &str) -> Result<Vec<ForwardingPair>, FerryError>;

    /// Applies an ownership change atomically.
    ///
    /// Moved pairs become `Active` and enabled under the target, or
    /// `Orphaned` and disabled when the target is `None`.
    async fn set_pair_session(&self, change: &SessionChange) -> Result<ChangeOutcome, FerryError>;

    async fn set_pair_enabled(&self, id: PairId, enabled: bool) -> Result<(), FerryError>;

    /// Stamps `last_activity` and bumps the pair's message count.
    async fn record_pair_activity(&self, id: PairId, at: DateTime<Utc>) -> Result<(), FerryError>;
}
