// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation store: per-hop message ids of relayed messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FerryError;
use crate::types::{CorrelationRecord, Hop, InsertOutcome, MessageId, PairId};

/// Keyed store of [`CorrelationRecord`]s, addressed by (pair, source message).
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn get_correlation(
        &self,
        pair_id: PairId,
        source: &MessageId,
    ) -> Result<Option<CorrelationRecord>, FerryError>;

    /// Inserts a record unless one already exists for the same key.
    async fn insert_correlation(
        &self,
        record: &CorrelationRecord,
    ) -> Result<InsertOutcome, FerryError>;

    /// Fills in the destination id of a partially delivered record.
    async fn set_destination_id(
        &self,
        pair_id: PairId,
        source: &MessageId,
        destination: &MessageId,
    ) -> Result<(), FerryError>;

    /// Nulls one hop id. The record is marked deleted once both ids are null.
    async fn clear_hop(
        &self,
        pair_id: PairId,
        source: &MessageId,
        hop: Hop,
    ) -> Result<(), FerryError>;

    /// Deletes records created before `older_than`. Returns how many were removed.
    async fn purge_correlations(&self, older_than: DateTime<Utc>) -> Result<u64, FerryError>;
}
