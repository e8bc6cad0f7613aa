// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Ferry relay scheduler.

use thiserror::Error;

use crate::types::{Hop, PairId};

/// The primary error type used across Ferry traits and core operations.
#[derive(Debug, Error)]
pub enum FerryError {
    /// A session, pair, or correlation record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same identity is already present.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// No healthy session can take the requested pairs.
    #[error("no capacity: {detail}")]
    NoCapacity { detail: String },

    /// The pair has no session, or its session is not healthy. Delivery is refused.
    #[error("no usable session for pair {pair_id}: {reason}")]
    SessionUnavailable {
        pair_id: PairId,
        session: Option<String>,
        reason: String,
    },

    /// A platform call on one hop of the relay failed.
    #[error("delivery failed on {hop} hop: {message}")]
    DeliveryFailed {
        hop: Hop,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation conflicts with the current state of a record.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors (invalid TOML, out-of-range values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FerryError {
    /// Builds a [`FerryError::Storage`] from any error type.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            source: Box::new(err),
        }
    }

    /// Whether the failed operation may succeed if the caller tries again later.
    ///
    /// Platform delivery failures and timeouts are transient. Everything else
    /// reflects a state the caller has to change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeliveryFailed { .. } | Self::Timeout { .. })
    }
}
