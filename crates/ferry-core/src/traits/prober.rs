// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health prober trait.

use async_trait::async_trait;

use crate::error::FerryError;
use crate::types::ProbeOutcome;

/// Checks whether a session's platform connection is usable.
///
/// An `Err` return is treated the same as [`ProbeOutcome::Error`].
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, session: &str) -> Result<ProbeOutcome, FerryError>;
}
