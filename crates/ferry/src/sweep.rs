// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry sweep`: one retention pass over correlation records.

use chrono::Utc;
use ferry_core::{CorrelationStore, FerryError};
use serde::Serialize;
use tracing::info;

use crate::context::Ops;
use crate::{Output, print_json};

#[derive(Debug, Serialize)]
struct SweepResponse {
    retention_days: u32,
    purged: u64,
}

pub async fn run_sweep(ops: &Ops, out: Output) -> Result<(), FerryError> {
    let cutoff = Utc::now() - ops.config.relay.retention();
    let purged = ops.store.purge_correlations(cutoff).await?;
    info!(purged, %cutoff, "correlation records purged");

    let retention_days = ops.config.relay.correlation_retention_days;
    if out.json {
        print_json(&SweepResponse {
            retention_days,
            purged,
        });
    } else {
        println!("Purged {purged} correlation record(s) older than {retention_days} days.");
    }
    Ok(())
}
