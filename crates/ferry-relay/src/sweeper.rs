// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background correlation retention sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::RelayPipeline;

/// Runs [`RelayPipeline::sweep`] on a fixed interval.
pub struct RetentionSweeper {
    pipeline: Arc<RelayPipeline>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(pipeline: Arc<RelayPipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Sweep until `cancel` fires. The first sweep happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "retention sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.pipeline.sweep().await {
                        Ok(report) if report.purged_records > 0 || report.dropped_pending > 0 => {
                            info!(
                                purged = report.purged_records,
                                dropped_pending = report.dropped_pending,
                                pruned_gates = report.pruned_gates,
                                "expired correlation state removed"
                            );
                        }
                        Ok(report) => {
                            debug!(pruned_gates = report.pruned_gates, "retention sweep found nothing to purge");
                        }
                        Err(e) => warn!(error = %e, "retention sweep failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("retention sweeper shutting down");
                    break;
                }
            }
        }
    }
}
