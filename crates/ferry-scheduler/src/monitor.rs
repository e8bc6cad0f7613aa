// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background loops: periodic health probing and worker-group rebalancing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;

/// Probes every non-terminal session on a fixed interval.
pub struct HealthMonitor {
    scheduler: Arc<Scheduler>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let interval = scheduler.health_config().probe_interval();
        Self {
            scheduler,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Probe all sessions once, concurrently. Returns how many probes ran.
    ///
    /// Probes of different sessions run in parallel; a slow session delays
    /// only itself, up to the configured probe timeout.
    pub async fn tick(&self) -> usize {
        let targets = self.scheduler.probe_targets();
        let mut probes = JoinSet::new();
        for session in targets {
            let scheduler = self.scheduler.clone();
            probes.spawn(async move {
                let result = scheduler.probe_health(&session).await;
                (session, result)
            });
        }

        let mut ran = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((session, Ok(state))) => {
                    ran += 1;
                    debug!(session = %session, state = %state, "probe complete");
                }
                Ok((session, Err(e))) => {
                    ran += 1;
                    warn!(session = %session, error = %e, "probe could not be applied");
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        ran
    }

    /// Run until `cancel` fires. The first tick happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "health monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = cancel.cancelled() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Recompute worker groups on `interval` until `cancel` fires.
pub async fn run_rebalance_loop(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(interval);
    // Skip the first immediate tick; groups were just built by `load`.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match scheduler.rebalance().await {
                    Ok(report) if !report.consolidated.is_empty() => {
                        info!(
                            sessions = ?report.consolidated,
                            groups_before = report.groups_before,
                            groups_after = report.groups_after,
                            "worker groups consolidated"
                        );
                    }
                    Ok(_) => debug!("rebalance pass made no changes"),
                    Err(e) => warn!(error = %e, "rebalance failed (non-fatal)"),
                }
            }
            _ = cancel.cancelled() => {
                info!("rebalance loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::model::{HealthConfig, SchedulerConfig};
    use ferry_core::{HealthState, ProbeOutcome};
    use ferry_test_utils::{MemoryStore, ScriptedProber};

    #[tokio::test]
    async fn tick_skips_terminal_sessions() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("ok", 5, 1, HealthState::Unverified);
        store.seed_session("gone", 5, 1, HealthState::Unauthorized);
        let prober = Arc::new(ScriptedProber::new());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            prober.clone(),
            SchedulerConfig::default(),
            HealthConfig::default(),
        ));
        scheduler.load().await.unwrap();

        let monitor = HealthMonitor::new(scheduler.clone());
        assert_eq!(monitor.tick().await, 1);
        assert_eq!(prober.calls(), vec!["ok".to_string()]);
        assert_eq!(scheduler.health_of("ok"), Some(HealthState::Healthy));
    }

    #[tokio::test(start_paused = true)]
    async fn run_probes_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store.seed_session("s1", 5, 1, HealthState::Healthy);
        let prober = Arc::new(ScriptedProber::new());
        prober.set_fallback(
            "s1",
            ProbeOutcome::Error {
                reason: "flood wait".into(),
            },
        );
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            prober.clone(),
            SchedulerConfig::default(),
            HealthConfig {
                failure_threshold: 3,
                ..HealthConfig::default()
            },
        ));
        scheduler.load().await.unwrap();

        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(scheduler.clone()).with_interval(Duration::from_secs(10));
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Ticks at 0s, 10s and 20s.
        assert_eq!(prober.calls().len(), 3);
        assert_eq!(scheduler.health_of("s1"), Some(HealthState::Unauthorized));
    }
}
