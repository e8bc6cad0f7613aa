// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store and scheduler wiring shared by the operator commands.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_config::model::FerryConfig;
use ferry_core::{FerryError, HealthProber, PluginAdapter, ProbeOutcome};
use ferry_scheduler::Scheduler;
use ferry_storage::SqliteStore;

/// Prober for one-shot commands, which never hold a platform connection.
///
/// Every probe reports a transient error, so a single probe never
/// verifies a session from the command line.
struct OfflineProber;

#[async_trait]
impl HealthProber for OfflineProber {
    async fn probe(&self, _session: &str) -> Result<ProbeOutcome, FerryError> {
        Ok(ProbeOutcome::Error {
            reason: "probing needs a running platform connection".into(),
        })
    }
}

/// An opened store plus a scheduler loaded from it.
pub struct Ops {
    pub config: FerryConfig,
    pub store: Arc<SqliteStore>,
    pub scheduler: Scheduler,
}

impl Ops {
    /// Open the configured database and rebuild the session table.
    pub async fn open(config: FerryConfig) -> Result<Self, FerryError> {
        let store = Arc::new(SqliteStore::new(config.storage.clone()));
        store.initialize().await?;

        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(OfflineProber),
            config.scheduler.clone(),
            config.health.clone(),
        );
        scheduler.load().await?;

        Ok(Self {
            config,
            store,
            scheduler,
        })
    }

    /// Checkpoint the WAL before exit.
    pub async fn close(&self) -> Result<(), FerryError> {
        self.store.shutdown().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Config pointing at a fresh database inside `dir`.
    pub(crate) fn config_in(dir: &tempfile::TempDir) -> FerryConfig {
        let mut config = FerryConfig::default();
        config.storage.database_path = dir.path().join("ferry.db").to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn open_creates_database_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let ops = Ops::open(config_in(&dir)).await.unwrap();
        ops.scheduler
            .register_session("main", Some(4), None)
            .await
            .unwrap();
        ops.close().await.unwrap();
        drop(ops);

        let ops = Ops::open(config_in(&dir)).await.unwrap();
        let sessions = ops.scheduler.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "main");
        assert_eq!(sessions[0].capacity, 4);
    }

    #[tokio::test]
    async fn offline_probe_leaves_session_unverified() {
        let dir = tempfile::tempdir().unwrap();
        let ops = Ops::open(config_in(&dir)).await.unwrap();
        ops.scheduler
            .register_session("main", None, None)
            .await
            .unwrap();

        let state = ops.scheduler.probe_health("main").await.unwrap();
        assert_eq!(state, ferry_core::HealthState::Unverified);
    }
}
