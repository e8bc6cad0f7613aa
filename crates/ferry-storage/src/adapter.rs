// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the credential and correlation stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use ferry_config::model::StorageConfig;
use ferry_core::{
    AdapterType, ChangeOutcome, CorrelationRecord, CorrelationStore, CredentialStore, FerryError,
    ForwardingPair, HealthState, HealthStatus, Hop, InsertOutcome, MessageId, NewPair, PairId,
    PluginAdapter, SessionChange, SessionRecord,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed store.
///
/// The database is opened lazily by [`SqliteStore::initialize`]; every
/// other call fails until then.
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// Create a store for the configured database. Nothing is opened yet.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Wrap an already opened database.
    pub fn from_database(db: Database) -> Self {
        Self {
            config: StorageConfig {
                database_path: ":memory:".to_string(),
                wal_mode: false,
            },
            db: OnceCell::new_with(Some(db)),
        }
    }

    /// Open the database, apply PRAGMAs and migrations.
    pub async fn initialize(&self) -> Result<(), FerryError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| FerryError::InvalidState("storage already initialized".into()))?;
        debug!(path = %self.config.database_path, "SQLite store initialized");
        Ok(())
    }

    fn db(&self) -> Result<&Database, FerryError> {
        self.db.get().ok_or_else(|| FerryError::Storage {
            source: "storage not initialized, call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, FerryError> {
        self.db()?
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FerryError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn insert_session(&self, session: &SessionRecord) -> Result<(), FerryError> {
        queries::sessions::insert_session(self.db()?, session).await
    }

    async fn get_session(&self, name: &str) -> Result<Option<SessionRecord>, FerryError> {
        queries::sessions::get_session(self.db()?, name).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, FerryError> {
        queries::sessions::list_sessions(self.db()?).await
    }

    async fn update_session_health(
        &self,
        name: &str,
        state: HealthState,
        probed_at: Option<DateTime<Utc>>,
    ) -> Result<(), FerryError> {
        queries::sessions::update_session_health(self.db()?, name, state, probed_at).await
    }

    async fn insert_pair(&self, pair: &NewPair) -> Result<ForwardingPair, FerryError> {
        queries::pairs::insert_pair(self.db()?, pair).await
    }

    async fn get_pair(&self, id: PairId) -> Result<Option<ForwardingPair>, FerryError> {
        queries::pairs::get_pair(self.db()?, id).await
    }

    async fn list_pairs(&self) -> Result<Vec<ForwardingPair>, FerryError> {
        queries::pairs::list_pairs(self.db()?).await
    }

    async fn list_pairs_by_session(&self, name: &str) -> Result<Vec<ForwardingPair>, FerryError> {
        queries::pairs::list_pairs_by_session(self.db()?, name).await
    }

    async fn set_pair_session(&self, change: &SessionChange) -> Result<ChangeOutcome, FerryError> {
        queries::pairs::set_pair_session(self.db()?, change).await
    }

    async fn set_pair_enabled(&self, id: PairId, enabled: bool) -> Result<(), FerryError> {
        queries::pairs::set_pair_enabled(self.db()?, id, enabled).await
    }

    async fn record_pair_activity(&self, id: PairId, at: DateTime<Utc>) -> Result<(), FerryError> {
        queries::pairs::record_pair_activity(self.db()?, id, at).await
    }
}

#[async_trait]
impl CorrelationStore for SqliteStore {
    async fn get_correlation(
        &self,
        pair_id: PairId,
        source: &MessageId,
    ) -> Result<Option<CorrelationRecord>, FerryError> {
        queries::correlations::get_correlation(self.db()?, pair_id, source).await
    }

    async fn insert_correlation(
        &self,
        record: &CorrelationRecord,
    ) -> Result<InsertOutcome, FerryError> {
        queries::correlations::insert_correlation(self.db()?, record).await
    }

    async fn set_destination_id(
        &self,
        pair_id: PairId,
        source: &MessageId,
        destination: &MessageId,
    ) -> Result<(), FerryError> {
        queries::correlations::set_destination_id(self.db()?, pair_id, source, destination).await
    }

    async fn clear_hop(
        &self,
        pair_id: PairId,
        source: &MessageId,
        hop: Hop,
    ) -> Result<(), FerryError> {
        queries::correlations::clear_hop(self.db()?, pair_id, source, hop).await
    }

    async fn purge_correlations(&self, older_than: DateTime<Utc>) -> Result<u64, FerryError> {
        queries::correlations::purge_correlations(self.db()?, older_than).await
    }
}
