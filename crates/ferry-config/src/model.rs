// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so unrecognized keys are
//! rejected at startup with a suggestion instead of being silently ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Ferry configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SQLite storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ferry").join("ferry.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("ferry.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Session/worker scheduling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Capacity given to sessions registered without an explicit one.
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,

    /// Priority given to sessions registered without an explicit one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,

    /// Maximum number of pairs in one worker group.
    #[serde(default = "default_max_pairs_per_group")]
    pub max_pairs_per_group: usize,

    /// Average group fill ratio under which a session's groups are consolidated.
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: f64,

    /// Seconds between worker-group rebalancing passes.
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,

    /// Bound on compare-and-swap retries when the store reports a conflict.
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: u32,
}

impl SchedulerConfig {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            default_priority: default_priority(),
            max_pairs_per_group: default_max_pairs_per_group(),
            consolidation_threshold: default_consolidation_threshold(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
            cas_max_attempts: default_cas_max_attempts(),
        }
    }
}

fn default_capacity() -> u32 {
    30
}

fn default_priority() -> i32 {
    1
}

fn default_max_pairs_per_group() -> usize {
    30
}

fn default_consolidation_threshold() -> f64 {
    0.5
}

fn default_rebalance_interval_secs() -> u64 {
    180
}

fn default_cas_max_attempts() -> u32 {
    32
}

/// Session health probing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// A probe that does not answer within this bound counts as a transient failure.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Consecutive failed probes after which a session is considered unauthorized.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

/// Relay pipeline and correlation retention settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Correlation records older than this are purged.
    #[serde(default = "default_correlation_retention_days")]
    pub correlation_retention_days: u32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long a sequenced event waits for a missing predecessor.
    #[serde(default = "default_reorder_timeout_ms")]
    pub reorder_timeout_ms: u64,

    /// Idle per-message sequencing state is dropped after this long.
    #[serde(default = "default_sequencer_idle_secs")]
    pub sequencer_idle_secs: u64,

    /// Bound on a single platform call.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,

    /// Formatted text longer than this is truncated.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

impl RelayConfig {
    pub fn retention(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(i64::from(self.correlation_retention_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reorder_timeout(&self) -> Duration {
        Duration::from_millis(self.reorder_timeout_ms)
    }

    pub fn sequencer_idle(&self) -> Duration {
        Duration::from_secs(self.sequencer_idle_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            correlation_retention_days: default_correlation_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            reorder_timeout_ms: default_reorder_timeout_ms(),
            sequencer_idle_secs: default_sequencer_idle_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            max_text_length: default_max_text_length(),
        }
    }
}

fn default_correlation_retention_days() -> u32 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    86_400
}

fn default_reorder_timeout_ms() -> u64 {
    5_000
}

fn default_sequencer_idle_secs() -> u64 {
    3_600
}

fn default_delivery_timeout_secs() -> u64 {
    30
}

fn default_max_text_length() -> usize {
    4_000
}
