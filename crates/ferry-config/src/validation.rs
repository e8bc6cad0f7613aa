// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks ranges and relationships that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::FerryConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// Returns every problem found rather than failing on the first.
pub fn validate_config(config: &FerryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "logging.level `{}` is not one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.default_capacity == 0 {
        errors.push(ConfigError::validation(
            "scheduler.default_capacity must be at least 1",
        ));
    }
    if scheduler.max_pairs_per_group == 0 {
        errors.push(ConfigError::validation(
            "scheduler.max_pairs_per_group must be at least 1",
        ));
    }
    if !(scheduler.consolidation_threshold > 0.0 && scheduler.consolidation_threshold <= 1.0) {
        errors.push(ConfigError::validation(format!(
            "scheduler.consolidation_threshold must be in (0.0, 1.0], got {}",
            scheduler.consolidation_threshold
        )));
    }
    if scheduler.rebalance_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "scheduler.rebalance_interval_secs must be greater than 0",
        ));
    }
    if scheduler.cas_max_attempts == 0 {
        errors.push(ConfigError::validation(
            "scheduler.cas_max_attempts must be at least 1",
        ));
    }

    let health = &config.health;
    if health.probe_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "health.probe_interval_secs must be greater than 0",
        ));
    }
    if health.probe_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "health.probe_timeout_secs must be greater than 0",
        ));
    }
    if health.failure_threshold == 0 {
        errors.push(ConfigError::validation(
            "health.failure_threshold must be at least 1",
        ));
    }

    let relay = &config.relay;
    if relay.correlation_retention_days == 0 {
        errors.push(ConfigError::validation(
            "relay.correlation_retention_days must be at least 1",
        ));
    }
    for (key, value) in [
        ("relay.sweep_interval_secs", relay.sweep_interval_secs),
        ("relay.reorder_timeout_ms", relay.reorder_timeout_ms),
        ("relay.sequencer_idle_secs", relay.sequencer_idle_secs),
        ("relay.delivery_timeout_secs", relay.delivery_timeout_secs),
    ] {
        if value == 0 {
            errors.push(ConfigError::validation(format!(
                "{key} must be greater than 0"
            )));
        }
    }
    if relay.max_text_length == 0 {
        errors.push(ConfigError::validation(
            "relay.max_text_length must be at least 1",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &FerryConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&FerryConfig::default()).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = FerryConfig::default();
        config.storage.database_path = "  ".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("database_path")));
    }

    #[test]
    fn consolidation_threshold_must_be_a_ratio() {
        let mut config = FerryConfig::default();
        config.scheduler.consolidation_threshold = 1.5;
        assert!(
            messages(&config)
                .iter()
                .any(|m| m.contains("consolidation_threshold"))
        );

        config.scheduler.consolidation_threshold = 1.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = FerryConfig::default();
        config.logging.level = "loud".to_string();
        config.health.failure_threshold = 0;
        config.relay.reorder_timeout_ms = 0;
        config.scheduler.default_capacity = 0;

        let found = messages(&config);
        assert_eq!(found.len(), 4, "{found:?}");
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let mut config = FerryConfig::default();
        config.logging.level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
