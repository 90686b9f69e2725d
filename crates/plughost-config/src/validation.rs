// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::PlughostConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validates a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &PlughostConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    if config.plugins.directory.trim().is_empty() {
        invalid("plugins.directory must not be empty".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        invalid("storage.database_path must not be empty".to_string());
    }

    for (key, value) in [
        ("plugins.timeout_secs", config.plugins.timeout_secs),
        ("plugins.epoch_tick_ms", config.plugins.epoch_tick_ms),
        ("plugins.watch_debounce_ms", config.plugins.watch_debounce_ms),
        ("health.interval_secs", config.health.interval_secs),
        ("health.timeout_secs", config.health.timeout_secs),
    ] {
        if value == 0 {
            invalid(format!("{key} must be greater than 0"));
        }
    }

    if config.plugins.max_concurrent_calls == 0 {
        invalid("plugins.max_concurrent_calls must be at least 1".to_string());
    }

    if config.plugins.memory_limit_mb == 0 {
        invalid("plugins.memory_limit_mb must be at least 1".to_string());
    }

    if config.plugins.fuel_per_call == Some(0) {
        invalid("plugins.fuel_per_call must be greater than 0 when set".to_string());
    }

    if config.plugins.epoch_tick_ms >= config.plugins.timeout_secs.saturating_mul(1000)
        && config.plugins.timeout_secs > 0
    {
        invalid(format!(
            "plugins.epoch_tick_ms ({}) must be shorter than plugins.timeout_secs ({}s)",
            config.plugins.epoch_tick_ms, config.plugins.timeout_secs
        ));
    }

    if config.health.healthy_threshold == 0 || config.health.unhealthy_threshold == 0 {
        invalid("health thresholds must be at least 1".to_string());
    }

    let level = config.log.level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        invalid(format!(
            "log.level `{}` is not one of {}",
            config.log.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
