// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model. Every struct rejects unknown keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level plughost configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlughostConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

/// Plugin directory, call limits, and sandbox tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Root of the bundle tree.
    #[serde(default = "default_plugins_directory")]
    pub directory: String,

    /// Load persisted plugins at startup.
    #[serde(default = "default_true")]
    pub autoload: bool,

    /// Default per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Calls allowed to run at once across all plugins.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// How long uninstall waits for in-flight calls to drain.
    #[serde(default = "default_uninstall_grace_secs")]
    pub uninstall_grace_secs: u64,

    /// Linear memory ceiling per call.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,

    /// Fuel per call. Unset means calls are bounded by time only.
    #[serde(default)]
    pub fuel_per_call: Option<u64>,

    /// Epoch ticker period; bounds timeout precision.
    #[serde(default = "default_epoch_tick_ms")]
    pub epoch_tick_ms: u64,

    /// Reload a plugin when its `plugin.wasm` changes on disk.
    #[serde(default)]
    pub watch: bool,

    /// Quiet period before a burst of file events triggers a reload.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugins_directory(),
            autoload: true,
            timeout_secs: default_timeout_secs(),
            max_concurrent_calls: default_max_concurrent_calls(),
            uninstall_grace_secs: default_uninstall_grace_secs(),
            memory_limit_mb: default_memory_limit_mb(),
            fuel_per_call: None,
            epoch_tick_ms: default_epoch_tick_ms(),
            watch: false,
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

impl PluginsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn uninstall_grace(&self) -> Duration {
        Duration::from_secs(self.uninstall_grace_secs)
    }

    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        u64::from(self.memory_limit_mb) * 1024 * 1024
    }
}

fn default_plugins_directory() -> String {
    "./plugins".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_uninstall_grace_secs() -> u64 {
    10
}

fn default_memory_limit_mb() -> u32 {
    64
}

fn default_epoch_tick_ms() -> u64 {
    10
}

fn default_watch_debounce_ms() -> u64 {
    500
}

/// SQLite persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "./plughost.db".to_string()
}

/// Logging output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// trace, debug, info, warn or error. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Periodic health probing of plugins that declare a health export.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    /// Timeout of a single probe.
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    /// Consecutive successes before a plugin is marked healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Consecutive failures before a plugin is marked unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}
