// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime settings of the manager, derived from [`PlughostConfig`].

use std::time::Duration;

use plughost_config::PlughostConfig;
use plughost_core::ResourceLimits;

/// Health probing settings.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// Bundle watcher settings.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub enabled: bool,
    pub debounce: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline applied to calls that do not pass their own.
    pub call_timeout: Duration,
    /// Permits of the global call semaphore.
    pub max_concurrent_calls: usize,
    /// How long uninstall and shutdown wait for running calls.
    pub uninstall_grace: Duration,
    /// Host limits; manifests may only narrow them.
    pub default_limits: ResourceLimits,
    pub autoload: bool,
    pub health: HealthSettings,
    pub watch: WatchSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_concurrent_calls: 16,
            uninstall_grace: Duration::from_secs(10),
            default_limits: ResourceLimits::default(),
            autoload: true,
            health: HealthSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl From<&PlughostConfig> for ManagerConfig {
    fn from(config: &PlughostConfig) -> Self {
        let plugins = &config.plugins;
        let health = &config.health;
        Self {
            call_timeout: plugins.timeout(),
            max_concurrent_calls: plugins.max_concurrent_calls,
            uninstall_grace: plugins.uninstall_grace(),
            default_limits: ResourceLimits {
                memory_bytes: plugins.memory_limit_bytes(),
                fuel: plugins.fuel_per_call,
            },
            autoload: plugins.autoload,
            health: HealthSettings {
                enabled: health.enabled,
                interval: Duration::from_secs(health.interval_secs),
                timeout: Duration::from_secs(health.timeout_secs),
                healthy_threshold: health.healthy_threshold,
                unhealthy_threshold: health.unhealthy_threshold,
            },
            watch: WatchSettings {
                enabled: plugins.watch,
                debounce: plugins.watch_debounce(),
            },
        }
    }
}
