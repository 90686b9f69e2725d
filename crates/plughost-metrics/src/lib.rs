// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin host metrics.
//!
//! [`PluginMetrics`] keeps atomic counters that callers read as a
//! [`MetricsSnapshot`], and mirrors every update into the `metrics` facade.

pub mod recording;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use recording::register_metrics;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub installs: u64,
    pub uninstalls: u64,
    pub reloads: u64,
    pub invocations: u64,
    pub invocation_errors: u64,
    pub active_plugins: u64,
}

/// Counters owned by one plugin manager.
#[derive(Debug, Default)]
pub struct PluginMetrics {
    installs: AtomicU64,
    uninstalls: AtomicU64,
    reloads: AtomicU64,
    invocations: AtomicU64,
    invocation_errors: AtomicU64,
    active_plugins: AtomicU64,
}

impl PluginMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) {
        self.installs.fetch_add(1, Ordering::Relaxed);
        recording::record_install();
    }

    pub fn uninstall(&self) {
        self.uninstalls.fetch_add(1, Ordering::Relaxed);
        recording::record_uninstall();
    }

    pub fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        recording::record_reload();
    }

    /// Counts one finished invocation. Pass `export` only when the plugin's
    /// manifest declares it.
    pub fn invocation(&self, export: Option<&str>, error_code: Option<&'static str>, seconds: f64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if error_code.is_some() {
            self.invocation_errors.fetch_add(1, Ordering::Relaxed);
        }
        recording::record_invocation(export, error_code, seconds);
    }

    /// Overwrites the active-plugin gauge.
    pub fn set_active(&self, count: u64) {
        self.active_plugins.store(count, Ordering::Relaxed);
        recording::set_active_plugins(count);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            installs: self.installs.load(Ordering::Relaxed),
            uninstalls: self.uninstalls.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            invocation_errors: self.invocation_errors.load(Ordering::Relaxed),
            active_plugins: self.active_plugins.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_work_without_a_recorder() {
        register_metrics();
        let metrics = PluginMetrics::new();
        metrics.install();
        metrics.install();
        metrics.uninstall();
        metrics.reload();
        metrics.invocation(Some("ping"), None, 0.001);
        metrics.invocation(None, Some("invalid_arguments"), 0.002);
        metrics.set_active(1);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                installs: 2,
                uninstalls: 1,
                reloads: 1,
                invocations: 2,
                invocation_errors: 1,
                active_plugins: 1,
            }
        );
    }

    #[test]
    fn snapshot_serializes_flat() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert_eq!(json["active_plugins"], 0);
        assert_eq!(json.as_object().unwrap().len(), 6);
    }
}
