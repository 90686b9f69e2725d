// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health classification and the periodic probe loop.

use std::sync::Arc;

use chrono::Utc;
use plughost_core::{HealthReport, HealthState};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::manager::PluginManager;

/// Consecutive-outcome counter behind a plugin's [`HealthState`].
///
/// The state only changes once a threshold of identical outcomes is reached;
/// until then the previous classification (initially `Unknown`) is kept.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    state: HealthState,
    successes: u32,
    failures: u32,
    last_checked: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            successes: 0,
            failures: 0,
            last_checked: None,
            last_error: None,
        }
    }
}

impl HealthTracker {
    pub fn record(
        &mut self,
        outcome: Result<(), String>,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> HealthState {
        self.last_checked = Some(Utc::now());
        match outcome {
            Ok(()) => {
                self.successes = self.successes.saturating_add(1);
                self.failures = 0;
                self.last_error = None;
                if self.successes >= healthy_threshold {
                    self.state = HealthState::Healthy;
                }
            }
            Err(message) => {
                self.failures = self.failures.saturating_add(1);
                self.successes = 0;
                self.last_error = Some(message);
                if self.failures >= unhealthy_threshold {
                    self.state = HealthState::Unhealthy;
                }
            }
        }
        self.state
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            state: self.state,
            consecutive_successes: self.successes,
            consecutive_failures: self.failures,
            last_checked: self.last_checked,
            last_error: self.last_error.clone(),
        }
    }
}

/// Background task probing every active plugin that declares a health export.
pub struct HealthMonitor;

impl HealthMonitor {
    /// Starts the probe loop. The first round runs one interval after start;
    /// the task exits when `cancel` fires.
    pub fn spawn(manager: Arc<PluginManager>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = manager.config().health.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "health monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let probed = manager.check_all().await;
                        debug!(probed, "health round finished");
                    }
                    _ = cancel.cancelled() => {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}
