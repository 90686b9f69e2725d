// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory state of one plugin.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use plughost_core::{
    CallOutput, ErrorEntry, HealthReport, HealthState, ModuleDigest, PluginError, PluginId,
    PluginManifest, PluginRecord, PluginSnapshot, PluginStatus, SandboxInstance,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::health::HealthTracker;

/// Errors kept per plugin for diagnostics.
pub(crate) const RECENT_ERRORS: usize = 10;

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) struct HandleState {
    pub record: PluginRecord,
    pub manifest: PluginManifest,
    pub instance: Option<Arc<dyn SandboxInstance>>,
    pub digest: Option<ModuleDigest>,
}

#[derive(Default)]
struct Stats {
    invocations: u64,
    errors: u64,
    recent: VecDeque<ErrorEntry>,
    health: HealthTracker,
}

pub(crate) struct PluginHandle {
    pub id: PluginId,
    /// Serializes install, enable, disable, reload and uninstall of this id.
    pub lifecycle: Arc<tokio::sync::Mutex<()>>,
    state: RwLock<HandleState>,
    in_flight: AtomicUsize,
    drained: Notify,
    /// Parent of every call's cancellation token.
    calls: CancellationToken,
    stats: Mutex<Stats>,
}

/// Keeps a call counted as in flight until dropped.
pub(crate) struct InFlight(Arc<PluginHandle>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl PluginHandle {
    pub fn new(
        record: PluginRecord,
        manifest: PluginManifest,
        instance: Option<Arc<dyn SandboxInstance>>,
        digest: Option<ModuleDigest>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: record.id,
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
            state: RwLock::new(HandleState {
                record,
                manifest,
                instance,
                digest,
            }),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            calls: CancellationToken::new(),
            stats: Mutex::new(Stats::default()),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PluginStatus {
        self.read().record.status
    }

    pub fn set_status(&self, status: PluginStatus) -> PluginStatus {
        let mut state = self.write();
        let previous = state.record.status;
        state.record.status = status;
        state.record.enabled = status.is_enabled();
        state.record.updated_at = timestamp();
        previous
    }

    pub fn health_export(&self) -> Option<String> {
        self.read().manifest.health_export.clone()
    }

    pub fn declares_export(&self, export: &str) -> bool {
        self.read().manifest.declares(export)
    }

    pub fn current_instance(&self) -> Option<Arc<dyn SandboxInstance>> {
        self.read().instance.clone()
    }

    /// Admits one call: the plugin must be active. The status check and the
    /// in-flight increment happen under the same read lock, so once a writer
    /// flips the status no new call can slip in.
    pub fn admit(self: &Arc<Self>) -> Result<(Arc<dyn SandboxInstance>, InFlight), PluginError> {
        let state = self.read();
        match state.record.status {
            PluginStatus::Active => {}
            PluginStatus::Disabled => return Err(PluginError::PluginDisabled(self.id)),
            PluginStatus::Installed | PluginStatus::Uninstalling => {
                return Err(PluginError::NotFound(self.id));
            }
        }
        let instance = state
            .instance
            .clone()
            .ok_or_else(|| {
                PluginError::Internal(format!("active plugin {} has no instance", self.id))
            })?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok((instance, InFlight(self.clone())))
    }

    pub fn call_token(&self) -> CancellationToken {
        self.calls.child_token()
    }

    /// Cancels every running call of this plugin.
    pub fn cancel_calls(&self) {
        self.calls.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no call is in flight. False if `grace` elapsed first.
    pub async fn wait_drained(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    /// Installs a new instance and returns the previous one with its digest.
    pub fn swap_instance(
        &self,
        instance: Arc<dyn SandboxInstance>,
        digest: ModuleDigest,
        manifest: PluginManifest,
    ) -> (Option<Arc<dyn SandboxInstance>>, Option<ModuleDigest>) {
        let mut state = self.write();
        state.manifest = manifest;
        state.record.updated_at = timestamp();
        let old_instance = state.instance.replace(instance);
        let old_digest = state.digest.replace(digest);
        (old_instance, old_digest)
    }

    pub fn take_instance(&self) -> (Option<Arc<dyn SandboxInstance>>, Option<ModuleDigest>) {
        let mut state = self.write();
        (state.instance.take(), state.digest.take())
    }

    pub fn record_outcome(&self, result: &Result<CallOutput, PluginError>) {
        let mut stats = self.stats();
        stats.invocations += 1;
        if let Err(e) = result {
            stats.errors += 1;
            push_error(&mut stats.recent, e);
        }
    }

    /// Records a failure that happened outside a call, such as a failed load.
    pub fn record_error(&self, error: &PluginError) {
        let mut stats = self.stats();
        stats.errors += 1;
        push_error(&mut stats.recent, error);
    }

    pub fn clear_errors(&self) {
        let mut stats = self.stats();
        stats.errors = 0;
        stats.recent.clear();
    }

    pub fn record_health(
        &self,
        outcome: Result<(), String>,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> HealthState {
        self.stats()
            .health
            .record(outcome, healthy_threshold, unhealthy_threshold)
    }

    pub fn health(&self) -> HealthReport {
        self.stats().health.report()
    }

    pub fn snapshot(&self) -> PluginSnapshot {
        let state = self.read();
        let stats = self.stats();
        let record = &state.record;
        PluginSnapshot {
            id: record.id,
            name: record.name.clone(),
            version: record.version.clone(),
            description: record.description.clone(),
            author: record.author.clone(),
            enabled: record.enabled,
            status: record.status,
            bundle_path: PathBuf::from(&record.bundle_path),
            manifest: state.manifest.clone(),
            loaded: state.instance.is_some(),
            installed_at: record.installed_at.clone(),
            updated_at: record.updated_at.clone(),
            invocation_count: stats.invocations,
            error_count: stats.errors,
            recent_errors: stats.recent.iter().cloned().collect(),
            health: stats.health.report(),
        }
    }
}

fn push_error(recent: &mut VecDeque<ErrorEntry>, error: &PluginError) {
    if recent.len() == RECENT_ERRORS {
        recent.pop_front();
    }
    recent.push_back(ErrorEntry {
        code: error.code().to_string(),
        message: error.to_string(),
        at: Utc::now(),
    });
}
