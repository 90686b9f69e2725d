// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The plugin manager.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use plughost_bundle::{render_manifest, validate_manifest, Bundle, BundleRegistry};
use plughost_core::{
    Arg, CallContext, CallOutput, HealthReport, ModuleDigest, NewPlugin, PluginError, PluginId,
    PluginManifest, PluginSnapshot, PluginStatus, PluginStore, SandboxInstance, SandboxRuntime,
    Value,
};
use plughost_metrics::{MetricsSnapshot, PluginMetrics};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::handle::{timestamp, PluginHandle};
use crate::saga::Saga;

pub(crate) type HandleTable = DashMap<PluginId, Arc<PluginHandle>>;

/// A module read from a bundle, compiled and instantiated, not yet visible
/// to callers.
pub(crate) struct Prepared {
    pub bundle: Bundle,
    pub digest: ModuleDigest,
    pub instance: Arc<dyn SandboxInstance>,
}

/// Coordinates bundles, persistence and the sandbox for every plugin.
///
/// Build one per process and share it behind an `Arc`.
pub struct PluginManager {
    pub(crate) handles: Arc<HandleTable>,
    pub(crate) store: Arc<dyn PluginStore>,
    pub(crate) bundles: BundleRegistry,
    pub(crate) runtime: Arc<dyn SandboxRuntime>,
    call_slots: Arc<Semaphore>,
    config: ManagerConfig,
    pub(crate) metrics: PluginMetrics,
    /// Serializes recounts of the active-plugin gauge.
    active_gauge: Mutex<()>,
}

fn join_error(e: tokio::task::JoinError) -> PluginError {
    PluginError::Internal(format!("sandbox task failed: {e}"))
}

fn timeout_error(export: &str, ctx: &CallContext) -> PluginError {
    PluginError::ExecutionTimeout {
        plugin: None,
        export: export.to_string(),
        timeout: ctx.timeout,
    }
}

fn same_instance(a: &Arc<dyn SandboxInstance>, b: &Arc<dyn SandboxInstance>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl PluginManager {
    pub fn new(
        store: Arc<dyn PluginStore>,
        bundles: BundleRegistry,
        runtime: Arc<dyn SandboxRuntime>,
        config: ManagerConfig,
    ) -> Self {
        let permits = config.max_concurrent_calls.max(1);
        Self {
            handles: Arc::new(DashMap::new()),
            store,
            bundles,
            runtime,
            call_slots: Arc::new(Semaphore::new(permits)),
            config,
            metrics: PluginMetrics::new(),
            active_gauge: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn bundles(&self) -> &BundleRegistry {
        &self.bundles
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Installs a plugin and makes it active.
    ///
    /// Steps: persist an `installed` row, write the bundle, compile and
    /// instantiate, then mark the row active. Any failure undoes the steps
    /// taken so far, newest first, and returns the original error.
    pub async fn install(
        &self,
        manifest: PluginManifest,
        wasm: Vec<u8>,
    ) -> Result<PluginId, PluginError> {
        validate_manifest(&manifest)?;
        if let Some(existing) = self
            .store
            .find_by_name_version_description(
                &manifest.name,
                &manifest.version,
                &manifest.description,
            )
            .await?
        {
            return Err(PluginError::AlreadyExists {
                name: manifest.name,
                version: manifest.version,
                existing: Some(existing.id),
            });
        }

        let manifest_toml = render_manifest(&manifest)?;
        let record = self
            .store
            .insert(&NewPlugin::from_manifest(&manifest, manifest_toml))
            .await?;
        let id = record.id;

        let mut saga = Saga::new("install");
        let store = self.store.clone();
        saga.on_rollback("delete row", async move { store.delete(id).await.map(|_| ()) });

        let name = manifest.name.clone();
        match self.install_steps(&mut saga, record, manifest, wasm).await {
            Ok(()) => {
                saga.commit();
                self.metrics.install();
                self.refresh_active();
                info!(plugin_id = %id, name = %name, "plugin installed");
                Ok(id)
            }
            Err(e) => {
                let e = e.with_plugin(id);
                warn!(
                    plugin_id = %id,
                    name = %name,
                    steps = saga.len(),
                    error = %e,
                    "install failed, rolling back"
                );
                saga.rollback().await;
                Err(e)
            }
        }
    }

    async fn install_steps(
        &self,
        saga: &mut Saga,
        mut record: plughost_core::PluginRecord,
        manifest: PluginManifest,
        wasm: Vec<u8>,
    ) -> Result<(), PluginError> {
        let id = record.id;

        let path = self.bundles.create_bundle(id, &manifest, &wasm)?;
        let bundles = self.bundles.clone();
        saga.on_rollback("remove bundle", async move { bundles.remove_bundle(id) });

        let bundle_path = path.to_string_lossy().into_owned();
        self.store.set_bundle_path(id, &bundle_path).await?;
        record.bundle_path = bundle_path;

        let digest = self.compile(wasm).await?;
        let (runtime, compiled) = (self.runtime.clone(), digest.clone());
        saga.on_rollback("release module", async move {
            runtime.release(&compiled);
            Ok(())
        });

        let instance = self.instantiate(&digest, &manifest).await?;
        let closing = instance.clone();
        saga.on_rollback("close instance", async move { closing.close() });

        self.store.update_status(id, PluginStatus::Active).await?;
        record.status = PluginStatus::Active;
        record.enabled = true;
        record.updated_at = timestamp();

        self.handles.insert(
            id,
            PluginHandle::new(record, manifest, Some(instance), Some(digest)),
        );
        Ok(())
    }

    /// Removes a plugin: stop admitting calls, drain, close, then delete the
    /// bundle and the row.
    ///
    /// Every step is attempted even if an earlier one fails; failures are
    /// returned together as [`PluginError::Partial`]. The plugin is gone from
    /// memory either way.
    pub async fn uninstall(&self, id: PluginId) -> Result<(), PluginError> {
        let (handle, _guard) = self.lock_handle(id).await?;
        handle.set_status(PluginStatus::Uninstalling);

        let mut errors = Vec::new();
        if let Err(e) = self.store.update_status(id, PluginStatus::Uninstalling).await {
            warn!(plugin_id = %id, error = %e, "failed to persist uninstalling status");
            errors.push(e);
        }

        if !handle.wait_drained(self.config.uninstall_grace).await {
            warn!(
                plugin_id = %id,
                in_flight = handle.in_flight(),
                "calls still running after grace period, cancelling"
            );
            handle.cancel_calls();
        }

        let (instance, digest) = handle.take_instance();
        if let Some(instance) = instance {
            if let Err(e) = instance.close() {
                errors.push(e);
            }
        }
        if let Err(e) = self.bundles.remove_bundle(id) {
            warn!(plugin_id = %id, error = %e, "failed to remove bundle");
            errors.push(e);
        }
        match self.store.delete(id).await {
            Ok(true) => {}
            Ok(false) => debug!(plugin_id = %id, "row was already gone"),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "failed to delete row");
                errors.push(e);
            }
        }

        self.handles.remove(&id);
        if let Some(digest) = digest {
            self.runtime.release(&digest);
        }
        self.metrics.uninstall();
        self.refresh_active();

        if errors.is_empty() {
            info!(plugin_id = %id, "plugin uninstalled");
            Ok(())
        } else {
            Err(PluginError::Partial {
                id,
                operation: "uninstall",
                errors,
            })
        }
    }

    pub async fn enable(&self, id: PluginId) -> Result<(), PluginError> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: PluginId) -> Result<(), PluginError> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: PluginId, enabled: bool) -> Result<(), PluginError> {
        let (handle, _guard) = self.lock_handle(id).await?;
        let target = if enabled {
            PluginStatus::Active
        } else {
            PluginStatus::Disabled
        };

        let current = handle.status();
        if current == PluginStatus::Uninstalling {
            return Err(PluginError::ConcurrentConflict {
                id,
                message: "plugin is being uninstalled".to_string(),
            });
        }
        if current == target {
            debug!(plugin_id = %id, status = %target, "status unchanged");
            return Ok(());
        }

        // A plugin that failed to load at startup has no instance yet.
        if enabled && handle.current_instance().is_none() {
            let prepared = self
                .load_from_bundle(id)
                .await
                .map_err(|e| e.with_plugin(id))?;
            handle.swap_instance(prepared.instance, prepared.digest, prepared.bundle.manifest);
        }

        self.store.update_status(id, target).await?;
        handle.set_status(target);
        self.refresh_active();
        info!(plugin_id = %id, status = %target, "plugin status changed");
        Ok(())
    }

    /// Replaces the running module with the one currently in the bundle.
    ///
    /// The new module is compiled and instantiated while the old one keeps
    /// serving; on failure nothing changes. Calls already running finish on
    /// the old instance.
    pub async fn reload(&self, id: PluginId) -> Result<(), PluginError> {
        let (handle, _guard) = self.lock_handle(id).await?;
        if handle.status() == PluginStatus::Uninstalling {
            return Err(PluginError::ConcurrentConflict {
                id,
                message: "plugin is being uninstalled".to_string(),
            });
        }

        let prepared = match self.load_from_bundle(id).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let e = e.with_plugin(id);
                warn!(plugin_id = %id, error = %e, "reload failed, keeping current instance");
                return Err(e);
            }
        };

        let new_digest = prepared.digest.clone();
        let (old_instance, old_digest) =
            handle.swap_instance(prepared.instance, prepared.digest, prepared.bundle.manifest);
        if let Some(old) = old_instance {
            if let Err(e) = old.close() {
                warn!(plugin_id = %id, error = %e, "failed to close replaced instance");
            }
        }
        if let Some(old_digest) = old_digest {
            self.runtime.release(&old_digest);
        }

        self.metrics.reload();
        info!(plugin_id = %id, digest = %new_digest, "plugin reloaded");
        Ok(())
    }

    /// Calls `export` on an active plugin.
    ///
    /// Waits for a global call slot no longer than the call deadline.
    /// `timeout` overrides the configured default.
    pub async fn invoke(
        &self,
        id: PluginId,
        export: &str,
        args: &[Arg],
        timeout: Option<Duration>,
    ) -> Result<CallOutput, PluginError> {
        let handle = self.handle(id)?;
        let (instance, _in_flight) = handle.admit()?;

        let mut ctx = CallContext::with_timeout(timeout.unwrap_or(self.config.call_timeout));
        ctx.cancel = handle.call_token();
        let _cancel_on_drop = ctx.cancel.clone().drop_guard();

        let started = Instant::now();
        let result = self
            .run_call(&handle, instance, export, args, &ctx)
            .await
            .map_err(|e| e.with_plugin(id));
        let elapsed = started.elapsed();

        handle.record_outcome(&result);
        self.metrics.invocation(
            handle.declares_export(export).then_some(export),
            result.as_ref().err().map(PluginError::code),
            elapsed.as_secs_f64(),
        );
        match &result {
            Ok(_) => debug!(
                plugin_id = %id,
                export,
                elapsed_ms = elapsed.as_millis() as u64,
                "invocation succeeded"
            ),
            Err(e) if e.is_guest_failure() => {
                warn!(plugin_id = %id, export, error = %e, "plugin failed during invocation")
            }
            Err(e) => debug!(plugin_id = %id, export, error = %e, "invocation rejected"),
        }
        result
    }

    async fn run_call(
        &self,
        handle: &PluginHandle,
        instance: Arc<dyn SandboxInstance>,
        export: &str,
        args: &[Arg],
        ctx: &CallContext,
    ) -> Result<CallOutput, PluginError> {
        let deadline = tokio::time::Instant::from_std(ctx.deadline);
        let slot = tokio::time::timeout_at(deadline, self.call_slots.clone().acquire_owned());
        let acquired = tokio::select! {
            acquired = slot => acquired.ok(),
            _ = ctx.cancel.cancelled() => None,
        };
        let _permit = match acquired {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return Err(PluginError::Internal("call semaphore closed".to_string())),
            None => return Err(timeout_error(export, ctx)),
        };

        match instance.call(export, args, ctx).await {
            // Reload closed the instance between admission and the call.
            Err(PluginError::InstanceClosed) => match handle.current_instance() {
                Some(current) if !same_instance(&current, &instance) => {
                    current.call(export, args, ctx).await
                }
                _ => Err(PluginError::InstanceClosed),
            },
            other => other,
        }
    }

    pub fn get_plugin(&self, id: PluginId) -> Result<PluginSnapshot, PluginError> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Snapshots of every known plugin, ordered by id.
    pub fn list_plugins(&self) -> Vec<PluginSnapshot> {
        let mut plugins: Vec<PluginSnapshot> = self
            .handles
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        plugins.sort_by_key(|p| p.id);
        plugins
    }

    pub fn clear_errors(&self, id: PluginId) -> Result<(), PluginError> {
        self.handle(id)?.clear_errors();
        Ok(())
    }

    /// Last recorded health of a plugin.
    pub fn health(&self, id: PluginId) -> Result<HealthReport, PluginError> {
        Ok(self.handle(id)?.health())
    }

    /// Probes a plugin's health export once and updates its health state.
    ///
    /// Plugins without a health export, and disabled plugins, are returned
    /// unchanged. The probe succeeds when the export returns nothing or `0`.
    pub async fn check_now(&self, id: PluginId) -> Result<HealthReport, PluginError> {
        let handle = self.handle(id)?;
        let Some(export) = handle.health_export() else {
            return Ok(handle.health());
        };
        let settings = &self.config.health;

        let outcome = match self.invoke(id, &export, &[], Some(settings.timeout)).await {
            Ok(output) => match output.values.first() {
                None | Some(Value::I32(0)) => Ok(()),
                Some(value) => Err(format!("`{export}` reported {value:?}")),
            },
            Err(PluginError::NotFound(_)) => return Err(PluginError::NotFound(id)),
            Err(PluginError::PluginDisabled(_)) => return Ok(handle.health()),
            Err(e) => Err(e.to_string()),
        };

        let before = handle.health().state;
        let after = handle.record_health(
            outcome,
            settings.healthy_threshold,
            settings.unhealthy_threshold,
        );
        if before != after {
            info!(plugin_id = %id, from = %before, to = %after, "plugin health changed");
        }
        Ok(handle.health())
    }

    /// Probes every active plugin that declares a health export. Returns the
    /// number probed.
    pub async fn check_all(&self) -> usize {
        let ids: Vec<PluginId> = self
            .handles
            .iter()
            .filter(|entry| {
                let handle = entry.value();
                handle.status() == PluginStatus::Active && handle.health_export().is_some()
            })
            .map(|entry| *entry.key())
            .collect();

        let results = futures::future::join_all(ids.iter().map(|id| self.check_now(*id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                debug!(plugin_id = %id, error = %e, "health probe skipped");
            }
        }
        ids.len()
    }

    /// Closes every instance and forgets every plugin. Disk and database are
    /// left untouched so the next start can load them again.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<PluginHandle>> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.handles.clear();

        let grace = self.config.uninstall_grace;
        futures::future::join_all(handles.iter().map(|handle| handle.wait_drained(grace))).await;

        for handle in &handles {
            handle.cancel_calls();
            let (instance, digest) = handle.take_instance();
            if let Some(instance) = instance {
                if let Err(e) = instance.close() {
                    warn!(plugin_id = %handle.id, error = %e, "failed to close instance");
                }
            }
            if let Some(digest) = digest {
                self.runtime.release(&digest);
            }
        }

        self.refresh_active();
        info!(plugins = handles.len(), "plugin manager shut down");
    }

    pub(crate) fn handle(&self, id: PluginId) -> Result<Arc<PluginHandle>, PluginError> {
        self.handles
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(PluginError::NotFound(id))
    }

    /// Digest of the module `id` currently runs.
    pub(crate) fn loaded_digest(
        &self,
        id: PluginId,
    ) -> Result<Option<ModuleDigest>, PluginError> {
        Ok(self.handle(id)?.read().digest.clone())
    }

    /// Takes the lifecycle lock of `id`. Fails with `NotFound` if the plugin
    /// was removed while waiting.
    async fn lock_handle(
        &self,
        id: PluginId,
    ) -> Result<(Arc<PluginHandle>, OwnedMutexGuard<()>), PluginError> {
        let handle = self.handle(id)?;
        let guard = handle.lifecycle.clone().lock_owned().await;
        match self.handles.get(&id).map(|entry| entry.value().clone()) {
            Some(current) if Arc::ptr_eq(&current, &handle) => Ok((handle, guard)),
            _ => Err(PluginError::NotFound(id)),
        }
    }

    pub(crate) async fn compile(&self, wasm: Vec<u8>) -> Result<ModuleDigest, PluginError> {
        let runtime = self.runtime.clone();
        tokio::task::spawn_blocking(move || runtime.compile(&wasm))
            .await
            .map_err(join_error)?
    }

    pub(crate) async fn instantiate(
        &self,
        digest: &ModuleDigest,
        manifest: &PluginManifest,
    ) -> Result<Arc<dyn SandboxInstance>, PluginError> {
        let runtime = self.runtime.clone();
        let digest = digest.clone();
        let limits = self.config.default_limits.narrowed_by(&manifest.resources);
        let exports = manifest.required_exports();
        tokio::task::spawn_blocking(move || runtime.instantiate(&digest, &limits, &exports))
            .await
            .map_err(join_error)?
    }

    /// Reads, compiles and instantiates the bundle of `id`. On success the
    /// returned digest holds one pin, which its new owner must release.
    pub(crate) async fn load_from_bundle(&self, id: PluginId) -> Result<Prepared, PluginError> {
        let mut bundle = self.bundles.read_bundle(id)?;
        validate_manifest(&bundle.manifest)?;
        let digest = self.compile(std::mem::take(&mut bundle.wasm)).await?;
        match self.instantiate(&digest, &bundle.manifest).await {
            Ok(instance) => Ok(Prepared {
                bundle,
                digest,
                instance,
            }),
            Err(e) => {
                self.runtime.release(&digest);
                Err(e)
            }
        }
    }

    /// Recounts active plugins. The count and the store happen under one
    /// lock, so the last refresh always publishes the latest table state.
    pub(crate) fn refresh_active(&self) {
        let _gauge = self
            .active_gauge
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let active = self
            .handles
            .iter()
            .filter(|entry| entry.value().status() == PluginStatus::Active)
            .count();
        self.metrics.set_active(active as u64);
    }
}
