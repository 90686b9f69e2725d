// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Startup loading of persisted plugins and crash reconciliation.

use std::collections::HashSet;

use plughost_bundle::parse_manifest;
use plughost_core::{
    PluginError, PluginId, PluginManifest, PluginRecord, PluginStatus, ResourceHints,
};
use tracing::{info, warn};

use crate::handle::PluginHandle;
use crate::manager::PluginManager;

/// Outcome of [`PluginManager::load_persisted`].
#[derive(Debug, Default)]
pub struct AutoloadReport {
    /// Plugins registered with a live instance.
    pub loaded: Vec<PluginId>,
    /// Plugins registered as disabled because their module could not be
    /// loaded.
    pub failed: Vec<(PluginId, PluginError)>,
    /// Half-installed or half-removed plugins and orphan bundles that were
    /// deleted.
    pub reconciled: Vec<PluginId>,
}

fn manifest_from_record(record: &PluginRecord) -> PluginManifest {
    parse_manifest(&record.manifest_toml).unwrap_or_else(|_| PluginManifest {
        name: record.name.clone(),
        version: record.version.clone(),
        description: record.description.clone(),
        author: record.author.clone(),
        exports: Vec::new(),
        health_export: None,
        resources: ResourceHints::default(),
    })
}

impl PluginManager {
    /// Registers every persisted plugin and repairs leftovers of interrupted
    /// operations.
    ///
    /// Rows in `active` or `disabled` state are loaded with that state. A
    /// plugin whose module fails to load is still registered, as disabled and
    /// without an instance, and its error is kept in its history. Rows stuck
    /// in `installed` or `uninstalling`, and bundles without a row, are
    /// deleted. Plugins already in memory are skipped.
    pub async fn load_persisted(&self) -> Result<AutoloadReport, PluginError> {
        let rows = self.store.list().await?;
        let mut report = AutoloadReport::default();
        let mut known = HashSet::new();

        for record in rows {
            let id = record.id;
            known.insert(id);
            if self.handles.contains_key(&id) {
                continue;
            }
            match record.status {
                PluginStatus::Installed | PluginStatus::Uninstalling => {
                    warn!(plugin_id = %id, status = %record.status, "removing interrupted plugin");
                    if let Err(e) = self.bundles.remove_bundle(id) {
                        warn!(plugin_id = %id, error = %e, "failed to remove bundle");
                    }
                    if let Err(e) = self.store.delete(id).await {
                        warn!(plugin_id = %id, error = %e, "failed to delete row");
                    }
                    report.reconciled.push(id);
                }
                PluginStatus::Active | PluginStatus::Disabled => {
                    match self.load_record(record).await {
                        Ok(()) => report.loaded.push(id),
                        Err(e) => report.failed.push((id, e)),
                    }
                }
            }
        }

        for id in self.bundles.list_bundles() {
            if known.contains(&id) {
                continue;
            }
            warn!(plugin_id = %id, "removing bundle without a database row");
            match self.bundles.remove_bundle(id) {
                Ok(()) => report.reconciled.push(id),
                Err(e) => warn!(plugin_id = %id, error = %e, "failed to remove orphan bundle"),
            }
        }

        self.refresh_active();
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            reconciled = report.reconciled.len(),
            "persisted plugins loaded"
        );
        Ok(report)
    }

    async fn load_record(&self, mut record: PluginRecord) -> Result<(), PluginError> {
        let id = record.id;
        match self.load_from_bundle(id).await {
            Ok(prepared) => {
                record.bundle_path = prepared.bundle.path.to_string_lossy().into_owned();
                let handle = PluginHandle::new(
                    record,
                    prepared.bundle.manifest,
                    Some(prepared.instance),
                    Some(prepared.digest),
                );
                self.handles.insert(id, handle);
                Ok(())
            }
            Err(e) => {
                let e = e.with_plugin(id);
                warn!(
                    plugin_id = %id,
                    error = %e,
                    "failed to load plugin, registering it disabled"
                );
                if record.status == PluginStatus::Active {
                    let persisted = self.store.update_status(id, PluginStatus::Disabled).await;
                    if let Err(persist) = persisted {
                        warn!(
                            plugin_id = %id,
                            error = %persist,
                            "failed to persist disabled status"
                        );
                    }
                }
                record.status = PluginStatus::Disabled;
                record.enabled = false;
                let manifest = manifest_from_record(&record);
                let handle = PluginHandle::new(record, manifest, None, None);
                handle.record_error(&e);
                self.handles.insert(id, handle);
                Err(e)
            }
        }
    }
}
