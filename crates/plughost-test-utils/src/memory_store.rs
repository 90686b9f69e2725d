// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory plugin store with failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use plughost_core::{NewPlugin, PluginError, PluginId, PluginRecord, PluginStatus, PluginStore};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Insert,
    UpdateStatus,
    SetBundlePath,
    Delete,
    Find,
    List,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<PluginId, PluginRecord>,
    next_id: i64,
    failing: HashSet<StoreOp>,
}

/// A [`PluginStore`] backed by a map. Ids start at 1 and are never reused.
#[derive(Default)]
pub struct MemoryPluginStore {
    inner: Mutex<Inner>,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` fail with a persistence error.
    pub fn fail_next(&self, op: StoreOp) {
        self.lock().failing.insert(op);
    }

    /// Inserts a row directly, bypassing uniqueness checks. For seeding
    /// crash-recovery scenarios.
    pub fn seed(&self, plugin: &NewPlugin) -> PluginRecord {
        let mut inner = self.lock();
        inner.next_id += 1;
        let record = to_record(PluginId(inner.next_id), plugin);
        inner.rows.insert(record.id, record.clone());
        record
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, op: StoreOp) -> Result<MutexGuard<'_, Inner>, PluginError> {
        let mut inner = self.lock();
        if inner.failing.remove(&op) {
            return Err(PluginError::persistence(format!("injected {op:?} failure")));
        }
        Ok(inner)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn to_record(id: PluginId, plugin: &NewPlugin) -> PluginRecord {
    let timestamp = now();
    PluginRecord {
        id,
        name: plugin.name.clone(),
        version: plugin.version.clone(),
        description: plugin.description.clone(),
        author: plugin.author.clone(),
        enabled: plugin.status.is_enabled(),
        status: plugin.status,
        bundle_path: String::new(),
        manifest_toml: plugin.manifest_toml.clone(),
        installed_at: timestamp.clone(),
        updated_at: timestamp,
    }
}

#[async_trait]
impl PluginStore for MemoryPluginStore {
    async fn insert(&self, plugin: &NewPlugin) -> Result<PluginRecord, PluginError> {
        let mut inner = self.guard(StoreOp::Insert)?;
        if let Some(existing) = inner.rows.values().find(|r| {
            r.name == plugin.name
                && r.version == plugin.version
                && r.description == plugin.description
        }) {
            return Err(PluginError::AlreadyExists {
                name: plugin.name.clone(),
                version: plugin.version.clone(),
                existing: Some(existing.id),
            });
        }
        inner.next_id += 1;
        let record = to_record(PluginId(inner.next_id), plugin);
        inner.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(&self, id: PluginId, status: PluginStatus) -> Result<(), PluginError> {
        let mut inner = self.guard(StoreOp::UpdateStatus)?;
        let row = inner.rows.get_mut(&id).ok_or(PluginError::NotFound(id))?;
        row.status = status;
        row.enabled = status.is_enabled();
        row.updated_at = now();
        Ok(())
    }

    async fn set_bundle_path(&self, id: PluginId, path: &str) -> Result<(), PluginError> {
        let mut inner = self.guard(StoreOp::SetBundlePath)?;
        let row = inner.rows.get_mut(&id).ok_or(PluginError::NotFound(id))?;
        row.bundle_path = path.to_string();
        row.updated_at = now();
        Ok(())
    }

    async fn delete(&self, id: PluginId) -> Result<bool, PluginError> {
        Ok(self.guard(StoreOp::Delete)?.rows.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: PluginId) -> Result<Option<PluginRecord>, PluginError> {
        Ok(self.guard(StoreOp::Find)?.rows.get(&id).cloned())
    }

    async fn find_by_name_version_description(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<Option<PluginRecord>, PluginError> {
        Ok(self
            .guard(StoreOp::Find)?
            .rows
            .values()
            .find(|r| r.name == name && r.version == version && r.description == description)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<PluginRecord>, PluginError> {
        Ok(self.guard(StoreOp::List)?.rows.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str) -> NewPlugin {
        NewPlugin {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            status: PluginStatus::Installed,
            manifest_toml: String::new(),
        }
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = MemoryPluginStore::new();
        store.fail_next(StoreOp::Insert);
        assert!(matches!(
            store.insert(&plugin("a")).await,
            Err(PluginError::Persistence { .. })
        ));
        let record = store.insert(&plugin("a")).await.unwrap();
        assert_eq!(record.id, PluginId(1));
    }

    #[tokio::test]
    async fn duplicates_are_rejected_and_ids_not_reused() {
        let store = MemoryPluginStore::new();
        let a = store.insert(&plugin("a")).await.unwrap();
        assert!(store.insert(&plugin("a")).await.is_err());
        store.delete(a.id).await.unwrap();
        let b = store.insert(&plugin("a")).await.unwrap();
        assert_eq!(b.id, PluginId(2));
    }
}
