// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared harness for manager integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use plughost_bundle::BundleRegistry;
use plughost_core::PluginStore;
use plughost_manager::{ManagerConfig, PluginManager};
use plughost_sandbox::{RuntimeConfig, WasmRuntime};
use plughost_storage::{Database, SqlitePluginStore};
use plughost_test_utils::{FakeRuntime, MemoryPluginStore};
use tempfile::TempDir;

/// A manager over a temp bundle directory, an in-memory store and a fake
/// runtime. The handles to the store and runtime allow fault injection.
pub struct FakeHarness {
    pub manager: Arc<PluginManager>,
    pub store: Arc<MemoryPluginStore>,
    pub runtime: Arc<FakeRuntime>,
    pub dir: TempDir,
}

impl FakeHarness {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_runtime(config, FakeRuntime::new())
    }

    pub fn with_runtime(config: ManagerConfig, runtime: FakeRuntime) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryPluginStore::new());
        let runtime = Arc::new(runtime);
        let manager = Arc::new(PluginManager::new(
            store.clone(),
            BundleRegistry::new(dir.path().join("plugins")),
            runtime.clone(),
            config,
        ));
        Self {
            manager,
            store,
            runtime,
            dir,
        }
    }

    /// A second manager over the same directory and store, as after a
    /// restart, with a fresh runtime.
    pub fn restart(&self, config: ManagerConfig) -> (Arc<PluginManager>, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::new());
        let manager = Arc::new(PluginManager::new(
            self.store.clone(),
            BundleRegistry::new(self.plugins_dir()),
            runtime.clone(),
            config,
        ));
        (manager, runtime)
    }

    pub fn plugins_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn bundles(&self) -> BundleRegistry {
        BundleRegistry::new(self.plugins_dir())
    }
}

/// A manager backed by SQLite and the wasmtime runtime.
pub struct WasmHarness {
    pub manager: Arc<PluginManager>,
    pub store: Arc<SqlitePluginStore>,
    pub dir: TempDir,
}

impl WasmHarness {
    pub async fn new(config: ManagerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("plughost.db")).await.unwrap();
        let manager_and_store = build_wasm_manager(dir.path(), db, config);
        Self {
            manager: manager_and_store.0,
            store: manager_and_store.1,
            dir,
        }
    }

    /// A second manager over the same database file and bundle directory.
    pub async fn restart(&self, config: ManagerConfig) -> Arc<PluginManager> {
        let db = Database::open(self.dir.path().join("plughost.db"))
            .await
            .unwrap();
        build_wasm_manager(self.dir.path(), db, config).0
    }

    pub async fn rows(&self) -> usize {
        self.store.list().await.unwrap().len()
    }
}

fn build_wasm_manager(
    root: &Path,
    db: Database,
    config: ManagerConfig,
) -> (Arc<PluginManager>, Arc<SqlitePluginStore>) {
    let store = Arc::new(SqlitePluginStore::new(db));
    let runtime = WasmRuntime::new(RuntimeConfig {
        epoch_tick: Duration::from_millis(5),
    })
    .unwrap();
    let manager = Arc::new(PluginManager::new(
        store.clone(),
        BundleRegistry::new(root.join("plugins")),
        Arc::new(runtime),
        config,
    ));
    (manager, store)
}

/// Config with short waits suitable for tests.
pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        call_timeout: Duration::from_secs(5),
        uninstall_grace: Duration::from_secs(2),
        ..ManagerConfig::default()
    }
}

/// Number of entries directly under `dir`; zero if it does not exist.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
