// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundle watcher tests: modules replaced on disk get reloaded.

mod common;

use std::time::Duration;

use common::{test_config, FakeHarness, WasmHarness};
use plughost_core::{PluginError, PluginId, PluginStore};
use plughost_manager::{BundleWatcher, PluginManager};
use plughost_test_utils::fixtures::{self, echo_manifest, manifest, wasm};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_millis(100);
const MODULE: &[u8] = b"\0asm fake module";

/// Polls until `reloads` reloads were counted; false after 10s.
async fn reloaded(manager: &PluginManager, reloads: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if manager.metrics().reloads >= reloads {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

async fn stop(cancel: CancellationToken, task: JoinHandle<()>) {
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("watcher did not stop")
        .unwrap();
}

#[tokio::test]
async fn replaced_module_serves_new_output() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(manifest("echo", "1.0.0", &["ping"]), wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let task = BundleWatcher::spawn(h.manager.clone(), DEBOUNCE, cancel.clone()).unwrap();

    h.manager
        .bundles()
        .write_wasm(id, &wasm(fixtures::ECHO_V2_WAT))
        .unwrap();

    assert!(reloaded(&h.manager, 1).await, "module change was not picked up");
    let out = h.manager.invoke(id, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong v2"));

    stop(cancel, task).await;
}

#[tokio::test]
async fn broken_replacement_keeps_the_running_module() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(manifest("echo", "1.0.0", &["ping"]), wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let task = BundleWatcher::spawn(h.manager.clone(), DEBOUNCE, cancel.clone()).unwrap();

    h.manager
        .bundles()
        .write_wasm(id, &fixtures::corrupt_wasm())
        .unwrap();
    tokio::time::sleep(DEBOUNCE * 6).await;

    assert_eq!(h.manager.metrics().reloads, 0);
    let out = h.manager.invoke(id, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong"));

    stop(cancel, task).await;
}

#[tokio::test]
async fn unchanged_and_unknown_bundles_are_left_alone() {
    let h = FakeHarness::new(test_config());
    let same = h
        .manager
        .install(echo_manifest(), MODULE.to_vec())
        .await
        .unwrap();
    let changed = h
        .manager
        .install(manifest("other", "1.0.0", &["ping"]), MODULE.to_vec())
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let task = BundleWatcher::spawn(h.manager.clone(), DEBOUNCE, cancel.clone()).unwrap();

    let bundles = h.bundles();
    let stray = PluginId(99);
    bundles
        .create_bundle(stray, &manifest("stray", "1.0.0", &["ping"]), MODULE)
        .unwrap();
    bundles.write_wasm(same, MODULE).unwrap();
    bundles.write_wasm(changed, b"\0asm replaced module").unwrap();

    assert!(reloaded(&h.manager, 1).await, "changed module was not reloaded");
    tokio::time::sleep(DEBOUNCE * 4).await;
    assert_eq!(h.manager.metrics().reloads, 1);
    assert!(matches!(
        h.manager.get_plugin(stray),
        Err(PluginError::NotFound(_))
    ));
    assert!(bundles.bundle_path(stray).is_some());
    assert_eq!(h.store.list().await.unwrap().len(), 2);

    stop(cancel, task).await;
}

#[tokio::test]
async fn watcher_creates_missing_directory_and_stops_on_cancel() {
    let h = FakeHarness::new(test_config());
    assert!(!h.plugins_dir().exists());

    let cancel = CancellationToken::new();
    let task = BundleWatcher::spawn(h.manager.clone(), DEBOUNCE, cancel.clone()).unwrap();
    assert!(h.plugins_dir().is_dir());

    stop(cancel, task).await;
}
