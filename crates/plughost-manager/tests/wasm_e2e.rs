// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios with real modules, wasmtime and SQLite.

mod common;

use std::time::{Duration, Instant};

use common::{entries, test_config, WasmHarness};
use plughost_core::{Arg, HealthState, PluginError, PluginStatus, ResourceHints, Value};
use plughost_test_utils::fixtures::{self, echo_manifest, manifest, wasm};

#[tokio::test]
async fn echo_plugin_round_trip() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(echo_manifest(), wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();

    let out = h.manager.invoke(id, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong"));
    let out = h
        .manager
        .invoke(id, "echo", &[Arg::from("round trip")], None)
        .await
        .unwrap();
    assert_eq!(out.output_str(), Some("round trip"));

    h.manager.disable(id).await.unwrap();
    assert!(matches!(
        h.manager.invoke(id, "ping", &[], None).await,
        Err(PluginError::PluginDisabled(_))
    ));
    h.manager.enable(id).await.unwrap();
    assert_eq!(
        h.manager
            .invoke(id, "ping", &[], None)
            .await
            .unwrap()
            .output_str(),
        Some("pong")
    );

    h.manager.uninstall(id).await.unwrap();
    assert!(matches!(h.manager.get_plugin(id), Err(PluginError::NotFound(_))));
    assert_eq!(h.rows().await, 0);
    assert_eq!(entries(&h.dir.path().join("plugins")), 0);
}

#[tokio::test]
async fn manifest_exports_must_exist_in_the_module() {
    let h = WasmHarness::new(test_config()).await;
    let err = h
        .manager
        .install(
            manifest("echo", "1.0.0", &["ping", "missing"]),
            wasm(fixtures::ECHO_WAT),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "instantiate_error");
    assert_eq!(h.rows().await, 0);
    assert_eq!(entries(&h.dir.path().join("plugins")), 0);
}

#[tokio::test]
async fn infinite_loop_times_out_and_plugin_keeps_working() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(manifest("math", "1.0.0", &["spin", "add"]), wasm(fixtures::MATH_WAT))
        .await
        .unwrap();

    let started = Instant::now();
    let err = h
        .manager
        .invoke(id, "spin", &[], Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(
        matches!(err, PluginError::ExecutionTimeout { plugin: Some(p), .. } if p == id),
        "{err:?}"
    );
    assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");

    let out = h
        .manager
        .invoke(id, "add", &[Arg::from(2), Arg::from(3)], None)
        .await
        .unwrap();
    assert_eq!(out.values, vec![Value::I32(5)]);
}

#[tokio::test]
async fn trap_is_reported_not_propagated() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(manifest("math", "1.0.0", &["boom"]), wasm(fixtures::MATH_WAT))
        .await
        .unwrap();
    let err = h.manager.invoke(id, "boom", &[], None).await.unwrap_err();
    assert_eq!(err.code(), "execution_trap");
    assert!(err.to_string().starts_with(&format!("plugin {id}: `boom` trapped")));
}

#[tokio::test]
async fn manifest_memory_hint_narrows_the_host_limit() {
    let h = WasmHarness::new(test_config()).await;
    let mut small = manifest("math", "1.0.0", &["grow"]);
    small.resources = ResourceHints {
        memory_mb: Some(1),
        fuel: None,
    };
    let id = h.manager.install(small, wasm(fixtures::MATH_WAT)).await.unwrap();

    // 1 MiB is 16 pages; one is already in use.
    let denied = h
        .manager
        .invoke(id, "grow", &[Arg::from(16)], None)
        .await
        .unwrap();
    assert_eq!(denied.values, vec![Value::I32(-1)]);
    let granted = h
        .manager
        .invoke(id, "grow", &[Arg::from(15)], None)
        .await
        .unwrap();
    assert_eq!(granted.values, vec![Value::I32(1)]);
}

#[tokio::test]
async fn corrupt_reload_keeps_serving_then_new_module_swaps_in() {
    let h = WasmHarness::new(test_config()).await;
    let id = h
        .manager
        .install(manifest("echo", "1.0.0", &["ping"]), wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();
    let bundles = h.manager.bundles().clone();

    bundles.write_wasm(id, &fixtures::corrupt_wasm()).unwrap();
    assert!(matches!(
        h.manager.reload(id).await,
        Err(PluginError::Compile { .. })
    ));
    let out = h.manager.invoke(id, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong"));

    bundles.write_wasm(id, &wasm(fixtures::ECHO_V2_WAT)).unwrap();
    h.manager.reload(id).await.unwrap();
    let out = h.manager.invoke(id, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong v2"));
}

#[tokio::test]
async fn health_export_drives_health_state() {
    let mut config = test_config();
    config.health.healthy_threshold = 1;
    config.health.unhealthy_threshold = 1;
    let h = WasmHarness::new(config).await;

    let mut healthy = echo_manifest();
    healthy.health_export = Some("health".to_string());
    let good = h
        .manager
        .install(healthy, wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();

    let mut failing = manifest("math", "1.0.0", &["add"]);
    failing.health_export = Some("unhealthy".to_string());
    let bad = h
        .manager
        .install(failing, wasm(fixtures::MATH_WAT))
        .await
        .unwrap();

    assert_eq!(h.manager.check_all().await, 2);
    assert_eq!(h.manager.health(good).unwrap().state, HealthState::Healthy);
    let report = h.manager.health(bad).unwrap();
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(report.last_error.unwrap().contains("I32(1)"));
}

#[tokio::test]
async fn plugins_survive_a_restart() {
    let h = WasmHarness::new(test_config()).await;
    let active = h
        .manager
        .install(echo_manifest(), wasm(fixtures::ECHO_WAT))
        .await
        .unwrap();
    let disabled = h
        .manager
        .install(manifest("math", "1.0.0", &["add"]), wasm(fixtures::MATH_WAT))
        .await
        .unwrap();
    h.manager.disable(disabled).await.unwrap();
    h.manager.shutdown().await;

    let manager = h.restart(test_config()).await;
    let report = manager.load_persisted().await.unwrap();
    assert_eq!(report.loaded.len(), 2);

    let out = manager.invoke(active, "ping", &[], None).await.unwrap();
    assert_eq!(out.output_str(), Some("pong"));
    assert_eq!(
        manager.get_plugin(disabled).unwrap().status,
        PluginStatus::Disabled
    );
}
