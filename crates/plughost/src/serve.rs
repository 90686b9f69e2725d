// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `plughost serve` command implementation.
//!
//! Opens the database, builds the sandbox runtime and the plugin manager,
//! loads persisted plugins, starts the health monitor and the bundle
//! watcher, and waits for a shutdown signal.

use std::sync::Arc;

use plughost_bundle::BundleRegistry;
use plughost_config::PlughostConfig;
use plughost_core::PluginError;
use plughost_manager::{BundleWatcher, HealthMonitor, ManagerConfig, PluginManager};
use plughost_sandbox::{RuntimeConfig, WasmRuntime};
use plughost_storage::{Database, SqlitePluginStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Crates whose events honor `log.level`. Everything else logs at warn.
const LOG_TARGETS: &[&str] = &[
    "plughost",
    "plughost_bundle",
    "plughost_config",
    "plughost_manager",
    "plughost_sandbox",
    "plughost_storage",
];

/// Builds the manager over the configured database, bundle directory and a
/// fresh wasmtime runtime.
pub async fn build_manager(
    config: &PlughostConfig,
) -> Result<(Arc<PluginManager>, Database), PluginError> {
    let db = Database::open(&config.storage.database_path).await?;
    let store = Arc::new(SqlitePluginStore::new(db.clone()));
    let runtime = WasmRuntime::new(RuntimeConfig {
        epoch_tick: config.plugins.epoch_tick(),
    })?;
    let manager = PluginManager::new(
        store,
        BundleRegistry::new(&config.plugins.directory),
        Arc::new(runtime),
        ManagerConfig::from(config),
    );
    Ok((Arc::new(manager), db))
}

/// Runs the `plughost serve` command.
pub async fn run_serve(config: PlughostConfig) -> Result<(), PluginError> {
    plughost_metrics::register_metrics();

    let (manager, db) = build_manager(&config).await?;
    info!(
        plugins_dir = %config.plugins.directory,
        database = %config.storage.database_path,
        max_concurrent_calls = config.plugins.max_concurrent_calls,
        "plughost starting"
    );

    if manager.config().autoload {
        let report = manager.load_persisted().await?;
        for (id, e) in &report.failed {
            warn!(plugin_id = %id, error = %e, "plugin left disabled after failed load");
        }
    } else {
        info!("autoload disabled, no plugins loaded");
    }

    let cancel = install_signal_handler();
    let watch = &manager.config().watch;
    let watcher = if watch.enabled {
        Some(BundleWatcher::spawn(manager.clone(), watch.debounce, cancel.clone())?)
    } else {
        None
    };
    let monitor = if manager.config().health.enabled {
        Some(HealthMonitor::spawn(manager.clone(), cancel.clone()))
    } else {
        None
    };

    info!(plugins = manager.list_plugins().len(), "plughost running");
    cancel.cancelled().await;

    if let Some(monitor) = monitor {
        if let Err(e) = monitor.await {
            error!(error = %e, "health monitor task failed");
        }
    }
    if let Some(watcher) = watcher {
        if let Err(e) = watcher.await {
            error!(error = %e, "bundle watcher task failed");
        }
    }
    manager.shutdown().await;
    if let Err(e) = db.checkpoint().await {
        warn!(error = %e, "final WAL checkpoint failed");
    }
    info!(heap_bytes = heap_allocated(), "plughost stopped");
    Ok(())
}

#[cfg(not(target_env = "msvc"))]
fn heap_allocated() -> usize {
    let _ = tikv_jemalloc_ctl::epoch::advance();
    tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0)
}

#[cfg(target_env = "msvc")]
fn heap_allocated() -> usize {
    0
}

/// Cancels the returned token on Ctrl-C or SIGTERM.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM, only Ctrl-C stops the host");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl-C, shutting down");
        }

        trigger.cancel();
    });

    token
}

fn filter_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(LOG_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn level_applies_to_every_workspace_crate() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("plughost_manager=debug"));
        assert!(directives.contains("plughost_sandbox=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
