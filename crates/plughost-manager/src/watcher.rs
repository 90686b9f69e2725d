// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hot reload of modules replaced on disk.
//!
//! The watcher only reloads plugins the manager already knows. Bundles that
//! appear or disappear outside of install and uninstall are logged and left
//! alone; the next startup reconciles them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use plughost_bundle::{module_owner, MANIFEST_FILE, WASM_FILE};
use plughost_core::{ModuleDigest, PluginError, PluginId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::PluginManager;

pub struct BundleWatcher;

impl BundleWatcher {
    /// Watches the bundle directory and reloads a plugin once its
    /// `plugin.wasm` has been quiet for `debounce`. The task exits when
    /// `cancel` fires.
    pub fn spawn(
        manager: Arc<PluginManager>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, PluginError> {
        let root = watch_root(manager.bundles().root())?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            if events_tx.send(result).is_err() {
                debug!("bundle watcher gone, dropping file events");
            }
        })
        .map_err(watch_error)?;
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(watch_error)?;
        info!(root = %root.display(), ?debounce, "bundle watcher started");

        Ok(tokio::spawn(async move {
            // The OS watch lives as long as the debouncer.
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    received = events_rx.recv() => match received {
                        Some(Ok(events)) => {
                            let paths = events.iter().map(|event| event.path.as_path());
                            for id in changed_modules(&root, paths) {
                                reload_changed(&manager, id).await;
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "bundle watcher error"),
                        None => break,
                    },
                    _ = cancel.cancelled() => {
                        info!("bundle watcher shutting down");
                        break;
                    }
                }
            }
        }))
    }
}

/// Creates the bundle root if needed and resolves it to the form the OS
/// reports event paths in.
fn watch_root(root: &Path) -> Result<PathBuf, PluginError> {
    std::fs::create_dir_all(root).map_err(|source| PluginError::BundleWrite {
        path: root.to_path_buf(),
        source,
    })?;
    root.canonicalize().map_err(|source| PluginError::BundleRead {
        path: root.to_path_buf(),
        source,
    })
}

fn watch_error(e: notify::Error) -> PluginError {
    PluginError::Internal(format!("cannot watch plugin directory: {e}"))
}

/// Plugins whose module file directly inside a bundle under `root` is among
/// `paths`.
fn changed_modules<'a>(
    root: &Path,
    paths: impl IntoIterator<Item = &'a Path>,
) -> BTreeSet<PluginId> {
    paths
        .into_iter()
        .filter(|path| path.parent().and_then(Path::parent) == Some(root))
        .filter_map(module_owner)
        .collect()
}

async fn reload_changed(manager: &PluginManager, id: PluginId) {
    let current = match manager.loaded_digest(id) {
        Ok(current) => current,
        Err(_) => {
            debug!(plugin_id = %id, "module changed for a plugin that is not installed");
            return;
        }
    };
    let Some(dir) = manager.bundles().bundle_path(id) else {
        warn!(plugin_id = %id, "bundle removed from disk, keeping the loaded instance");
        return;
    };
    if !dir.join(MANIFEST_FILE).is_file() {
        debug!(plugin_id = %id, "bundle incomplete, skipping reload");
        return;
    }
    let wasm = match tokio::fs::read(dir.join(WASM_FILE)).await {
        Ok(wasm) => wasm,
        Err(e) => {
            debug!(plugin_id = %id, error = %e, "module unreadable, skipping reload");
            return;
        }
    };
    if current.as_ref() == Some(&ModuleDigest::of(&wasm)) {
        debug!(plugin_id = %id, "module unchanged");
        return;
    }

    match manager.reload(id).await {
        Ok(()) => info!(plugin_id = %id, "plugin reloaded after module change"),
        Err(e) => warn!(plugin_id = %id, error = %e, "reload after module change failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_top_level_bundle_modules_count() {
        let root = Path::new("/srv/plugins");
        let paths = [
            root.join("echo-1").join(WASM_FILE),
            root.join("echo-1").join("plugin.tmp"),
            root.join("math-2").join(MANIFEST_FILE),
            root.join("nested").join("math-3").join(WASM_FILE),
            root.join("clock-5").join(WASM_FILE),
            root.join("clock-5").join(WASM_FILE),
        ];
        let changed = changed_modules(root, paths.iter().map(PathBuf::as_path));
        let ids: Vec<PluginId> = changed.into_iter().collect();
        assert_eq!(ids, vec![PluginId(1), PluginId(5)]);
    }

    #[test]
    fn root_is_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("plugins");
        let resolved = watch_root(&root).unwrap();
        assert!(resolved.is_dir());
        assert!(resolved.is_absolute());
    }
}
