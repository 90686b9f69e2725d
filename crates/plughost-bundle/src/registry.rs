// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundle directory management.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use plughost_core::{PluginError, PluginId, PluginManifest};
use tracing::{debug, warn};

use crate::manifest::{parse_manifest, render_manifest, validate_manifest};

/// File name of the compiled module inside a bundle.
pub const WASM_FILE: &str = "plugin.wasm";
/// File name of the manifest inside a bundle.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// A bundle read back from disk.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: PluginId,
    pub path: PathBuf,
    pub manifest: PluginManifest,
    pub manifest_toml: String,
    pub wasm: Vec<u8>,
}

/// Creates, reads and removes bundles under one root directory.
#[derive(Debug, Clone)]
pub struct BundleRegistry {
    root: PathBuf,
}

impl BundleRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a new bundle for `id` and returns its directory.
    ///
    /// A partially written directory is removed before the error is returned.
    pub fn create_bundle(
        &self,
        id: PluginId,
        manifest: &PluginManifest,
        wasm: &[u8],
    ) -> Result<PathBuf, PluginError> {
        validate_manifest(manifest)?;
        let manifest_toml = render_manifest(manifest)?;

        fs::create_dir_all(&self.root).map_err(|source| PluginError::BundleWrite {
            path: self.root.clone(),
            source,
        })?;

        if let Some(existing) = self.bundle_path(id) {
            return Err(PluginError::BundleWrite {
                path: existing,
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("a bundle for plugin {id} already exists"),
                ),
            });
        }

        let dir = self.root.join(format!("{}-{id}", manifest.name));
        fs::create_dir(&dir).map_err(|source| PluginError::BundleWrite {
            path: dir.clone(),
            source,
        })?;

        let written = write_atomic(&dir.join(WASM_FILE), wasm)
            .and_then(|()| write_atomic(&dir.join(MANIFEST_FILE), manifest_toml.as_bytes()));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %cleanup, "failed to clean up partial bundle");
            }
            return Err(e);
        }

        debug!(plugin_id = %id, path = %dir.display(), bytes = wasm.len(), "bundle created");
        Ok(dir)
    }

    /// Deletes every bundle directory belonging to `id`. Missing bundles are
    /// not an error.
    pub fn remove_bundle(&self, id: PluginId) -> Result<(), PluginError> {
        for dir in self.dirs_for(id) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(plugin_id = %id, path = %dir.display(), "bundle removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(PluginError::BundleWrite { path: dir, source }),
            }
        }
        Ok(())
    }

    /// Directory of the bundle for `id`, if one exists.
    pub fn bundle_path(&self, id: PluginId) -> Option<PathBuf> {
        self.dirs_for(id).into_iter().next()
    }

    /// Ids of every bundle on disk, ascending.
    pub fn list_bundles(&self) -> Vec<PluginId> {
        let mut ids: Vec<PluginId> = self.scan().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Reads manifest and module of an existing bundle.
    pub fn read_bundle(&self, id: PluginId) -> Result<Bundle, PluginError> {
        let path = self.bundle_path(id).ok_or(PluginError::NotFound(id))?;
        let manifest_path = path.join(MANIFEST_FILE);
        let manifest_toml =
            fs::read_to_string(&manifest_path).map_err(|source| PluginError::BundleRead {
                path: manifest_path,
                source,
            })?;
        let manifest = parse_manifest(&manifest_toml)?;
        let wasm_path = path.join(WASM_FILE);
        let wasm = fs::read(&wasm_path).map_err(|source| PluginError::BundleRead {
            path: wasm_path,
            source,
        })?;
        Ok(Bundle {
            id,
            path,
            manifest,
            manifest_toml,
            wasm,
        })
    }

    /// Replaces the module of an existing bundle.
    pub fn write_wasm(&self, id: PluginId, wasm: &[u8]) -> Result<PathBuf, PluginError> {
        let path = self.bundle_path(id).ok_or(PluginError::NotFound(id))?;
        write_atomic(&path.join(WASM_FILE), wasm)?;
        debug!(plugin_id = %id, bytes = wasm.len(), "bundle module replaced");
        Ok(path)
    }

    fn dirs_for(&self, id: PluginId) -> Vec<PathBuf> {
        self.scan()
            .into_iter()
            .filter(|(found, _)| *found == id)
            .map(|(_, path)| path)
            .collect()
    }

    /// Every `{name}-{id}` directory under the root.
    fn scan(&self) -> Vec<(PluginId, PathBuf)> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(root = %self.root.display(), error = %e, "cannot scan plugin directory");
                }
                return Vec::new();
            }
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| {
                let id = parse_dir_name(&entry.file_name().to_string_lossy())?;
                Some((id, entry.path()))
            })
            .collect()
    }
}

/// Id of the bundle owning `path` when it names a `{name}-{id}/plugin.wasm`
/// module file.
pub fn module_owner(path: &Path) -> Option<PluginId> {
    if path.file_name()? != WASM_FILE {
        return None;
    }
    parse_dir_name(&path.parent()?.file_name()?.to_string_lossy())
}

/// Recovers the id from a `{name}-{id}` directory name.
fn parse_dir_name(dir_name: &str) -> Option<PluginId> {
    let (name, id) = dir_name.rsplit_once('-')?;
    if name.is_empty() {
        return None;
    }
    id.parse::<i64>().ok().filter(|id| *id > 0).map(PluginId)
}

/// Writes via a temp file and rename so readers never see a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PluginError> {
    let tmp = path.with_extension("tmp");
    let to_error = |source| PluginError::BundleWrite {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, bytes).map_err(to_error)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        to_error(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plughost_core::ResourceHints;

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "test".to_string(),
            author: String::new(),
            exports: vec!["run".to_string()],
            health_export: None,
            resources: ResourceHints::default(),
        }
    }

    #[test]
    fn create_writes_module_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path().join("plugins"));

        let path = registry
            .create_bundle(PluginId(3), &manifest("echo"), b"\0asm")
            .unwrap();
        assert_eq!(path, dir.path().join("plugins/echo-3"));
        assert_eq!(fs::read(path.join(WASM_FILE)).unwrap(), b"\0asm");
        let manifest_toml = fs::read_to_string(path.join(MANIFEST_FILE)).unwrap();
        assert!(manifest_toml.contains("name = \"echo\""));
        assert!(!path.join("plugin.tmp").exists());
    }

    #[test]
    fn create_rejects_invalid_manifest_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        let err = registry
            .create_bundle(PluginId(1), &manifest("bad/name"), b"")
            .unwrap_err();
        assert!(matches!(err, PluginError::ManifestInvalid(_)));
        assert!(registry.list_bundles().is_empty());
    }

    #[test]
    fn create_refuses_second_bundle_for_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        registry.create_bundle(PluginId(1), &manifest("a"), b"1").unwrap();
        let err = registry
            .create_bundle(PluginId(1), &manifest("b"), b"2")
            .unwrap_err();
        assert!(matches!(err, PluginError::BundleWrite { .. }));
    }

    #[test]
    fn list_recovers_ids_from_directory_names() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        registry.create_bundle(PluginId(12), &manifest("my-plugin-2"), b"x").unwrap();
        registry.create_bundle(PluginId(4), &manifest("other"), b"y").unwrap();
        fs::create_dir(dir.path().join("not-a-bundle")).unwrap();
        fs::write(dir.path().join("stray-9"), b"file, not dir").unwrap();

        assert_eq!(registry.list_bundles(), vec![PluginId(4), PluginId(12)]);
        assert_eq!(
            registry.bundle_path(PluginId(12)),
            Some(dir.path().join("my-plugin-2-12"))
        );
        assert_eq!(registry.bundle_path(PluginId(2)), None);
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path().join("absent"));
        assert!(registry.list_bundles().is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        let path = registry.create_bundle(PluginId(5), &manifest("echo"), b"x").unwrap();

        registry.remove_bundle(PluginId(5)).unwrap();
        assert!(!path.exists());
        registry.remove_bundle(PluginId(5)).unwrap();
    }

    #[test]
    fn read_round_trips_and_write_wasm_replaces_module() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        registry.create_bundle(PluginId(7), &manifest("echo"), b"old").unwrap();

        let bundle = registry.read_bundle(PluginId(7)).unwrap();
        assert_eq!(bundle.manifest, manifest("echo"));
        assert_eq!(bundle.wasm, b"old");

        registry.write_wasm(PluginId(7), b"new").unwrap();
        assert_eq!(registry.read_bundle(PluginId(7)).unwrap().wasm, b"new");
    }

    #[test]
    fn read_missing_bundle_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        assert!(matches!(
            registry.read_bundle(PluginId(1)),
            Err(PluginError::NotFound(PluginId(1)))
        ));
        assert!(matches!(
            registry.write_wasm(PluginId(1), b""),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn read_with_corrupt_manifest_is_manifest_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BundleRegistry::new(dir.path());
        let path = registry.create_bundle(PluginId(2), &manifest("echo"), b"x").unwrap();
        fs::write(path.join(MANIFEST_FILE), "not toml [").unwrap();
        assert!(matches!(
            registry.read_bundle(PluginId(2)),
            Err(PluginError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn module_owner_only_matches_module_files() {
        let root = Path::new("/srv/plugins");
        assert_eq!(module_owner(&root.join("echo-4").join(WASM_FILE)), Some(PluginId(4)));
        assert_eq!(module_owner(&root.join("echo-4").join(MANIFEST_FILE)), None);
        assert_eq!(module_owner(&root.join("echo-4").join("plugin.tmp")), None);
        assert_eq!(module_owner(&root.join("scratch").join(WASM_FILE)), None);
    }

    #[test]
    fn dir_name_parsing() {
        assert_eq!(parse_dir_name("echo-1"), Some(PluginId(1)));
        assert_eq!(parse_dir_name("a-b-c-42"), Some(PluginId(42)));
        assert_eq!(parse_dir_name("-3"), None);
        assert_eq!(parse_dir_name("echo"), None);
        assert_eq!(parse_dir_name("echo-x"), None);
        assert_eq!(parse_dir_name("echo-0"), None);
    }
}
