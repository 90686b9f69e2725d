// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `plugin.toml` parsing, rendering and validation.
//!
//! ```toml
//! [plugin]
//! name = "echo"
//! version = "1.0.0"
//! description = "Replies to ping"
//! author = "ops"
//!
//! [exports]
//! functions = ["ping"]
//! health = "health"
//!
//! [resources]
//! memory_mb = 16
//! fuel = 1000000
//! ```

use std::collections::HashSet;

use plughost_core::{PluginError, PluginManifest, ResourceHints};
use serde::{Deserialize, Serialize};

// --- TOML file layout ---

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    plugin: PluginSection,
    #[serde(default)]
    exports: ExportsSection,
    #[serde(default)]
    resources: ResourcesSection,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct PluginSection {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    author: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ExportsSection {
    #[serde(default)]
    functions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    health: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ResourcesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fuel: Option<u64>,
}

/// Parses and validates a manifest.
pub fn parse_manifest(toml_content: &str) -> Result<PluginManifest, PluginError> {
    let file: ManifestFile = toml::from_str(toml_content)
        .map_err(|e| PluginError::ManifestInvalid(format!("malformed plugin.toml: {e}")))?;

    let manifest = PluginManifest {
        name: file.plugin.name,
        version: file.plugin.version,
        description: file.plugin.description,
        author: file.plugin.author,
        exports: file.exports.functions,
        health_export: file.exports.health,
        resources: ResourceHints {
            memory_mb: file.resources.memory_mb,
            fuel: file.resources.fuel,
        },
    };
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Renders a manifest back to `plugin.toml` form.
pub fn render_manifest(manifest: &PluginManifest) -> Result<String, PluginError> {
    let file = ManifestFile {
        plugin: PluginSection {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
        },
        exports: ExportsSection {
            functions: manifest.exports.clone(),
            health: manifest.health_export.clone(),
        },
        resources: ResourcesSection {
            memory_mb: manifest.resources.memory_mb,
            fuel: manifest.resources.fuel,
        },
    };
    toml::to_string_pretty(&file)
        .map_err(|e| PluginError::Internal(format!("cannot render manifest: {e}")))
}

/// True when `name` is usable as a path component.
fn is_safe_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Checks a manifest. The first problem found is reported.
pub fn validate_manifest(manifest: &PluginManifest) -> Result<(), PluginError> {
    let invalid = |message: String| Err(PluginError::ManifestInvalid(message));

    let name = manifest.name.trim();
    if name.is_empty() {
        return invalid("plugin name must not be empty".to_string());
    }
    if !is_safe_name(&manifest.name) {
        return invalid(format!(
            "plugin name '{}' may only contain ASCII letters, digits, '-' and '_'",
            manifest.name
        ));
    }
    if manifest.name.len() > 64 {
        return invalid(format!("plugin name '{}' is longer than 64 characters", manifest.name));
    }

    if manifest.version.trim().is_empty() {
        return invalid("plugin version must not be empty".to_string());
    }
    if let Err(e) = semver::Version::parse(&manifest.version) {
        return invalid(format!(
            "plugin version '{}' is not semantic: {e}",
            manifest.version
        ));
    }

    let mut seen = HashSet::new();
    for export in &manifest.exports {
        if export.trim().is_empty() {
            return invalid("export names must not be empty".to_string());
        }
        if !seen.insert(export.as_str()) {
            return invalid(format!("export '{export}' is listed twice"));
        }
    }
    if let Some(health) = &manifest.health_export {
        if health.trim().is_empty() {
            return invalid("health export must not be empty when set".to_string());
        }
    }

    if manifest.resources.memory_mb == Some(0) {
        return invalid("resources.memory_mb must be at least 1".to_string());
    }
    if manifest.resources.fuel == Some(0) {
        return invalid("resources.fuel must be greater than 0".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: &str = r#"
[plugin]
name = "echo"
version = "1.0.0"
description = "Replies to ping"
author = "ops"

[exports]
functions = ["ping"]
health = "health"

[resources]
memory_mb = 16
"#;

    #[test]
    fn parses_full_manifest() {
        let manifest = parse_manifest(ECHO).unwrap();
        assert_eq!(manifest.name, "echo");
        assert_eq!(manifest.author, "ops");
        assert_eq!(manifest.exports, vec!["ping"]);
        assert_eq!(manifest.health_export.as_deref(), Some("health"));
        assert_eq!(manifest.resources.memory_mb, Some(16));
        assert_eq!(manifest.resources.fuel, None);
    }

    #[test]
    fn minimal_manifest_uses_defaults() {
        let manifest = parse_manifest("[plugin]\nname = \"min\"\nversion = \"0.1.0\"\n").unwrap();
        assert!(manifest.exports.is_empty());
        assert!(manifest.description.is_empty());
        assert_eq!(manifest.resources, ResourceHints::default());
    }

    #[test]
    fn render_then_parse_preserves_manifest() {
        let manifest = parse_manifest(ECHO).unwrap();
        let rendered = render_manifest(&manifest).unwrap();
        assert_eq!(parse_manifest(&rendered).unwrap(), manifest);
    }

    #[test]
    fn rejects_path_traversal_in_name() {
        let err = parse_manifest("[plugin]\nname = \"../etc\"\nversion = \"1.0.0\"\n").unwrap_err();
        assert!(matches!(err, PluginError::ManifestInvalid(_)));
    }

    #[test]
    fn rejects_empty_name_and_version() {
        assert!(parse_manifest("[plugin]\nname = \"\"\nversion = \"1.0.0\"\n").is_err());
        assert!(parse_manifest("[plugin]\nname = \"x\"\nversion = \"\"\n").is_err());
    }

    #[test]
    fn rejects_non_semver_version() {
        let err = parse_manifest("[plugin]\nname = \"x\"\nversion = \"v1\"\n").unwrap_err();
        assert!(err.to_string().contains("not semantic"));
    }

    #[test]
    fn rejects_duplicate_exports() {
        let toml = "[plugin]\nname = \"x\"\nversion = \"1.0.0\"\n[exports]\nfunctions = [\"a\", \"a\"]\n";
        assert!(parse_manifest(toml).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml = "[plugin]\nname = \"x\"\nversion = \"1.0.0\"\nlicence = \"MIT\"\n";
        assert!(matches!(
            parse_manifest(toml),
            Err(PluginError::ManifestInvalid(_))
        ));
    }
}
