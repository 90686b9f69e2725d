// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the manager, the sandbox, and persistence.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

/// Identifier assigned by persistence on first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub i64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status persisted alongside each plugin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    /// Row exists but the module is not live yet.
    Installed,
    /// Live instance present, calls accepted.
    Active,
    /// Instance kept, calls rejected.
    Disabled,
    /// Teardown under way, calls rejected.
    Uninstalling,
}

impl PluginStatus {
    /// Value of the `enabled` column for this status.
    pub fn is_enabled(self) -> bool {
        self == Self::Active
    }
}

/// Resource hints declared by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHints {
    /// Upper bound for linear memory in MiB.
    pub memory_mb: Option<u32>,
    /// Fuel granted to every call.
    pub fuel: Option<u64>,
}

/// Parsed plugin manifest (`plugin.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Functions the module must export.
    #[serde(default)]
    pub exports: Vec<String>,
    /// Optional export probed by the health monitor.
    #[serde(default)]
    pub health_export: Option<String>,
    #[serde(default)]
    pub resources: ResourceHints,
}

impl PluginManifest {
    /// Exports the instance must provide, including the health probe.
    pub fn required_exports(&self) -> Vec<String> {
        let mut exports = self.exports.clone();
        if let Some(health) = &self.health_export {
            if !exports.contains(health) {
                exports.push(health.clone());
            }
        }
        exports
    }

    /// Whether `export` is listed in `exports` or is the health export.
    pub fn declares(&self, export: &str) -> bool {
        self.exports.iter().any(|e| e == export) || self.health_export.as_deref() == Some(export)
    }
}

/// A persisted plugin row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub enabled: bool,
    pub status: PluginStatus,
    pub bundle_path: String,
    pub manifest_toml: String,
    pub installed_at: String,
    pub updated_at: String,
}

/// Fields needed to insert a new plugin row.
#[derive(Debug, Clone)]
pub struct NewPlugin {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub status: PluginStatus,
    pub manifest_toml: String,
}

impl NewPlugin {
    pub fn from_manifest(manifest: &PluginManifest, manifest_toml: String) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            status: PluginStatus::Installed,
            manifest_toml,
        }
    }
}

/// SHA-256 of a module's bytes, used as the compile cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDigest(pub String);

impl ModuleDigest {
    pub fn of(wasm: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(wasm)))
    }
}

impl fmt::Display for ModuleDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Limits applied to every call made on an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum linear memory in bytes.
    pub memory_bytes: u64,
    /// Fuel per call; `None` means unmetered.
    pub fuel: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 64 * 1024 * 1024,
            fuel: None,
        }
    }
}

impl ResourceLimits {
    /// Narrows these limits by a manifest's hints. Hints never raise a limit.
    pub fn narrowed_by(&self, hints: &ResourceHints) -> Self {
        let memory_bytes = hints
            .memory_mb
            .map(|mb| u64::from(mb) * 1024 * 1024)
            .map_or(self.memory_bytes, |hint| hint.min(self.memory_bytes));
        let fuel = match (self.fuel, hints.fuel) {
            (Some(host), Some(hint)) => Some(host.min(hint)),
            (host, hint) => host.or(hint),
        };
        Self { memory_bytes, fuel }
    }
}

/// A primitive wasm value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// A call argument: a primitive parameter or the guest's input buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Bytes(Vec<u8>),
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Self::Value(Value::I32(v))
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Self::Value(Value::I64(v))
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Self::Value(Value::F32(v))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Self::Value(Value::F64(v))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutput {
    /// Values returned by the export.
    pub values: Vec<Value>,
    /// Bytes the guest handed back through `set_output`.
    pub output: Option<Vec<u8>>,
}

impl CallOutput {
    /// Output bytes as UTF-8, if present and valid.
    pub fn output_str(&self) -> Option<&str> {
        self.output
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Deadline and cancellation for one call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub deadline: Instant,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }
}

/// Health classification maintained by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// One entry of a plugin's recent error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Health details for a plugin snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Point-in-time view of a plugin returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub enabled: bool,
    pub status: PluginStatus,
    pub bundle_path: PathBuf,
    pub manifest: PluginManifest,
    pub loaded: bool,
    pub installed_at: String,
    pub updated_at: String,
    pub invocation_count: u64,
    pub error_count: u64,
    pub recent_errors: Vec<ErrorEntry>,
    pub health: HealthReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(PluginStatus::Uninstalling.to_string(), "uninstalling");
        assert_eq!(
            PluginStatus::from_str("disabled").unwrap(),
            PluginStatus::Disabled
        );
        assert!(PluginStatus::from_str("gone").is_err());
    }

    #[test]
    fn only_active_is_enabled() {
        assert!(PluginStatus::Active.is_enabled());
        assert!(!PluginStatus::Disabled.is_enabled());
        assert!(!PluginStatus::Installed.is_enabled());
    }

    #[test]
    fn digest_is_sha256_hex() {
        let digest = ModuleDigest::of(b"");
        assert_eq!(
            digest.0,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hints_never_raise_limits() {
        let host = ResourceLimits {
            memory_bytes: 16 * 1024 * 1024,
            fuel: Some(1_000),
        };
        let narrowed = host.narrowed_by(&ResourceHints {
            memory_mb: Some(64),
            fuel: Some(500),
        });
        assert_eq!(narrowed.memory_bytes, 16 * 1024 * 1024);
        assert_eq!(narrowed.fuel, Some(500));

        let unmetered = ResourceLimits::default().narrowed_by(&ResourceHints {
            memory_mb: Some(2),
            fuel: Some(42),
        });
        assert_eq!(unmetered.memory_bytes, 2 * 1024 * 1024);
        assert_eq!(unmetered.fuel, Some(42));
    }

    #[test]
    fn required_exports_include_health_once() {
        let manifest = PluginManifest {
            name: "echo".into(),
            version: "1.0.0".into(),
            description: String::new(),
            author: String::new(),
            exports: vec!["ping".into(), "health".into()],
            health_export: Some("health".into()),
            resources: ResourceHints::default(),
        };
        assert_eq!(manifest.required_exports(), vec!["ping", "health"]);
        assert!(manifest.declares("health"));
        assert!(!manifest.declares("pong"));
    }

    #[test]
    fn output_str_requires_utf8() {
        let out = CallOutput {
            values: vec![],
            output: Some(b"pong".to_vec()),
        };
        assert_eq!(out.output_str(), Some("pong"));
        let bad = CallOutput {
            values: vec![],
            output: Some(vec![0xff, 0xfe]),
        };
        assert_eq!(bad.output_str(), None);
    }

    #[test]
    fn value_serializes_tagged() {
        let json = serde_json::to_string(&Value::I32(4)).unwrap();
        assert_eq!(json, r#"{"type":"i32","value":4}"#);
    }

    #[tokio::test]
    async fn cancelled_context_is_expired() {
        let ctx = CallContext::with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_expired());
        ctx.cancel.cancel();
        assert!(ctx.is_expired());
    }
}
