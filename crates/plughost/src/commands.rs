// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot lifecycle subcommands.
//!
//! Each command builds a manager over the same database and plugin
//! directory `serve` uses, performs one operation and shuts the manager
//! down again. The CLI must not run against a directory a live `serve`
//! process owns.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use plughost_config::PlughostConfig;
use plughost_core::{Arg, CallOutput, PluginError, PluginId, PluginSnapshot, Value};
use plughost_manager::PluginManager;
use tracing::warn;

use crate::serve::build_manager;

/// Parses a `--arg` value of the form `i32:7`, `i64:-3`, `f32:0.5` or `f64:2.25`.
pub fn parse_arg(s: &str) -> Result<Arg, String> {
    let (ty, raw) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `type:value`, got `{s}`"))?;
    let bad = |e: &dyn std::fmt::Display| format!("invalid {ty} value `{raw}`: {e}");
    let value = match ty {
        "i32" => Value::I32(raw.parse().map_err(|e| bad(&e))?),
        "i64" => Value::I64(raw.parse().map_err(|e| bad(&e))?),
        "f32" => Value::F32(raw.parse().map_err(|e| bad(&e))?),
        "f64" => Value::F64(raw.parse().map_err(|e| bad(&e))?),
        other => return Err(format!("unknown argument type `{other}` (use i32, i64, f32 or f64)")),
    };
    Ok(Arg::Value(value))
}

/// Builds a manager and loads every persisted plugin into it.
async fn open(config: &PlughostConfig) -> Result<Arc<PluginManager>, PluginError> {
    let (manager, _db) = build_manager(config).await?;
    let report = manager.load_persisted().await?;
    for (id, e) in &report.failed {
        warn!(plugin_id = %id, error = %e, "plugin failed to load");
    }
    Ok(manager)
}

/// Shuts the manager down and passes `result` through.
async fn finish<T>(
    manager: &PluginManager,
    result: Result<T, PluginError>,
) -> Result<T, PluginError> {
    manager.shutdown().await;
    result
}

fn read_file(path: &Path) -> Result<Vec<u8>, PluginError> {
    std::fs::read(path).map_err(|source| PluginError::BundleRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs `plughost install`.
pub async fn run_install(
    config: &PlughostConfig,
    manifest_path: &Path,
    wasm_path: &Path,
) -> Result<(), PluginError> {
    let manifest_toml = String::from_utf8(read_file(manifest_path)?)
        .map_err(|e| PluginError::ManifestInvalid(format!("manifest is not UTF-8: {e}")))?;
    let manifest = plughost_bundle::parse_manifest(&manifest_toml)?;
    let wasm = read_file(wasm_path)?;

    let (manager, _db) = build_manager(config).await?;
    let result = manager.install(manifest, wasm).await;
    let id = finish(&manager, result).await?;
    println!("installed plugin {id}");
    Ok(())
}

fn render_table(plugins: &[PluginSnapshot]) -> String {
    if plugins.is_empty() {
        return "no plugins installed".to_string();
    }
    let mut out = format!(
        "{:<6} {:<24} {:<12} {:<10} {:<10} {:>8} {:>7}\n",
        "ID", "NAME", "VERSION", "STATUS", "HEALTH", "CALLS", "ERRORS"
    );
    for p in plugins {
        out.push_str(&format!(
            "{:<6} {:<24} {:<12} {:<10} {:<10} {:>8} {:>7}\n",
            p.id.to_string(),
            p.name,
            p.version,
            p.status.to_string(),
            p.health.state.to_string(),
            p.invocation_count,
            p.error_count
        ));
    }
    out
}

/// Runs `plughost list`.
pub async fn run_list(config: &PlughostConfig, json: bool) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let plugins = manager.list_plugins();
    manager.shutdown().await;

    if json {
        let rendered = serde_json::to_string_pretty(&plugins)
            .map_err(|e| PluginError::Internal(format!("failed to render plugins: {e}")))?;
        println!("{rendered}");
    } else {
        print!("{}", render_table(&plugins));
    }
    Ok(())
}

fn render_output(out: &CallOutput) -> String {
    let mut lines = Vec::new();
    if let Some(bytes) = &out.output {
        match out.output_str() {
            Some(text) => lines.push(text.to_string()),
            None => lines.push(format!("<{} bytes> {bytes:02x?}", bytes.len())),
        }
    }
    for value in &out.values {
        lines.push(match value {
            Value::I32(v) => format!("i32 {v}"),
            Value::I64(v) => format!("i64 {v}"),
            Value::F32(v) => format!("f32 {v}"),
            Value::F64(v) => format!("f64 {v}"),
        });
    }
    lines.join("\n")
}

/// Runs `plughost invoke`.
pub async fn run_invoke(
    config: &PlughostConfig,
    id: PluginId,
    export: &str,
    args: &[Arg],
    timeout_ms: Option<u64>,
) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let result = manager
        .invoke(id, export, args, timeout_ms.map(Duration::from_millis))
        .await;
    let out = finish(&manager, result).await?;
    let rendered = render_output(&out);
    if !rendered.is_empty() {
        println!("{rendered}");
    }
    Ok(())
}

/// Runs `plughost enable`.
pub async fn run_enable(config: &PlughostConfig, id: PluginId) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let result = manager.enable(id).await;
    finish(&manager, result).await?;
    println!("plugin {id} enabled");
    Ok(())
}

/// Runs `plughost disable`.
pub async fn run_disable(config: &PlughostConfig, id: PluginId) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let result = manager.disable(id).await;
    finish(&manager, result).await?;
    println!("plugin {id} disabled");
    Ok(())
}

/// Runs `plughost reload`.
pub async fn run_reload(config: &PlughostConfig, id: PluginId) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let result = manager.reload(id).await;
    finish(&manager, result).await?;
    println!("plugin {id} reloaded");
    Ok(())
}

/// Runs `plughost uninstall`.
pub async fn run_uninstall(config: &PlughostConfig, id: PluginId) -> Result<(), PluginError> {
    let manager = open(config).await?;
    let result = manager.uninstall(id).await;
    finish(&manager, result).await?;
    println!("plugin {id} uninstalled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_primitive_type() {
        assert_eq!(parse_arg("i32:7").unwrap(), Arg::from(7));
        assert_eq!(parse_arg("i64:-3").unwrap(), Arg::from(-3i64));
        assert_eq!(parse_arg("f32:0.5").unwrap(), Arg::from(0.5f32));
        assert_eq!(parse_arg("f64:2.25").unwrap(), Arg::from(2.25f64));
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(parse_arg("7").unwrap_err().contains("type:value"));
        assert!(parse_arg("u8:7").unwrap_err().contains("unknown argument type"));
        assert!(parse_arg("i32:seven").unwrap_err().contains("invalid i32 value"));
        assert!(parse_arg("i32:4294967296").is_err());
    }

    #[test]
    fn output_prefers_text_then_values() {
        let out = CallOutput {
            values: vec![Value::I32(0), Value::F64(1.5)],
            output: Some(b"pong".to_vec()),
        };
        assert_eq!(render_output(&out), "pong\ni32 0\nf64 1.5");

        let binary = CallOutput {
            values: vec![],
            output: Some(vec![0xff, 0x00]),
        };
        assert_eq!(render_output(&binary), "<2 bytes> [ff, 00]");
        assert_eq!(render_output(&CallOutput::default()), "");
    }

    #[test]
    fn empty_table_says_so() {
        assert_eq!(render_table(&[]), "no plugins installed");
    }
}
