// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-based layered loading.
//!
//! Merge order, later wins: compiled defaults, `/etc/plughost/plughost.toml`,
//! `~/.config/plughost/plughost.toml`, `./plughost.toml`, `PLUGHOST_*` env.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::PlughostConfig;

const SYSTEM_CONFIG: &str = "/etc/plughost/plughost.toml";
const LOCAL_CONFIG: &str = "plughost.toml";

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("plughost/plughost.toml"));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    paths
}

/// Builds the full figment without extracting it.
pub fn build_figment() -> Figment {
    let figment = config_paths()
        .into_iter()
        .fold(defaults(), |figment, path| figment.merge(Toml::file(path)));
    figment.merge(env_provider())
}

pub fn load_config() -> Result<PlughostConfig, figment::Error> {
    build_figment().extract()
}

/// Loads defaults overlaid with a TOML string. No files, no env.
pub fn load_config_from_str(toml_content: &str) -> Result<PlughostConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

/// Loads one explicit file with env overrides.
pub fn load_config_from_path(path: &Path) -> Result<PlughostConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

fn defaults() -> Figment {
    Figment::new().merge(Serialized::defaults(PlughostConfig::default()))
}

/// Maps `PLUGHOST_<SECTION>_<KEY>` to `section.key`.
///
/// Only the first underscore after the section name becomes a dot, so
/// `PLUGHOST_PLUGINS_TIMEOUT_SECS` lands on `plugins.timeout_secs`.
fn env_provider() -> Env {
    Env::prefixed("PLUGHOST_").map(|key| {
        let key = key.as_str();
        ["plugins_", "storage_", "log_", "health_"]
            .iter()
            .find(|section| key.starts_with(*section))
            .map(|section| key.replacen(*section, &section.replace('_', "."), 1))
            .unwrap_or_else(|| key.to_string())
            .into()
    })
}
