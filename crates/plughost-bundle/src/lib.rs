// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin bundles on disk.
//!
//! Each installed plugin owns `{plugins_dir}/{name}-{id}/` holding
//! `plugin.wasm` and `plugin.toml`. The registry keeps no state beyond the
//! root directory; the directory tree is the source of truth.

pub mod manifest;
pub mod registry;

pub use manifest::{parse_manifest, render_manifest, validate_manifest};
pub use registry::{module_owner, Bundle, BundleRegistry, MANIFEST_FILE, WASM_FILE};
