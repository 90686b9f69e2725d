// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for plugin metadata.
//!
//! WAL-mode SQLite with embedded refinery migrations. All statements run on
//! the single background thread owned by `tokio-rusqlite`.

pub mod database;
pub mod migrations;
pub mod plugin_store;

pub use database::Database;
pub use plugin_store::SqlitePluginStore;
