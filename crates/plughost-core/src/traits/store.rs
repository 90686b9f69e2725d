// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence seam for plugin rows.

use async_trait::async_trait;

use crate::error::PluginError;
use crate::types::{NewPlugin, PluginId, PluginRecord, PluginStatus};

/// Durable storage for plugin metadata.
///
/// Every method is a single atomic statement against the backend. Callers
/// combine them into multi-step operations and handle compensation.
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Inserts a row and returns it with its assigned id.
    ///
    /// Returns [`PluginError::AlreadyExists`] when a row with the same name,
    /// version and description exists.
    async fn insert(&self, plugin: &NewPlugin) -> Result<PluginRecord, PluginError>;

    /// Sets `status` (and the derived `enabled` flag). `NotFound` if no row.
    async fn update_status(&self, id: PluginId, status: PluginStatus) -> Result<(), PluginError>;

    /// Records where the plugin's bundle lives. `NotFound` if no row.
    async fn set_bundle_path(&self, id: PluginId, path: &str) -> Result<(), PluginError>;

    /// Deletes a row. Returns whether a row was removed.
    async fn delete(&self, id: PluginId) -> Result<bool, PluginError>;

    async fn find_by_id(&self, id: PluginId) -> Result<Option<PluginRecord>, PluginError>;

    async fn find_by_name_version_description(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<Option<PluginRecord>, PluginError>;

    /// All rows ordered by id.
    async fn list(&self) -> Result<Vec<PluginRecord>, PluginError>;
}
