// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed [`PluginStore`].

use std::str::FromStr;

use async_trait::async_trait;
use plughost_core::{NewPlugin, PluginError, PluginId, PluginRecord, PluginStatus, PluginStore};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, name, version, description, author, enabled, status, bundle_path, \
                       manifest_toml, installed_at, updated_at";

/// Plugin rows stored in the `plugins` table.
#[derive(Clone)]
pub struct SqlitePluginStore {
    db: Database,
}

impl SqlitePluginStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn row_to_record(row: &Row<'_>) -> Result<PluginRecord, rusqlite::Error> {
    let status: String = row.get(6)?;
    let status = PluginStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PluginRecord {
        id: PluginId(row.get(0)?),
        name: row.get(1)?,
        version: row.get(2)?,
        description: row.get(3)?,
        author: row.get(4)?,
        enabled: row.get(5)?,
        status,
        bundle_path: row.get(7)?,
        manifest_toml: row.get(8)?,
        installed_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[async_trait]
impl PluginStore for SqlitePluginStore {
    async fn insert(&self, plugin: &NewPlugin) -> Result<PluginRecord, PluginError> {
        let plugin = plugin.clone();
        let name = plugin.name.clone();
        let version = plugin.version.clone();
        let inserted = self
            .db
            .connection()
            .call(move |conn| -> Result<Option<PluginRecord>, rusqlite::Error> {
                let timestamp = now();
                let result = conn.execute(
                    "INSERT INTO plugins (name, version, description, author, enabled, status,
                                          manifest_toml, installed_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        plugin.name,
                        plugin.version,
                        plugin.description,
                        plugin.author,
                        plugin.status.is_enabled(),
                        plugin.status.to_string(),
                        plugin.manifest_toml,
                        timestamp,
                    ],
                );
                match result {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(failure, _))
                        if failure.code == ErrorCode::ConstraintViolation =>
                    {
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
                let id = conn.last_insert_rowid();
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM plugins WHERE id = ?1"),
                    params![id],
                    row_to_record,
                )
                .map(Some)
            })
            .await
            .map_err(map_tr_err)?;

        match inserted {
            Some(record) => {
                debug!(plugin_id = %record.id, name = %record.name, "plugin row inserted");
                Ok(record)
            }
            None => Err(PluginError::AlreadyExists {
                name,
                version,
                existing: None,
            }),
        }
    }

    async fn update_status(&self, id: PluginId, status: PluginStatus) -> Result<(), PluginError> {
        let changed = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE plugins SET status = ?1, enabled = ?2, updated_at = ?3 WHERE id = ?4",
                    params![status.to_string(), status.is_enabled(), now(), id.0],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if changed == 0 {
            return Err(PluginError::NotFound(id));
        }
        Ok(())
    }

    async fn set_bundle_path(&self, id: PluginId, path: &str) -> Result<(), PluginError> {
        let path = path.to_string();
        let changed = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE plugins SET bundle_path = ?1, updated_at = ?2 WHERE id = ?3",
                    params![path, now(), id.0],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if changed == 0 {
            return Err(PluginError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: PluginId) -> Result<bool, PluginError> {
        let removed = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute("DELETE FROM plugins WHERE id = ?1", params![id.0])
            })
            .await
            .map_err(map_tr_err)?;
        Ok(removed > 0)
    }

    async fn find_by_id(&self, id: PluginId) -> Result<Option<PluginRecord>, PluginError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Option<PluginRecord>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM plugins WHERE id = ?1"),
                    params![id.0],
                    row_to_record,
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn find_by_name_version_description(
        &self,
        name: &str,
        version: &str,
        description: &str,
    ) -> Result<Option<PluginRecord>, PluginError> {
        let (name, version, description) =
            (name.to_string(), version.to_string(), description.to_string());
        self.db
            .connection()
            .call(move |conn| -> Result<Option<PluginRecord>, rusqlite::Error> {
                conn.query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM plugins
                         WHERE name = ?1 AND version = ?2 AND description = ?3"
                    ),
                    params![name, version, description],
                    row_to_record,
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn list(&self) -> Result<Vec<PluginRecord>, PluginError> {
        self.db
            .connection()
            .call(|conn| -> Result<Vec<PluginRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM plugins ORDER BY id"))?;
                let rows = stmt.query_map([], row_to_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqlitePluginStore {
        SqlitePluginStore::new(Database::open_in_memory().await.unwrap())
    }

    fn new_plugin(name: &str, version: &str) -> NewPlugin {
        NewPlugin {
            name: name.to_string(),
            version: version.to_string(),
            description: "test plugin".to_string(),
            author: "ops".to_string(),
            status: PluginStatus::Installed,
            manifest_toml: format!("[plugin]\nname = \"{name}\"\nversion = \"{version}\"\n"),
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = store().await;
        let a = store.insert(&new_plugin("echo", "1.0.0")).await.unwrap();
        let b = store.insert(&new_plugin("echo", "1.1.0")).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, PluginStatus::Installed);
        assert!(!a.enabled);
        assert_eq!(a.author, "ops");
        assert_eq!(a.installed_at, a.updated_at);
    }

    #[tokio::test]
    async fn duplicate_identity_is_already_exists() {
        let store = store().await;
        store.insert(&new_plugin("echo", "1.0.0")).await.unwrap();
        let err = store.insert(&new_plugin("echo", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_status_sets_enabled_flag() {
        let store = store().await;
        let record = store.insert(&new_plugin("echo", "1.0.0")).await.unwrap();

        store.update_status(record.id, PluginStatus::Active).await.unwrap();
        let active = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(active.status, PluginStatus::Active);
        assert!(active.enabled);

        store.update_status(record.id, PluginStatus::Disabled).await.unwrap();
        let disabled = store.find_by_id(record.id).await.unwrap().unwrap();
        assert!(!disabled.enabled);
    }

    #[tokio::test]
    async fn update_status_of_missing_row_is_not_found() {
        let store = store().await;
        let err = store
            .update_status(PluginId(42), PluginStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(PluginId(42))));
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let store = store().await;
        let record = store.insert(&new_plugin("echo", "1.0.0")).await.unwrap();
        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(store.find_by_id(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_identity_and_list() {
        let store = store().await;
        let a = store.insert(&new_plugin("alpha", "0.1.0")).await.unwrap();
        let b = store.insert(&new_plugin("beta", "0.2.0")).await.unwrap();
        store.set_bundle_path(b.id, "/plugins/beta-2").await.unwrap();

        let found = store
            .find_by_name_version_description("alpha", "0.1.0", "test plugin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);
        assert!(store
            .find_by_name_version_description("alpha", "0.1.0", "other")
            .await
            .unwrap()
            .is_none());

        let all = store.list().await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(all[1].bundle_path, "/plugins/beta-2");
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plughost.db");
        let id = {
            let store = SqlitePluginStore::new(Database::open(&path).await.unwrap());
            store.insert(&new_plugin("echo", "1.0.0")).await.unwrap().id
        };
        let store = SqlitePluginStore::new(Database::open(&path).await.unwrap());
        assert!(store.find_by_id(id).await.unwrap().is_some());
    }
}
