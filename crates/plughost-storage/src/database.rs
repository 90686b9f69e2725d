// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection setup: PRAGMAs, WAL, migrations.
//!
//! Writes are serialized through the one background thread of
//! `tokio-rusqlite`. Do not open extra connections for writes.

use std::path::Path;

use plughost_core::PluginError;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;";

/// An open, migrated database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and migrates it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PluginError::Persistence {
                message: format!("cannot create database directory {}", parent.display()),
                source: Some(Box::new(e)),
            })?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| PluginError::Persistence {
                message: format!("cannot open database {}", path.display()),
                source: Some(Box::new(e)),
            })?;
        let db = Self::prepare(conn).await?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// In-memory database, used by tests and one-shot tooling.
    pub async fn open_in_memory() -> Result<Self, PluginError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| PluginError::Persistence {
                message: "cannot open in-memory database".to_string(),
                source: Some(Box::new(e)),
            })?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, PluginError> {
        let applied = conn
            .call(|conn| -> Result<Result<usize, String>, rusqlite::Error> {
                conn.execute_batch(PRAGMAS)?;
                Ok(crate::migrations::run_migrations(conn))
            })
            .await
            .map_err(map_tr_err)?
            .map_err(|e| PluginError::persistence(format!("migration failed: {e}")))?;
        debug!(applied, "migrations applied");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoints the WAL so the main file is self-contained.
    pub async fn checkpoint(&self) -> Result<(), PluginError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Converts a `tokio-rusqlite` error into a persistence error.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> PluginError {
    PluginError::Persistence {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_parent_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/plughost.db");
        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());

        let tables = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'plugins'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(tables, 1);
        db.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plughost.db");
        drop(Database::open(&path).await.unwrap());
        Database::open(&path).await.unwrap();
    }
}
