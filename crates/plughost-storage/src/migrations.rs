// SPDX-FileCopyrightText: 2026 Plughost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations, applied on every open.

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Applies pending migrations. History lives in `refinery_schema_history`.
///
/// Errors are returned as strings so callers can run this inside a
/// `tokio-rusqlite` closure whose error type is `rusqlite::Error`.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<usize, String> {
    embedded::migrations::runner()
        .run(conn)
        .map(|report| report.applied_migrations().len())
        .map_err(|e| e.to_string())
}
