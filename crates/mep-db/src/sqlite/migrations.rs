use rusqlite::Connection;

use super::map_sqlite_err;
use crate::DbError;

pub fn run(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(map_sqlite_err)?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        // v1: attachments, with `context` derived from the metadata JSON
        tracing::info!("applying sqlite migration v1 (attachments)");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attachments (
                 id          TEXT PRIMARY KEY,
                 file_name   TEXT NOT NULL CHECK(length(file_name) <= 255),
                 mime_type   TEXT NOT NULL CHECK(length(mime_type) <= 255),
                 file_size   INTEGER NOT NULL CHECK(file_size >= 0),
                 metadata    TEXT NOT NULL DEFAULT '{}' CHECK(json_valid(metadata)),
                 context     TEXT GENERATED ALWAYS AS (json_extract(metadata, '$.context')) VIRTUAL,
                 created_at  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_attachments_context ON attachments(context);

             INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));",
        )
        .map_err(map_sqlite_err)?;
    }

    Ok(())
}
