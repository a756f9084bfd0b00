use sqlx::PgPool;

use crate::DbError;

/// Fixed key for the advisory lock that serialises migration runs.
const MIGRATION_LOCK_KEY: i64 = 0x6D65_705F_6174_7463; // "mep_attc"

const V1_ATTACHMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS attachments (
    id          TEXT COLLATE "C" PRIMARY KEY,
    file_name   VARCHAR(255) NOT NULL,
    mime_type   VARCHAR(255) NOT NULL,
    file_size   BIGINT NOT NULL CHECK (file_size >= 0),
    metadata    TEXT NOT NULL DEFAULT '{}',
    context     TEXT GENERATED ALWAYS AS (metadata::jsonb ->> 'context') STORED,
    created_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachments_context ON attachments (context);
INSERT INTO schema_version (version, applied_at) VALUES (1, now());
"#;

pub async fn run(pool: &PgPool) -> Result<(), DbError> {
    // Session-level lock; concurrent processes wait here instead of racing.
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(pool)
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?;

    let result = run_inner(pool).await;

    let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(pool)
        .await;

    result
}

async fn run_inner(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| DbError::Internal(e.to_string()))?;

    let current: i32 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?;

    if current < 1 {
        tracing::info!("applying postgres migration v1 (attachments)");
        sqlx::raw_sql(V1_ATTACHMENTS)
            .execute(pool)
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?;
    }

    Ok(())
}
