use std::collections::HashSet;

use chrono::{DateTime, Utc};

use mep_core::{Attachment, AttachmentId, MetadataValue};

use super::super::{pg_err, pg_not_found, PostgresDatabase};
use crate::orphan::{orphan_sql, Dialect};
use crate::{attachment_from_columns, size_to_db, DbError, OrphanQuery};

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    id: String,
    file_name: String,
    mime_type: String,
    file_size: i64,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AttachmentRow> for Attachment {
    type Error = DbError;

    fn try_from(r: AttachmentRow) -> Result<Self, Self::Error> {
        attachment_from_columns(
            &r.id,
            r.file_name,
            r.mime_type,
            r.file_size,
            &r.metadata,
            r.created_at,
        )
    }
}

const SELECT_ONE: &str = "SELECT id, file_name, mime_type, file_size, metadata, created_at
     FROM attachments WHERE id = $1";

fn id_strings(ids: &[AttachmentId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

impl PostgresDatabase {
    pub(crate) async fn pg_insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO attachments (id, file_name, mime_type, file_size, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(attachment.id().to_string())
        .bind(attachment.file_name())
        .bind(attachment.mime_type())
        .bind(size_to_db(attachment.file_size())?)
        .bind(attachment.metadata().to_json_string())
        .bind(attachment.created_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() || db.is_check_violation() => {
                DbError::InvalidInput(format!("attachment {}: {db}", attachment.id()))
            }
            _ => pg_err(e),
        })?;
        Ok(())
    }

    pub(crate) async fn pg_get_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        sqlx::query_as::<_, AttachmentRow>(SELECT_ONE)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_err)?
            .ok_or_else(|| pg_not_found(&format!("attachment {id}")))?
            .try_into()
    }

    pub(crate) async fn pg_patch_attachment_metadata(
        &self,
        id: AttachmentId,
        key: &str,
        value: &MetadataValue,
    ) -> Result<Attachment, DbError> {
        let mut tx = self.pool.begin().await.map_err(pg_err)?;

        let row = sqlx::query_as::<_, AttachmentRow>(&format!("{SELECT_ONE} FOR UPDATE"))
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(pg_err)?
            .ok_or_else(|| pg_not_found(&format!("attachment {id}")))?;
        let mut attachment = Attachment::try_from(row)?;
        attachment
            .metadata_mut()
            .insert(key, value.clone())
            .map_err(|e| DbError::InvalidInput(e.to_string()))?;

        sqlx::query("UPDATE attachments SET metadata = $1 WHERE id = $2")
            .bind(attachment.metadata().to_json_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(pg_err)?;

        tx.commit().await.map_err(pg_err)?;
        Ok(attachment)
    }

    pub(crate) async fn pg_delete_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        let row = sqlx::query_as::<_, AttachmentRow>(
            "DELETE FROM attachments WHERE id = $1
             RETURNING id, file_name, mime_type, file_size, metadata, created_at",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err)?
        .ok_or_else(|| pg_not_found(&format!("attachment {id}")))?;

        row.try_into()
    }

    pub(crate) async fn pg_delete_attachments(&self, ids: &[AttachmentId]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(pg_err)?;
        let result = sqlx::query("DELETE FROM attachments WHERE id = ANY($1)")
            .bind(id_strings(ids))
            .execute(&mut *tx)
            .await
            .map_err(pg_err)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn pg_count_attachments(&self) -> Result<i64, DbError> {
        sqlx::query_scalar("SELECT count(*) FROM attachments")
            .fetch_one(&self.pool)
            .await
            .map_err(pg_err)
    }

    pub(crate) async fn pg_existing_attachment_ids(
        &self,
        ids: &[AttachmentId],
    ) -> Result<HashSet<AttachmentId>, DbError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<String> =
            sqlx::query_scalar("SELECT id FROM attachments WHERE id = ANY($1)")
                .bind(id_strings(ids))
                .fetch_all(&self.pool)
                .await
                .map_err(pg_err)?;

        found
            .iter()
            .map(|raw| {
                raw.parse::<AttachmentId>()
                    .map_err(|e| DbError::Internal(e.to_string()))
            })
            .collect()
    }

    pub(crate) async fn pg_find_orphans(
        &self,
        query: &OrphanQuery,
        after: Option<AttachmentId>,
        limit: u32,
    ) -> Result<Vec<Attachment>, DbError> {
        let sql = orphan_sql(query, Dialect::Postgres);
        let rows = sqlx::query_as::<_, AttachmentRow>(&sql)
            .bind(query.context.bind_value())
            .bind(after.map(|id| id.to_string()).unwrap_or_default())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(pg_err)?;

        rows.into_iter().map(Attachment::try_from).collect()
    }
}
