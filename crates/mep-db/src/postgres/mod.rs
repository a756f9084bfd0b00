pub(crate) mod migrations;
pub mod queries;

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use mep_core::{Attachment, AttachmentId, MetadataValue};

use crate::{Database, DbError, OrphanQuery};

/// Map a sqlx::Error into a DbError::Internal.
pub(crate) fn pg_err(e: sqlx::Error) -> DbError {
    DbError::Internal(e.to_string())
}

/// Create a DbError::NotFound with the given entity description.
pub(crate) fn pg_not_found(entity: &str) -> DbError {
    DbError::NotFound(entity.to_string())
}

#[derive(Clone)]
pub struct PostgresDatabase {
    pub(crate) pool: PgPool,
}

impl PostgresDatabase {
    /// Connect to a Postgres database and run migrations.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(pg_err)?;

        let db = Self { pool };
        migrations::run(&db.pool).await?;
        Ok(db)
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        self.pg_insert_attachment(attachment).await
    }
    async fn get_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        self.pg_get_attachment(id).await
    }
    async fn patch_attachment_metadata(
        &self,
        id: AttachmentId,
        key: &str,
        value: &MetadataValue,
    ) -> Result<Attachment, DbError> {
        self.pg_patch_attachment_metadata(id, key, value).await
    }
    async fn delete_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        self.pg_delete_attachment(id).await
    }
    async fn delete_attachments(&self, ids: &[AttachmentId]) -> Result<u64, DbError> {
        self.pg_delete_attachments(ids).await
    }
    async fn count_attachments(&self) -> Result<i64, DbError> {
        self.pg_count_attachments().await
    }
    async fn existing_attachment_ids(
        &self,
        ids: &[AttachmentId],
    ) -> Result<HashSet<AttachmentId>, DbError> {
        self.pg_existing_attachment_ids(ids).await
    }
    async fn find_orphans(
        &self,
        query: &OrphanQuery,
        after: Option<AttachmentId>,
        limit: u32,
    ) -> Result<Vec<Attachment>, DbError> {
        self.pg_find_orphans(query, after, limit).await
    }
}
