use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use mep_core::{Attachment, AttachmentId, MetadataValue};

use super::super::{SqliteDatabase, SqliteResultExt};
use crate::orphan::{orphan_sql, Dialect};
use crate::{attachment_from_columns, size_to_db, DbError, OrphanQuery};

const SELECT_COLUMNS: &str = "id, file_name, mime_type, file_size, metadata, created_at";

struct AttachmentRow {
    id: String,
    file_name: String,
    mime_type: String,
    file_size: i64,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl AttachmentRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            mime_type: row.get("mime_type")?,
            file_size: row.get("file_size")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_attachment(self) -> Result<Attachment, DbError> {
        attachment_from_columns(
            &self.id,
            self.file_name,
            self.mime_type,
            self.file_size,
            &self.metadata,
            self.created_at,
        )
    }
}

fn fetch(conn: &Connection, id: AttachmentId) -> Result<Attachment, DbError> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM attachments WHERE id = ?1"),
        params![id.to_string()],
        AttachmentRow::from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("attachment {id}")),
        other => DbError::Internal(other.to_string()),
    })?
    .into_attachment()
}

impl SqliteDatabase {
    pub fn insert_attachment_sync(&self, attachment: &Attachment) -> Result<(), DbError> {
        let file_size = size_to_db(attachment.file_size())?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO attachments (id, file_name, mime_type, file_size, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    attachment.id().to_string(),
                    attachment.file_name(),
                    attachment.mime_type(),
                    file_size,
                    attachment.metadata().to_json_string(),
                    attachment.created_at(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DbError::InvalidInput(format!("attachment {}: {e}", attachment.id()))
                }
                other => DbError::Internal(other.to_string()),
            })?;
            Ok(())
        })
    }

    pub fn get_attachment_sync(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        self.with_conn(|conn| fetch(conn, id))
    }

    pub fn patch_attachment_metadata_sync(
        &self,
        id: AttachmentId,
        key: &str,
        value: MetadataValue,
    ) -> Result<Attachment, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().to_db()?;
            let mut attachment = fetch(&tx, id)?;
            attachment
                .metadata_mut()
                .insert(key, value)
                .map_err(|e| DbError::InvalidInput(e.to_string()))?;
            tx.execute(
                "UPDATE attachments SET metadata = ?1 WHERE id = ?2",
                params![attachment.metadata().to_json_string(), id.to_string()],
            )
            .to_db()?;
            tx.commit().to_db()?;
            Ok(attachment)
        })
    }

    pub fn delete_attachment_sync(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().to_db()?;
            let attachment = fetch(&tx, id)?;
            tx.execute(
                "DELETE FROM attachments WHERE id = ?1",
                params![id.to_string()],
            )
            .to_db()?;
            tx.commit().to_db()?;
            Ok(attachment)
        })
    }

    pub fn delete_attachments_sync(&self, ids: &[AttachmentId]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().to_db()?;
            let mut deleted = 0u64;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM attachments WHERE id = ?1")
                    .to_db()?;
                for id in ids {
                    deleted += stmt.execute(params![id.to_string()]).to_db()? as u64;
                }
            }
            tx.commit().to_db()?;
            Ok(deleted)
        })
    }

    pub fn count_attachments_sync(&self) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT count(*) FROM attachments", [], |row| row.get(0))
                .to_db()
        })
    }

    pub fn existing_attachment_ids_sync(
        &self,
        ids: &[AttachmentId],
    ) -> Result<HashSet<AttachmentId>, DbError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        self.with_conn(|conn| {
            let mut found = HashSet::new();
            // SQLite caps bound parameters per statement.
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id FROM attachments WHERE id IN ({placeholders})"
                    ))
                    .to_db()?;
                let rows = stmt
                    .query_map(
                        params_from_iter(chunk.iter().map(|id| id.to_string())),
                        |row| row.get::<_, String>(0),
                    )
                    .to_db()?;
                for row in rows {
                    let raw = row.to_db()?;
                    let id = raw
                        .parse::<AttachmentId>()
                        .map_err(|e| DbError::Internal(e.to_string()))?;
                    found.insert(id);
                }
            }
            Ok(found)
        })
    }

    pub fn find_orphans_sync(
        &self,
        query: &OrphanQuery,
        after: Option<AttachmentId>,
        limit: u32,
    ) -> Result<Vec<Attachment>, DbError> {
        let sql = orphan_sql(query, Dialect::Sqlite);
        let cursor = after.map(|id| id.to_string()).unwrap_or_default();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).to_db()?;
            let rows = stmt
                .query_map(
                    params![query.context.bind_value(), cursor, i64::from(limit)],
                    AttachmentRow::from_row,
                )
                .to_db()?;
            rows.map(|row| row.to_db()?.into_attachment()).collect()
        })
    }

    /// Fetch a record if present, without treating absence as an error.
    pub fn find_attachment_sync(&self, id: AttachmentId) -> Result<Option<Attachment>, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM attachments WHERE id = ?1"),
                params![id.to_string()],
                AttachmentRow::from_row,
            )
            .optional()
            .to_db()?
            .map(AttachmentRow::into_attachment)
            .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use mep_core::{Metadata, SourceFile, UnprocessedAttachment};

    use super::*;
    use crate::ContextFilter;
    use crate::SqlIdent;

    fn attachment(context: &str) -> Attachment {
        let mut metadata = Metadata::new();
        metadata.insert("context", context).unwrap();
        let unprocessed = UnprocessedAttachment::new(
            SourceFile::local("/tmp/photo.jpg"),
            "image/jpeg",
            1024,
            metadata,
            Metadata::new(),
        );
        Attachment::from_processed(&unprocessed).unwrap()
    }

    fn db_with_posts() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE posts (id INTEGER PRIMARY KEY, cover_id TEXT);")
            .unwrap();
        db
    }

    #[test]
    fn insert_get_round_trip() {
        let db = db_with_posts();
        let a = attachment("Post::$cover");
        db.insert_attachment_sync(&a).unwrap();
        let loaded = db.get_attachment_sync(a.id()).unwrap();
        assert_eq!(loaded.id(), a.id());
        assert_eq!(loaded.file_name(), "photo.jpg");
        assert_eq!(loaded.context(), Some("Post::$cover"));
        assert_eq!(loaded.file_size(), 1024);
    }

    #[test]
    fn duplicate_insert_is_invalid_input() {
        let db = db_with_posts();
        let a = attachment("Post::$cover");
        db.insert_attachment_sync(&a).unwrap();
        assert!(matches!(
            db.insert_attachment_sync(&a),
            Err(DbError::InvalidInput(_))
        ));
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = db_with_posts();
        let err = db.get_attachment_sync(AttachmentId::generate()).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
        assert!(db
            .find_attachment_sync(AttachmentId::generate())
            .unwrap()
            .is_none());
    }

    #[test]
    fn patch_updates_generated_context_column() {
        let db = db_with_posts();
        let a = attachment("Post::$cover");
        db.insert_attachment_sync(&a).unwrap();
        db.patch_attachment_metadata_sync(a.id(), "context", "Post::$thumbnail".into())
            .unwrap();
        let context: String = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT context FROM attachments WHERE id = ?1",
                    params![a.id().to_string()],
                    |row| row.get(0),
                )
                .to_db()
            })
            .unwrap();
        assert_eq!(context, "Post::$thumbnail");
    }

    #[test]
    fn batch_delete_ignores_unknown_ids() {
        let db = db_with_posts();
        let a = attachment("Post::$cover");
        let b = attachment("Post::$cover");
        db.insert_attachment_sync(&a).unwrap();
        db.insert_attachment_sync(&b).unwrap();
        let deleted = db
            .delete_attachments_sync(&[a.id(), AttachmentId::generate()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count_attachments_sync().unwrap(), 1);
        let existing = db.existing_attachment_ids_sync(&[a.id(), b.id()]).unwrap();
        assert_eq!(existing, HashSet::from([b.id()]));
    }

    #[test]
    fn orphans_skip_referenced_rows_and_other_contexts() {
        let db = db_with_posts();
        let referenced = attachment("Post::$cover");
        let orphan = attachment("Post::$cover");
        let other = attachment("Article::$image");
        for a in [&referenced, &orphan, &other] {
            db.insert_attachment_sync(a).unwrap();
        }
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (cover_id) VALUES (?1)",
                params![referenced.id().to_string()],
            )
            .to_db()
        })
        .unwrap();

        let query = OrphanQuery {
            table: SqlIdent::new("posts").unwrap(),
            column: SqlIdent::new("cover_id").unwrap(),
            context: ContextFilter::Column("Post::$cover".into()),
        };
        let page = db.find_orphans_sync(&query, None, 100).unwrap();
        let ids: Vec<_> = page.iter().map(Attachment::id).collect();
        assert_eq!(ids, vec![orphan.id()]);

        let after = db.find_orphans_sync(&query, Some(orphan.id()), 100).unwrap();
        assert!(after.is_empty());
    }
}
