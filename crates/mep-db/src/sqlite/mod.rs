pub(crate) mod migrations;
pub mod queries;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mep_core::{Attachment, AttachmentId, MetadataValue};
use rusqlite::Connection;

use crate::{Database, DbConfig, DbError, OrphanQuery};

/// Extension trait that converts `rusqlite::Result<T>` into `Result<T, DbError>`.
pub(crate) trait SqliteResultExt<T> {
    fn to_db(self) -> Result<T, DbError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn to_db(self) -> Result<T, DbError> {
        self.map_err(map_sqlite_err)
    }
}

#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(config: &DbConfig) -> Result<Self, DbError> {
        let path = config
            .sqlite_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join("mep.db"));
        std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))
            .map_err(|e| DbError::Internal(e.to_string()))?;
        Self::open_path(&path)
    }

    pub fn open_path(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).to_db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )
        .to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().to_db()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run raw SQL against the connection, e.g. to create host owner tables.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.with_conn(|conn| conn.execute_batch(sql).to_db())
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DbError::Internal("lock poisoned".into()))?;
        f(&conn)
    }

    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| DbError::Internal("lock poisoned".into()))?;
        f(&mut conn)
    }

    fn run_migrations(&self) -> Result<(), DbError> {
        self.with_conn(migrations::run)
    }
}

/// Map a `rusqlite::Error` into a `DbError::Internal`.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> DbError {
    DbError::Internal(e.to_string())
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        let db = self.clone();
        let attachment = attachment.clone();
        tokio::task::spawn_blocking(move || db.insert_attachment_sync(&attachment))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn get_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.get_attachment_sync(id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn patch_attachment_metadata(
        &self,
        id: AttachmentId,
        key: &str,
        value: &MetadataValue,
    ) -> Result<Attachment, DbError> {
        let db = self.clone();
        let key = key.to_string();
        let value = value.clone();
        tokio::task::spawn_blocking(move || db.patch_attachment_metadata_sync(id, &key, value))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.delete_attachment_sync(id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_attachments(&self, ids: &[AttachmentId]) -> Result<u64, DbError> {
        let db = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || db.delete_attachments_sync(&ids))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn count_attachments(&self) -> Result<i64, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.count_attachments_sync())
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn existing_attachment_ids(
        &self,
        ids: &[AttachmentId],
    ) -> Result<HashSet<AttachmentId>, DbError> {
        let db = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || db.existing_attachment_ids_sync(&ids))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn find_orphans(
        &self,
        query: &OrphanQuery,
        after: Option<AttachmentId>,
        limit: u32,
    ) -> Result<Vec<Attachment>, DbError> {
        let db = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || db.find_orphans_sync(&query, after, limit))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
}
