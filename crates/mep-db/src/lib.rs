pub mod ident;
pub mod orphan;
pub mod registry;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use ident::SqlIdent;
pub use orphan::{ContextFilter, OrphanQuery};
pub use registry::{Association, AssociationRegistry};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mep_core::{Attachment, AttachmentId, MetadataValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Internal(String),
}

/// Rows fetched per query when streaming orphan candidates.
pub const ORPHAN_PAGE_SIZE: u32 = 100;

/// Persistence of attachment records.
///
/// Owner tables belong to the host application; this layer only reads them
/// through the joins built from an [`OrphanQuery`].
#[async_trait]
pub trait Database: Send + Sync {
    /// Persist a new record. Committed before returning.
    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError>;

    async fn get_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError>;

    /// Set a single metadata key, leaving every other key untouched.
    async fn patch_attachment_metadata(
        &self,
        id: AttachmentId,
        key: &str,
        value: &MetadataValue,
    ) -> Result<Attachment, DbError>;

    /// Delete one record, returning it.
    async fn delete_attachment(&self, id: AttachmentId) -> Result<Attachment, DbError>;

    /// Delete many records in a single transaction. Unknown ids are ignored.
    async fn delete_attachments(&self, ids: &[AttachmentId]) -> Result<u64, DbError>;

    async fn count_attachments(&self) -> Result<i64, DbError>;

    /// The subset of `ids` that still have a record.
    async fn existing_attachment_ids(
        &self,
        ids: &[AttachmentId],
    ) -> Result<HashSet<AttachmentId>, DbError>;

    /// One page of unreferenced attachments, ordered by id, strictly after `after`.
    async fn find_orphans(
        &self,
        query: &OrphanQuery,
        after: Option<AttachmentId>,
        limit: u32,
    ) -> Result<Vec<Attachment>, DbError>;
}

// -- Configuration --

/// Which backend to open.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    /// `postgres://` URL. When set, the Postgres backend is used.
    pub database_url: Option<String>,
    /// SQLite file path (defaults to `$XDG_DATA_HOME/mep/mep.db`).
    pub sqlite_path: Option<String>,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("MEP_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .ok()
                .filter(|url| url.starts_with("postgres")),
            sqlite_path: std::env::var("MEP_SQLITE_PATH").ok(),
        }
    }
}

/// Open the configured backend and run its migrations.
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn Database>, DbError> {
    if let Some(url) = &config.database_url {
        #[cfg(feature = "postgres")]
        {
            return Ok(Arc::new(postgres::PostgresDatabase::connect(url).await?));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(DbError::InvalidInput(format!(
                "database url {url:?} requires the 'postgres' feature"
            )));
        }
    }
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteDatabase::open(config)?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Err(DbError::InvalidInput(
            "no database url configured and the 'sqlite' feature is disabled".into(),
        ))
    }
}

pub fn data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("mep")
}

pub(crate) fn size_to_db(size: u64) -> Result<i64, DbError> {
    i64::try_from(size).map_err(|_| DbError::InvalidInput(format!("file size {size} out of range")))
}

pub(crate) fn size_from_db(size: i64) -> Result<u64, DbError> {
    u64::try_from(size).map_err(|_| DbError::Internal(format!("negative file size {size}")))
}

/// Rebuild an attachment from column values shared by both backends.
pub(crate) fn attachment_from_columns(
    id: &str,
    file_name: String,
    mime_type: String,
    file_size: i64,
    metadata: &str,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<Attachment, DbError> {
    let id: AttachmentId = id
        .parse()
        .map_err(|e: mep_core::AttachmentError| DbError::Internal(e.to_string()))?;
    let metadata = mep_core::Metadata::from_json_str(metadata)
        .map_err(|e| DbError::Internal(format!("attachment {id}: {e}")))?;
    Attachment::restore(
        id,
        file_name,
        mime_type,
        size_from_db(file_size)?,
        metadata,
        created_at,
    )
    .map_err(|e| DbError::Internal(format!("attachment {id}: {e}")))
}
