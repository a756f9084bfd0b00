use std::sync::Arc;

use mep_core::{
    Attachment, AttachmentId, Metadata, MetadataValue, ProcessorOptions, SourceFile,
    UnprocessedAttachment,
};
use mep_db::Database;
use mep_store::{DriverError, RequestContext, StorageDriver};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::mime::detect_mime_type;
use crate::processor::ProcessorPipeline;
use crate::StorageError;

/// JSON representation of an attachment for API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub uuid: AttachmentId,
    pub public_url: String,
}

/// Entry point for storing, resolving and removing attachments.
///
/// Ties the processor pipeline, the active storage driver and the attachment
/// repository together. Bytes are always written before the record, so a
/// failure in between can leave a stray file but never a record without one.
#[derive(Clone)]
pub struct FileStorageManager {
    driver: Arc<dyn StorageDriver>,
    db: Arc<dyn Database>,
    pipeline: ProcessorPipeline,
}

impl FileStorageManager {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        db: Arc<dyn Database>,
        pipeline: ProcessorPipeline,
    ) -> Self {
        Self {
            driver,
            db,
            pipeline,
        }
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn pipeline(&self) -> &ProcessorPipeline {
        &self.pipeline
    }

    pub async fn store(
        &self,
        file: SourceFile,
        metadata: Metadata,
        options: ProcessorOptions,
    ) -> Result<Attachment, StorageError> {
        let not_found = || StorageError::FileNotFound(file.path.display().to_string());
        let file_size = match tokio::fs::metadata(&file.path).await {
            Ok(m) if m.is_file() => m.len(),
            _ => return Err(not_found()),
        };
        if tokio::fs::File::open(&file.path).await.is_err() {
            return Err(not_found());
        }

        let name_hint = file
            .client_name
            .clone()
            .or_else(|| {
                file.path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        let mime_type = detect_mime_type(&file.path, &name_hint).await;
        let unprocessed = UnprocessedAttachment::new(
            file,
            mime_type,
            file_size,
            metadata,
            options,
        );

        let processed = self.pipeline.run(unprocessed).await?;
        let attachment = Attachment::from_processed(&processed)?;

        self.driver
            .store(processed.current_path(), &attachment)
            .await?;
        if let Err(e) = self.db.insert_attachment(&attachment).await {
            warn!(id = %attachment.id(), "record save failed, removing stored file: {e}");
            if let Err(cleanup) = self.driver.remove_attached_file(&attachment).await {
                warn!(id = %attachment.id(), "stored file left behind: {cleanup}");
            }
            return Err(e.into());
        }

        info!(
            id = %attachment.id(),
            file = attachment.file_name(),
            size = attachment.file_size(),
            "stored attachment"
        );
        Ok(attachment)
    }

    pub fn public_url(&self, attachment: &Attachment, request: Option<&RequestContext>) -> String {
        self.driver.public_url(attachment, request)
    }

    pub async fn get(&self, id: AttachmentId) -> Result<Attachment, StorageError> {
        Ok(self.db.get_attachment(id).await?)
    }

    pub async fn patch_metadata(
        &self,
        id: AttachmentId,
        key: &str,
        value: impl Into<MetadataValue>,
    ) -> Result<Attachment, StorageError> {
        Ok(self
            .db
            .patch_attachment_metadata(id, key, &value.into())
            .await?)
    }

    /// Delete the record, then its file. A file that is already gone is not
    /// an error.
    pub async fn remove(&self, attachment: &Attachment) -> Result<(), StorageError> {
        self.db.delete_attachment(attachment.id()).await?;
        remove_file_lenient(self.driver.as_ref(), attachment).await?;
        info!(id = %attachment.id(), "removed attachment");
        Ok(())
    }

    pub fn normalize(
        &self,
        attachment: &Attachment,
        request: Option<&RequestContext>,
    ) -> AttachmentView {
        AttachmentView {
            uuid: attachment.id(),
            public_url: self.public_url(attachment, request),
        }
    }
}

/// Remove the backing file, treating an absent file as already removed.
/// Returns whether a file was actually deleted.
pub(crate) async fn remove_file_lenient(
    driver: &dyn StorageDriver,
    attachment: &Attachment,
) -> Result<bool, DriverError> {
    match driver.remove_attached_file(attachment).await {
        Ok(()) => Ok(true),
        Err(DriverError::AttachedFileNotFound(path)) => {
            warn!(id = %attachment.id(), %path, "attached file already missing");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use mep_db::SqliteDatabase;
    use mep_store::{LocalDriver, LocalDriverConfig};

    use super::*;

    fn manager(root: &std::path::Path) -> FileStorageManager {
        let driver = LocalDriver::new(LocalDriverConfig {
            storage_path: root.to_path_buf(),
            public_url_path_prefix: "/attachments".into(),
            public_url_prefix: None,
        });
        FileStorageManager::new(
            Arc::new(driver),
            Arc::new(SqliteDatabase::open_in_memory().unwrap()),
            ProcessorPipeline::default(),
        )
    }

    #[tokio::test]
    async fn store_rejects_missing_and_directory_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(&tmp.path().join("store"));

        let missing = m
            .store(
                SourceFile::local(tmp.path().join("nope.png")),
                Metadata::new(),
                Metadata::new(),
            )
            .await;
        assert!(matches!(missing, Err(StorageError::FileNotFound(_))));

        let dir = m
            .store(SourceFile::local(tmp.path()), Metadata::new(), Metadata::new())
            .await;
        assert!(matches!(dir, Err(StorageError::FileNotFound(_))));
        assert_eq!(m.db().count_attachments().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_guesses_mime_and_persists_record() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();
        let m = manager(&tmp.path().join("store"));

        let a = m
            .store(SourceFile::local(&source), Metadata::new(), Metadata::new())
            .await
            .unwrap();
        assert_eq!(a.mime_type(), "text/plain");
        assert_eq!(a.file_size(), 5);
        assert_eq!(m.get(a.id()).await.unwrap().id(), a.id());
        assert!(m.driver().attached_file_exists(&a).await.unwrap());
    }

    #[tokio::test]
    async fn remove_is_idempotent_for_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("a.png");
        std::fs::write(&source, b"png").unwrap();
        let m = manager(&tmp.path().join("store"));
        let a = m
            .store(SourceFile::local(&source), Metadata::new(), Metadata::new())
            .await
            .unwrap();

        m.driver().remove_attached_file(&a).await.unwrap();
        m.remove(&a).await.unwrap();
        assert!(matches!(
            m.get(a.id()).await,
            Err(StorageError::Db(mep_db::DbError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn patch_and_normalize() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("a.png");
        std::fs::write(&source, b"png").unwrap();
        let m = manager(&tmp.path().join("store"));
        let a = m
            .store(SourceFile::local(&source), Metadata::new(), Metadata::new())
            .await
            .unwrap();

        let patched = m.patch_metadata(a.id(), "alt", "A png").await.unwrap();
        assert_eq!(patched.metadata().get("alt").and_then(|v| v.as_str()), Some("A png"));

        let view = m.normalize(&a, Some(&RequestContext::new("https", "example.com")));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["uuid"], a.id().to_string());
        assert_eq!(
            json["publicUrl"],
            format!("https://example.com/attachments/{}/a.png", a.id())
        );
    }

    #[tokio::test]
    async fn store_takes_mime_type_from_content() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("upload");
        std::fs::write(&source, b"%PDF-1.4\n%fake").unwrap();
        let m = manager(&tmp.path().join("store"));

        let a = m
            .store(
                SourceFile::uploaded(&source, "cat.png".to_string()),
                Metadata::new(),
                Metadata::new(),
            )
            .await
            .unwrap();
        assert_eq!(a.mime_type(), "application/pdf");
    }
}
