use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mep_core::Attachment;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::Bucket;
use tracing::{debug, warn};

use crate::{
    attachment_key, join_segments, parse_attachment_key, DriverError, RequestContext,
    S3DriverConfig, StorageDriver, StoredFile,
};

/// Upper bound on any single call to the object store. No retry is attempted.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Stores attachments in an S3-compatible bucket served through a CDN.
pub struct S3Driver {
    bucket: Box<Bucket>,
    config: S3DriverConfig,
}

impl std::fmt::Debug for S3Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Driver").finish_non_exhaustive()
    }
}

impl S3Driver {
    pub fn new(config: S3DriverConfig) -> Result<Self, DriverError> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url.clone(),
        };

        let credentials = Credentials::new(
            Some(config.key.as_str()),
            Some(config.secret.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| DriverError::Config(format!("credentials: {e}")))?;

        if config.bucket_name.is_empty() {
            return Err(DriverError::Config("bucket name required".into()));
        }

        let mut bucket = Bucket::new(&config.bucket_name, region, credentials)
            .map_err(|e| DriverError::Config(format!("bucket: {e}")))?;
        bucket.set_path_style();
        bucket.add_header(
            "Cache-Control",
            &format!("public, max-age={}", config.cdn_cache_max_age),
        );

        Ok(Self { bucket, config })
    }

    fn object_key(&self, attachment: &Attachment) -> String {
        join_segments(&[
            self.config.objects_key_prefix.as_deref().unwrap_or_default(),
            &attachment_key(attachment.id(), attachment.file_name()),
        ])
    }

    fn key_prefix(&self) -> String {
        match self.config.objects_key_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("{p}/"),
            _ => String::new(),
        }
    }

    async fn call<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, S3Error>>,
    ) -> Result<T, DriverError> {
        bounded(op, async { fut.await.map_err(|e| DriverError::Io(format!("s3 {op}: {e}"))) }).await
    }

    /// One `ListObjectsV2` page of stored files plus the continuation token.
    async fn list_page(
        &self,
        prefix: &str,
        token: Option<String>,
    ) -> Result<(Vec<StoredFile>, Option<String>), DriverError> {
        let (page, _) = self
            .call(
                "list",
                self.bucket
                    .list_page(prefix.to_string(), None, token, None, None),
            )
            .await?;
        let files = page
            .contents
            .iter()
            .filter_map(|object| stored_file(prefix, &object.key, &object.last_modified))
            .collect();
        let next = page.next_continuation_token.filter(|_| page.is_truncated);
        Ok((files, next))
    }
}

/// Run one network call under [`OPERATION_TIMEOUT`].
async fn bounded<T>(
    op: &str,
    fut: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(format!(
            "s3 {op} exceeded {}s",
            OPERATION_TIMEOUT.as_secs()
        ))),
    }
}

/// Map a listed object to a stored file, skipping keys that are not
/// `{prefix}{id}/{fileName}`.
fn stored_file(prefix: &str, key: &str, last_modified: &str) -> Option<StoredFile> {
    let relative = key.strip_prefix(prefix)?;
    let (attachment_id, _) = parse_attachment_key(relative)?;
    // An unparseable date counts as fresh, keeping the object out of any sweep.
    let last_modified = DateTime::parse_from_rfc3339(last_modified)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(%key, "unparseable last_modified: {e}");
            Utc::now()
        });
    Some(StoredFile {
        key: relative.to_string(),
        attachment_id,
        last_modified,
    })
}

#[async_trait]
impl StorageDriver for S3Driver {
    async fn store(&self, source: &Path, attachment: &Attachment) -> Result<(), DriverError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| DriverError::Io(format!("read {}: {e}", source.display())))?;
        let key = self.object_key(attachment);
        let response = self
            .call(
                "put",
                self.bucket
                    .put_object_with_content_type(&key, &data, attachment.mime_type()),
            )
            .await?;
        if response.status_code() >= 300 {
            return Err(DriverError::Io(format!(
                "s3 put {key}: status {}",
                response.status_code()
            )));
        }
        debug!(%key, bytes = data.len(), "uploaded attachment object");
        Ok(())
    }

    async fn attached_file_exists(&self, attachment: &Attachment) -> Result<bool, DriverError> {
        let key = self.object_key(attachment);
        let (_, status) = self.call("head", self.bucket.head_object(&key)).await?;
        match status {
            404 => Ok(false),
            s if s < 300 => Ok(true),
            s => Err(DriverError::Io(format!("s3 head {key}: status {s}"))),
        }
    }

    async fn remove_attached_file(&self, attachment: &Attachment) -> Result<(), DriverError> {
        // DELETE succeeds on absent keys, so check first to report a missing file.
        if !self.attached_file_exists(attachment).await? {
            return Err(DriverError::AttachedFileNotFound(self.object_key(attachment)));
        }
        let key = self.object_key(attachment);
        let response = self.call("delete", self.bucket.delete_object(&key)).await?;
        if response.status_code() >= 300 {
            return Err(DriverError::Io(format!(
                "s3 delete {key}: status {}",
                response.status_code()
            )));
        }
        Ok(())
    }

    fn public_url(&self, attachment: &Attachment, _request: Option<&RequestContext>) -> String {
        format!(
            "{}/{}",
            self.config.cdn_url.trim_end_matches('/'),
            self.object_key(attachment)
        )
    }

    async fn list_stored_files(&self) -> Result<Vec<StoredFile>, DriverError> {
        let prefix = self.key_prefix();
        let mut files = Vec::new();
        let mut token = None;
        loop {
            let (page, next) = self.list_page(&prefix, token).await?;
            files.extend(page);
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(files)
    }
}
