use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mep_core::Attachment;
use tracing::debug;

use crate::{
    attachment_key, join_segments, parse_attachment_key, DriverError, LocalDriverConfig,
    RequestContext, StorageDriver, StoredFile,
};

/// Stores attachments on the local filesystem under `storage_path`.
pub struct LocalDriver {
    config: LocalDriverConfig,
}

impl LocalDriver {
    pub fn new(config: LocalDriverConfig) -> Self {
        Self { config }
    }

    pub fn storage_path(&self) -> &Path {
        &self.config.storage_path
    }

    fn resolve(&self, attachment: &Attachment) -> PathBuf {
        self.config
            .storage_path
            .join(attachment_key(attachment.id(), attachment.file_name()))
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    async fn store(&self, source: &Path, attachment: &Attachment) -> Result<(), DriverError> {
        let path = self.resolve(attachment);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DriverError::Io(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::copy(source, &path).await.map_err(|e| {
            DriverError::Io(format!(
                "copy {} -> {}: {e}",
                source.display(),
                path.display()
            ))
        })?;
        debug!(path = %path.display(), "stored attachment file");
        Ok(())
    }

    async fn attached_file_exists(&self, attachment: &Attachment) -> Result<bool, DriverError> {
        let path = self.resolve(attachment);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| DriverError::Io(format!("exists {}: {e}", path.display())))
    }

    async fn remove_attached_file(&self, attachment: &Attachment) -> Result<(), DriverError> {
        let path = self.resolve(attachment);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriverError::AttachedFileNotFound(path.display().to_string()))
            }
            Err(e) => {
                return Err(DriverError::Io(format!("delete {}: {e}", path.display())))
            }
        }

        // Prune the per-attachment directory once it is empty.
        if let Some(parent) = path.parent() {
            if parent != self.config.storage_path {
                match tokio::fs::remove_dir(parent).await {
                    Ok(()) => debug!(dir = %parent.display(), "pruned attachment directory"),
                    Err(e) => debug!(dir = %parent.display(), "kept attachment directory: {e}"),
                }
            }
        }
        Ok(())
    }

    fn public_url(&self, attachment: &Attachment, request: Option<&RequestContext>) -> String {
        let prefix = match &self.config.public_url_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => request.map(RequestContext::scheme_and_host).unwrap_or_default(),
        };
        let path = join_segments(&[
            &self.config.public_url_path_prefix,
            &attachment_key(attachment.id(), attachment.file_name()),
        ]);
        format!("{prefix}/{path}")
    }

    async fn list_stored_files(&self) -> Result<Vec<StoredFile>, DriverError> {
        let root = &self.config.storage_path;
        let mut files = Vec::new();
        let mut dirs = match tokio::fs::read_dir(root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(DriverError::Io(format!("list {}: {e}", root.display()))),
        };
        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| DriverError::Io(format!("read_dir entry: {e}")))?
        {
            let is_dir = dir
                .file_type()
                .await
                .map_err(|e| DriverError::Io(format!("file_type: {e}")))?
                .is_dir();
            if !is_dir {
                continue;
            }
            let mut entries = tokio::fs::read_dir(dir.path())
                .await
                .map_err(|e| DriverError::Io(format!("list {}: {e}", dir.path().display())))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| DriverError::Io(format!("read_dir entry: {e}")))?
            {
                let key = format!(
                    "{}/{}",
                    dir.file_name().to_string_lossy(),
                    entry.file_name().to_string_lossy()
                );
                let Some((attachment_id, _)) = parse_attachment_key(&key) else {
                    continue;
                };
                let modified = entry
                    .metadata()
                    .await
                    .and_then(|m| m.modified())
                    .map_err(|e| DriverError::Io(format!("stat {key}: {e}")))?;
                files.push(StoredFile {
                    key,
                    attachment_id,
                    last_modified: DateTime::<Utc>::from(modified),
                });
            }
        }
        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(files)
    }
}
