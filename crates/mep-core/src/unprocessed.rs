use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::metadata::{Metadata, ProcessorOptions};

/// A file handed to the store pipeline.
///
/// `client_name` is set for genuine uploads, where the bytes sit in a
/// temporary path and the browser supplied the original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub client_name: Option<String>,
}

impl SourceFile {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            client_name: None,
        }
    }

    pub fn uploaded(path: impl Into<PathBuf>, client_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            client_name: Some(client_name.into()),
        }
    }

    pub fn is_upload(&self) -> bool {
        self.client_name.is_some()
    }
}

/// Pipeline state for a file that has not been persisted yet.
#[derive(Debug)]
pub struct UnprocessedAttachment {
    source: SourceFile,
    file_name: String,
    mime_type: String,
    file_size: u64,
    metadata: Metadata,
    processor_options: ProcessorOptions,
    // Replacement bytes written by a processor; removed from disk on drop.
    replacement: Option<TempPath>,
}

impl UnprocessedAttachment {
    pub fn new(
        source: SourceFile,
        mime_type: impl Into<String>,
        file_size: u64,
        metadata: Metadata,
        processor_options: ProcessorOptions,
    ) -> Self {
        let file_name = source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            source,
            file_name,
            mime_type: mime_type.into(),
            file_size,
            metadata,
            processor_options,
            replacement: None,
        }
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// Path of the bytes to persist: the latest processor output, or the source.
    pub fn current_path(&self) -> &Path {
        match &self.replacement {
            Some(path) => &**path,
            None => self.source.path.as_path(),
        }
    }

    /// Swap in new bytes produced by a processor.
    pub fn replace_file(&mut self, path: TempPath, file_size: u64) {
        self.replacement = Some(path);
        self.file_size = file_size;
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn set_file_name(&mut self, file_name: impl Into<String>) {
        self.file_name = file_name.into();
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn processor_options(&self) -> &ProcessorOptions {
        &self.processor_options
    }

    pub fn processor_options_mut(&mut self) -> &mut ProcessorOptions {
        &mut self.processor_options
    }
}
