mod local;
#[cfg(feature = "s3")]
mod s3;

pub use local::LocalDriver;
#[cfg(feature = "s3")]
pub use s3::S3Driver;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mep_core::{Attachment, AttachmentId};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("attached file not found: {0}")]
    AttachedFileNotFound(String),

    #[error("storage i/o error: {0}")]
    Io(String),

    #[error("storage timeout: {0}")]
    Timeout(String),

    #[error("storage configuration: {0}")]
    Config(String),
}

/// Scheme and host of the HTTP request being served, used when no absolute
/// public URL prefix is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub scheme: String,
    pub host: String,
}

impl RequestContext {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    pub fn scheme_and_host(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

/// A file found in the backend while walking its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub attachment_id: AttachmentId,
    pub last_modified: DateTime<Utc>,
}

impl StoredFile {
    pub fn file_name(&self) -> &str {
        self.key.split_once('/').map_or("", |(_, name)| name)
    }
}

/// Backend-specific persistence of attachment bytes.
///
/// Every file lives under `{attachmentId}/{fileName}`, so no lookup is ever
/// needed to locate it.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Copy the bytes at `source` to the attachment's location.
    async fn store(&self, source: &Path, attachment: &Attachment) -> Result<(), DriverError>;

    async fn attached_file_exists(&self, attachment: &Attachment) -> Result<bool, DriverError>;

    /// Delete the bytes. Returns `DriverError::AttachedFileNotFound` if absent.
    async fn remove_attached_file(&self, attachment: &Attachment) -> Result<(), DriverError>;

    /// Public URL of the attachment. Pure, performs no I/O.
    fn public_url(&self, attachment: &Attachment, request: Option<&RequestContext>) -> String;

    /// Every attachment file currently held by the backend.
    async fn list_stored_files(&self) -> Result<Vec<StoredFile>, DriverError>;
}

// -- Key helpers --

pub fn attachment_key(id: AttachmentId, file_name: &str) -> String {
    format!("{id}/{file_name}")
}

/// Split a `{id}/{fileName}` key, ignoring anything that does not match.
pub fn parse_attachment_key(key: &str) -> Option<(AttachmentId, &str)> {
    let (id, file_name) = key.split_once('/')?;
    if file_name.is_empty() || file_name.contains('/') {
        return None;
    }
    Some((id.parse().ok()?, file_name))
}

/// Join URL or key segments with single slashes.
fn join_segments(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// -- Configuration --

pub const DEFAULT_CDN_CACHE_MAX_AGE: u64 = 604_800;

#[derive(Debug, Clone)]
pub struct LocalDriverConfig {
    /// Filesystem root under which `{id}/{fileName}` files are written.
    pub storage_path: PathBuf,
    /// URL path segment the storage root is served under, e.g. `/attachments`.
    pub public_url_path_prefix: String,
    /// Absolute `scheme://host` override. Falls back to the current request.
    pub public_url_prefix: Option<String>,
}

#[derive(Clone)]
pub struct S3DriverConfig {
    pub region: String,
    pub endpoint_url: String,
    pub key: String,
    pub secret: String,
    pub bucket_name: String,
    pub cdn_url: String,
    pub objects_key_prefix: Option<String>,
    pub cdn_cache_max_age: u64,
}

impl std::fmt::Debug for S3DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3DriverConfig")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket_name", &self.bucket_name)
            .field("cdn_url", &self.cdn_url)
            .field("objects_key_prefix", &self.objects_key_prefix)
            .field("cdn_cache_max_age", &self.cdn_cache_max_age)
            .finish_non_exhaustive()
    }
}

/// The one driver active for a deployment.
#[derive(Debug, Clone)]
pub enum DriverConfig {
    Local(LocalDriverConfig),
    S3(S3DriverConfig),
}

impl DriverConfig {
    /// Build from environment variables.
    ///
    /// `MEP_STORAGE_DRIVER` selects `local` (default) or `s3`. The S3 settings
    /// fall back to the usual `AWS_*` variables where one exists.
    pub fn from_env() -> Result<Self, DriverError> {
        let driver = env("MEP_STORAGE_DRIVER").unwrap_or_else(|| "local".into());
        match driver.as_str() {
            "local" => Ok(DriverConfig::Local(LocalDriverConfig {
                storage_path: env("MEP_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_storage_path),
                public_url_path_prefix: env("MEP_PUBLIC_URL_PATH_PREFIX")
                    .unwrap_or_else(|| "/attachments".into()),
                public_url_prefix: env("MEP_PUBLIC_URL_PREFIX"),
            })),
            "s3" => Ok(DriverConfig::S3(S3DriverConfig {
                region: required("MEP_S3_REGION", Some("AWS_REGION"))?,
                endpoint_url: required("MEP_S3_ENDPOINT", Some("AWS_ENDPOINT_URL"))?,
                key: required("MEP_S3_KEY", Some("AWS_ACCESS_KEY_ID"))?,
                secret: required("MEP_S3_SECRET", Some("AWS_SECRET_ACCESS_KEY"))?,
                bucket_name: required("MEP_S3_BUCKET", None)?,
                cdn_url: required("MEP_S3_CDN_URL", None)?,
                objects_key_prefix: env("MEP_S3_OBJECTS_KEY_PREFIX"),
                cdn_cache_max_age: match env("MEP_S3_CDN_CACHE_MAX_AGE") {
                    Some(raw) => raw.parse().map_err(|_| {
                        DriverError::Config(format!("MEP_S3_CDN_CACHE_MAX_AGE: invalid number {raw:?}"))
                    })?,
                    None => DEFAULT_CDN_CACHE_MAX_AGE,
                },
            })),
            other => Err(DriverError::Config(format!(
                "unknown storage driver {other:?} (expected \"local\" or \"s3\")"
            ))),
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &str, fallback: Option<&str>) -> Result<String, DriverError> {
    env(name)
        .or_else(|| fallback.and_then(env))
        .ok_or_else(|| DriverError::Config(format!("{name} is required for the s3 driver")))
}

fn default_storage_path() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("mep").join("attachments")
}

// -- Factory --

/// Create the active `StorageDriver` from configuration.
pub fn create_driver(config: &DriverConfig) -> Result<Arc<dyn StorageDriver>, DriverError> {
    match config {
        DriverConfig::Local(local) => Ok(Arc::new(LocalDriver::new(local.clone()))),
        #[cfg(feature = "s3")]
        DriverConfig::S3(s3) => Ok(Arc::new(S3Driver::new(s3.clone())?)),
        #[cfg(not(feature = "s3"))]
        DriverConfig::S3(_) => Err(DriverError::Config(
            "S3 configuration detected but the 's3' feature is not enabled".into(),
        )),
    }
}
