use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AttachmentError;
use crate::metadata::Metadata;
use crate::unprocessed::UnprocessedAttachment;

pub const MAX_FILE_NAME_LEN: usize = 255;
pub const MAX_MIME_TYPE_LEN: usize = 255;

/// Time-ordered attachment identifier (UUID v6).
///
/// The hyphenated form sorts in creation order, which the repositories rely
/// on for keyset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    pub fn generate() -> Self {
        Self(Uuid::now_v6(node_id()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(rand::random)
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for AttachmentId {
    type Err = AttachmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| AttachmentError::InvalidId(s.to_string()))
    }
}

impl From<Uuid> for AttachmentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Durable record describing one stored file.
///
/// Fields are private so the id cannot be reassigned; metadata can only be
/// changed key by key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    id: AttachmentId,
    file_name: String,
    mime_type: String,
    file_size: u64,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

impl Attachment {
    /// Build the final record from a fully processed attachment.
    pub fn from_processed(unprocessed: &UnprocessedAttachment) -> Result<Self, AttachmentError> {
        Self::restore(
            AttachmentId::generate(),
            unprocessed.file_name().to_string(),
            unprocessed.mime_type().to_string(),
            unprocessed.file_size(),
            unprocessed.metadata().clone(),
            Utc::now(),
        )
    }

    /// Rehydrate a record read back from storage.
    pub fn restore(
        id: AttachmentId,
        file_name: String,
        mime_type: String,
        file_size: u64,
        metadata: Metadata,
        created_at: DateTime<Utc>,
    ) -> Result<Self, AttachmentError> {
        check_field("file_name", &file_name, MAX_FILE_NAME_LEN)?;
        check_file_name(&file_name)?;
        check_field("mime_type", &mime_type, MAX_MIME_TYPE_LEN)?;
        Ok(Self {
            id,
            file_name,
            mime_type,
            file_size,
            metadata,
            created_at,
        })
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
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

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn context(&self) -> Option<&str> {
        self.metadata.context()
    }
}

fn check_field(field: &'static str, value: &str, max: usize) -> Result<(), AttachmentError> {
    if value.trim().is_empty() {
        return Err(AttachmentError::EmptyField { field });
    }
    if value.chars().count() > max {
        return Err(AttachmentError::FieldTooLong { field, max });
    }
    Ok(())
}

/// The storage key is always `{id}/{file_name}`, so the name must be a single
/// path segment.
fn check_file_name(file_name: &str) -> Result<(), AttachmentError> {
    if file_name.contains(['/', '\\'])
        || file_name == "."
        || file_name == ".."
        || file_name.chars().any(char::is_control)
    {
        return Err(AttachmentError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn sample(file_name: &str) -> Result<Attachment, AttachmentError> {
        Attachment::restore(
            AttachmentId::generate(),
            file_name.to_string(),
            "image/png".into(),
            42,
            Metadata::new(),
            Utc::now(),
        )
    }

    #[test]
    fn generated_ids_are_unique_and_ordered() {
        let ids: Vec<AttachmentId> = (0..1000).map(|_| AttachmentId::generate()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(ids[0].as_uuid().get_version_num(), 6);

        let earlier = AttachmentId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = AttachmentId::generate();
        assert!(earlier.to_string() < later.to_string());
    }

    #[test]
    fn id_parse_roundtrip() {
        let id = AttachmentId::generate();
        assert_eq!(id.to_string().parse::<AttachmentId>().unwrap(), id);
        assert!("not-a-uuid".parse::<AttachmentId>().is_err());
    }

    #[test]
    fn rejects_empty_and_long_file_names() {
        assert_eq!(
            sample("  ").unwrap_err(),
            AttachmentError::EmptyField { field: "file_name" }
        );
        let long = "a".repeat(MAX_FILE_NAME_LEN + 1);
        assert_eq!(
            sample(&long).unwrap_err(),
            AttachmentError::FieldTooLong {
                field: "file_name",
                max: MAX_FILE_NAME_LEN
            }
        );
        assert!(sample(&"a".repeat(MAX_FILE_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_file_names_that_are_not_one_segment() {
        for name in ["sub/x.png", "..\\x.png", "../x.png", ".", "..", "a\nb.png"] {
            assert_eq!(
                sample(name).unwrap_err(),
                AttachmentError::InvalidFileName(name.to_string()),
                "{name:?}"
            );
        }
        assert!(sample("..hidden.png").is_ok());
        assert!(sample("report.v2.pdf").is_ok());
    }
}
