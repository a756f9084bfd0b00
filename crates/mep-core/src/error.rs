use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetadataError {
    #[error("metadata key must not be empty")]
    EmptyKey,

    #[error("metadata value for {key:?} must be a string, number or boolean, got {kind}")]
    NotScalar { key: String, kind: &'static str },

    #[error("metadata value for {key:?} is not a finite number")]
    NonFinite { key: String },

    #[error("metadata must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("malformed context {0:?}: expected <Owner>::$<field>[#<subContext>]")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttachmentError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("file name {0:?} must be a single path segment")]
    InvalidFileName(String),

    #[error("invalid attachment id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}
