pub mod attachment;
pub mod constraints;
pub mod context;
pub mod error;
pub mod metadata;
pub mod unprocessed;

pub use attachment::{Attachment, AttachmentId};
pub use context::Context;
pub use error::{AttachmentError, ContextError, MetadataError};
pub use metadata::{Metadata, MetadataValue, ProcessorOptions};
pub use unprocessed::{SourceFile, UnprocessedAttachment};
