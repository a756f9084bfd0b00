mod error;
pub mod gc;
mod manager;
mod mime;
pub mod processor;
mod sweep;

pub use error::{GcError, ProcessorError, StorageError};
pub use gc::{GarbageCollection, GarbageCollector, GcConfig, GcReport};
pub use manager::{AttachmentView, FileStorageManager};
pub use mime::{detect_mime_type, guess_mime_type};
pub use processor::{Processor, ProcessorPipeline};
pub use sweep::{OrphanFileSweep, SweepReport, DEFAULT_GRACE_PERIOD};
