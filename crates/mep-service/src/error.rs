use mep_core::AttachmentError;
use mep_db::DbError;
use mep_store::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Misconfiguration detected while wiring the pipeline. Fatal at startup.
    #[error("invalid processor options: {0}")]
    InvalidOptions(String),

    #[error("processor i/o error: {0}")]
    Io(String),

    #[error("processor http error: {0}")]
    Http(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("processor {name} failed: {source}")]
    Processor {
        name: String,
        #[source]
        source: ProcessorError,
    },

    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

#[derive(Debug, Error)]
pub enum GcError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("invalid collector configuration: {0}")]
    Config(String),
}
