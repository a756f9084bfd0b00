//! Post-upload processing stages.
//!
//! Each [`Processor`] inspects an [`UnprocessedAttachment`] and may rewrite
//! its bytes, name, metadata or options before the record is built. The
//! [`ProcessorPipeline`] runs them in registration order.

mod file_name;
mod tinify;

pub use file_name::UploadedFileNameProcessor;
pub use tinify::{TinifyConfig, TinifyProcessor, TINIFY_API_URL};

use std::sync::Arc;

use async_trait::async_trait;
use mep_core::UnprocessedAttachment;
use tracing::debug;

use crate::{ProcessorError, StorageError};

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `run` applies to this attachment. Must not mutate anything.
    fn supports(&self, attachment: &UnprocessedAttachment) -> bool;

    async fn run(
        &self,
        attachment: UnprocessedAttachment,
    ) -> Result<UnprocessedAttachment, ProcessorError>;
}

/// Ordered, immutable list of processors, built once at startup.
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorPipeline {
    pub fn builder() -> ProcessorPipelineBuilder {
        ProcessorPipelineBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Names of the processors that would run for `attachment`, in order.
    pub fn supported_by(&self, attachment: &UnprocessedAttachment) -> Vec<String> {
        self.processors
            .iter()
            .filter(|p| p.supports(attachment))
            .map(|p| p.name().to_string())
            .collect()
    }

    pub async fn run(
        &self,
        mut attachment: UnprocessedAttachment,
    ) -> Result<UnprocessedAttachment, StorageError> {
        for processor in &self.processors {
            if !processor.supports(&attachment) {
                debug!(processor = processor.name(), "skipped");
                continue;
            }
            debug!(processor = processor.name(), "running");
            attachment = processor
                .run(attachment)
                .await
                .map_err(|source| StorageError::Processor {
                    name: processor.name().to_string(),
                    source,
                })?;
        }
        Ok(attachment)
    }
}

#[derive(Default)]
pub struct ProcessorPipelineBuilder {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorPipelineBuilder {
    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn with_arc(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn build(self) -> ProcessorPipeline {
        ProcessorPipeline {
            processors: self.processors,
        }
    }
}
