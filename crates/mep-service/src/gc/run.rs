use std::collections::HashSet;
use std::sync::Arc;

use futures::TryStreamExt;
use mep_core::{Attachment, AttachmentId};
use mep_db::Database;
use mep_store::StorageDriver;
use serde::Serialize;
use tracing::{debug, error, info};

use super::GarbageCollector;
use crate::manager::remove_file_lenient;
use crate::GcError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcCandidate {
    pub id: AttachmentId,
    pub public_url: String,
    pub context: Option<String>,
    /// Name of the first collector that reported this attachment.
    pub collector: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub dry_run: bool,
    pub candidates: Vec<GcCandidate>,
    pub deleted_records: u64,
    pub removed_files: usize,
    pub missing_files: usize,
    pub failed_files: usize,
}

/// Runs every registered collector and deletes what they report.
pub struct GarbageCollection {
    db: Arc<dyn Database>,
    driver: Arc<dyn StorageDriver>,
    collectors: Vec<Box<dyn GarbageCollector>>,
}

impl GarbageCollection {
    pub fn new(db: Arc<dyn Database>, driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            db,
            driver,
            collectors: Vec::new(),
        }
    }

    pub fn with_collector(mut self, collector: impl GarbageCollector + 'static) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    pub fn register(&mut self, collector: Box<dyn GarbageCollector>) -> &mut Self {
        self.collectors.push(collector);
        self
    }

    pub fn collector_names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Drain every collector in registration order, then, unless `dry_run`,
    /// delete all candidate records in one transaction before removing their
    /// files. An attachment reported by several collectors is handled once.
    pub async fn run(&self, dry_run: bool) -> Result<GcReport, GcError> {
        let mut seen = HashSet::new();
        let mut orphans: Vec<Attachment> = Vec::new();
        let mut report = GcReport {
            dry_run,
            ..GcReport::default()
        };

        for collector in &self.collectors {
            let mut found = 0usize;
            let mut stream = collector.collect(self.db.as_ref(), dry_run);
            while let Some(attachment) = stream.try_next().await? {
                if !seen.insert(attachment.id()) {
                    debug!(id = %attachment.id(), collector = collector.name(), "already reported");
                    continue;
                }
                found += 1;
                report.candidates.push(GcCandidate {
                    id: attachment.id(),
                    public_url: self.driver.public_url(&attachment, None),
                    context: attachment.context().map(str::to_string),
                    collector: collector.name().to_string(),
                });
                orphans.push(attachment);
            }
            info!(collector = collector.name(), found, "collector finished");
        }

        if dry_run || orphans.is_empty() {
            return Ok(report);
        }

        let ids: Vec<AttachmentId> = orphans.iter().map(Attachment::id).collect();
        report.deleted_records = self.db.delete_attachments(&ids).await?;

        for attachment in &orphans {
            match remove_file_lenient(self.driver.as_ref(), attachment).await {
                Ok(true) => report.removed_files += 1,
                Ok(false) => report.missing_files += 1,
                Err(e) => {
                    error!(id = %attachment.id(), "failed to remove attached file: {e}");
                    report.failed_files += 1;
                }
            }
        }
        info!(
            deleted = report.deleted_records,
            files = report.removed_files,
            "garbage collection finished"
        );
        Ok(report)
    }
}
