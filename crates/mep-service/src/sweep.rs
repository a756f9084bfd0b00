use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mep_core::{Attachment, Metadata};
use mep_db::Database;
use mep_store::{StorageDriver, StoredFile};
use tracing::{error, info};

use crate::manager::remove_file_lenient;
use crate::GcError;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(86_400);

const LOOKUP_BATCH: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub orphans: Vec<StoredFile>,
    pub removed: usize,
    pub failed: usize,
}

/// Finds stored files whose attachment record was never saved (or is gone).
///
/// Files younger than the grace period are left alone so an upload between
/// its file write and its record save is never swept.
pub struct OrphanFileSweep {
    db: Arc<dyn Database>,
    driver: Arc<dyn StorageDriver>,
    grace_period: Duration,
}

impl OrphanFileSweep {
    pub fn new(db: Arc<dyn Database>, driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            db,
            driver,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub async fn run(&self, dry_run: bool) -> Result<SweepReport, GcError> {
        self.run_at(dry_run, Utc::now()).await
    }

    pub async fn run_at(&self, dry_run: bool, now: DateTime<Utc>) -> Result<SweepReport, GcError> {
        let grace = chrono::Duration::from_std(self.grace_period)
            .map_err(|e| GcError::Config(format!("grace period: {e}")))?;
        let cutoff = now - grace;

        let files = self.driver.list_stored_files().await?;
        let mut report = SweepReport {
            dry_run,
            scanned: files.len(),
            ..SweepReport::default()
        };
        let old: Vec<StoredFile> = files
            .into_iter()
            .filter(|f| f.last_modified <= cutoff)
            .collect();

        for batch in old.chunks(LOOKUP_BATCH) {
            let ids: Vec<_> = batch.iter().map(|f| f.attachment_id).collect();
            let known: HashSet<_> = self.db.existing_attachment_ids(&ids).await?;
            report.orphans.extend(
                batch
                    .iter()
                    .filter(|f| !known.contains(&f.attachment_id))
                    .cloned(),
            );
        }
        info!(
            scanned = report.scanned,
            orphans = report.orphans.len(),
            dry_run,
            "orphan file scan finished"
        );

        if dry_run {
            return Ok(report);
        }
        for file in &report.orphans {
            match self.remove(file).await {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    error!(key = %file.key, "failed to remove orphan file: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Drivers locate bytes by id and file name alone, so a stand-in record
    /// is enough to address the file.
    async fn remove(&self, file: &StoredFile) -> Result<bool, GcError> {
        let stand_in = Attachment::restore(
            file.attachment_id,
            file.file_name().to_string(),
            "application/octet-stream".to_string(),
            0,
            Metadata::new(),
            file.last_modified,
        )
        .map_err(|e| GcError::Config(format!("{}: {e}", file.key)))?;
        Ok(remove_file_lenient(self.driver.as_ref(), &stand_in).await?)
    }
}
