use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mep_db::Database;
use mep_service::{GarbageCollection, GarbageCollector, OrphanFileSweep};
use mep_store::StorageDriver;

/// `storage:garbage-collection`: report orphaned attachments and delete them
/// unless `dry_run`.
pub async fn garbage_collection(
    db: Arc<dyn Database>,
    driver: Arc<dyn StorageDriver>,
    collectors: Vec<Box<dyn GarbageCollector>>,
    dry_run: bool,
    out: &mut impl Write,
) -> Result<()> {
    let mut gc = GarbageCollection::new(db, driver);
    for collector in collectors {
        gc.register(collector);
    }
    let report = gc.run(dry_run).await?;

    if report.candidates.is_empty() {
        writeln!(out, "No attachment found.")?;
        return Ok(());
    }

    writeln!(out, "{:<38} {:<32} URL", "ID", "CONTEXT")?;
    for candidate in &report.candidates {
        writeln!(
            out,
            "{:<38} {:<32} {}",
            candidate.id,
            candidate.context.as_deref().unwrap_or("-"),
            candidate.public_url
        )?;
    }
    writeln!(out)?;
    if dry_run {
        writeln!(
            out,
            "{} attachment(s) would be deleted (dry run).",
            report.candidates.len()
        )?;
    } else {
        writeln!(
            out,
            "{} attachment(s) deleted, {} file(s) removed.",
            report.deleted_records, report.removed_files
        )?;
        if report.failed_files > 0 {
            writeln!(out, "{} file(s) could not be removed.", report.failed_files)?;
        }
    }
    Ok(())
}

/// `storage:orphan-files`: stored files older than `grace_period` with no
/// attachment record.
pub async fn orphan_files(
    db: Arc<dyn Database>,
    driver: Arc<dyn StorageDriver>,
    grace_period: Duration,
    dry_run: bool,
    out: &mut impl Write,
) -> Result<()> {
    let report = OrphanFileSweep::new(db, driver)
        .with_grace_period(grace_period)
        .run(dry_run)
        .await?;

    if report.orphans.is_empty() {
        writeln!(out, "No orphan file found ({} scanned).", report.scanned)?;
        return Ok(());
    }

    writeln!(out, "{:<64} LAST MODIFIED", "KEY")?;
    for file in &report.orphans {
        writeln!(out, "{:<64} {}", file.key, file.last_modified.to_rfc3339())?;
    }
    writeln!(out)?;
    if dry_run {
        writeln!(
            out,
            "{} orphan file(s) would be removed (dry run).",
            report.orphans.len()
        )?;
    } else {
        writeln!(out, "{} orphan file(s) removed.", report.removed)?;
        if report.failed > 0 {
            writeln!(out, "{} file(s) could not be removed.", report.failed)?;
        }
    }
    Ok(())
}
