mod common;

use std::time::Duration;

use chrono::Utc;
use common::Fixture;
use futures::stream::{self, BoxStream, StreamExt};
use mep_core::{Attachment, Metadata, SourceFile};
use mep_db::{Association, AssociationRegistry, Database, SqlIdent};
use mep_service::gc::{
    AssociationContextCollector, BlockContextCollector, ContextTagCollector, GarbageCollection,
    GarbageCollector,
};
use mep_service::{FileStorageManager, GcError, OrphanFileSweep, ProcessorPipeline};

fn registry() -> AssociationRegistry {
    let mut registry = AssociationRegistry::new();
    registry
        .register(Association::new("Post", "cover", "posts", "cover_id").unwrap())
        .unwrap();
    registry
}

async fn store_with_context(fx: &Fixture, manager: &FileStorageManager, name: &str, context: &str) -> Attachment {
    let mut metadata = Metadata::new();
    metadata.insert("context", context).unwrap();
    manager
        .store(SourceFile::local(fx.source(name, 8)), metadata, Metadata::new())
        .await
        .unwrap()
}

async fn collect_ids(collector: &dyn GarbageCollector, db: &dyn Database) -> Vec<mep_core::AttachmentId> {
    collector
        .collect(db, true)
        .map(|r| r.unwrap().id())
        .collect()
        .await
}

/// Yields a fixed set of attachments regardless of state.
struct Fixed(Vec<Attachment>);

impl GarbageCollector for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn collect<'a>(
        &'a self,
        _db: &'a dyn Database,
        _dry_run: bool,
    ) -> BoxStream<'a, Result<Attachment, GcError>> {
        stream::iter(self.0.clone().into_iter().map(Ok)).boxed()
    }
}

#[tokio::test]
async fn association_collector_yields_only_unreferenced() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let kept = store_with_context(&fx, &manager, "kept.png", "Post::$cover").await;
    let orphan = store_with_context(&fx, &manager, "orphan.png", "Post::$cover").await;
    let foreign = store_with_context(&fx, &manager, "foreign.png", "Article::$image").await;
    fx.reference_cover(1, &kept.id().to_string());

    let collector = AssociationContextCollector::new(registry());
    let ids = collect_ids(&collector, fx.db.as_ref()).await;
    assert_eq!(ids, vec![orphan.id()]);
    assert!(!ids.contains(&foreign.id()));

    let legacy = ContextTagCollector::new(registry());
    assert_eq!(collect_ids(&legacy, fx.db.as_ref()).await, vec![orphan.id()]);
}

#[tokio::test]
async fn collector_streams_past_one_page() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let mut expected = Vec::new();
    for i in 0..(mep_db::ORPHAN_PAGE_SIZE as usize + 5) {
        expected.push(store_with_context(&fx, &manager, &format!("{i}.png"), "Post::$cover").await.id());
    }
    expected.sort();

    let collector = AssociationContextCollector::new(registry());
    assert_eq!(collect_ids(&collector, fx.db.as_ref()).await, expected);
}

#[tokio::test]
async fn block_collector_matches_sub_context() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let used = store_with_context(&fx, &manager, "used.png", "Page::$body#image_block-1").await;
    let unused = store_with_context(&fx, &manager, "unused.png", "Page::$body#image_block-2").await;
    store_with_context(&fx, &manager, "cover.png", "Post::$cover").await;
    fx.sqlite
        .execute_batch(&format!(
            "INSERT INTO image_blocks (id, image_id) VALUES (1, '{}')",
            used.id()
        ))
        .unwrap();

    let collector = BlockContextCollector::new(
        "image_block",
        SqlIdent::new("image_blocks").unwrap(),
        SqlIdent::new("image_id").unwrap(),
    );
    assert_eq!(collect_ids(&collector, fx.db.as_ref()).await, vec![unused.id()]);
}

#[tokio::test]
async fn dry_run_keeps_every_row() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    for i in 0..3 {
        store_with_context(&fx, &manager, &format!("{i}.png"), "Post::$cover").await;
    }

    let gc = GarbageCollection::new(fx.db.clone(), fx.driver.clone())
        .with_collector(AssociationContextCollector::new(registry()));
    let report = gc.run(true).await.unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.deleted_records, 0);
    assert_eq!(fx.db.count_attachments().await.unwrap(), 3);
}

#[tokio::test]
async fn two_collectors_delete_exactly_one_row() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let orphan = store_with_context(&fx, &manager, "a.png", "Post::$cover").await;
    let kept = store_with_context(&fx, &manager, "b.png", "Post::$cover").await;

    let gc = GarbageCollection::new(fx.db.clone(), fx.driver.clone())
        .with_collector(Fixed(vec![orphan.clone()]))
        .with_collector(Fixed(Vec::new()));
    let report = gc.run(false).await.unwrap();

    assert_eq!(report.deleted_records, 1);
    assert_eq!(report.removed_files, 1);
    assert_eq!(fx.db.count_attachments().await.unwrap(), 1);
    assert!(fx.db.get_attachment(kept.id()).await.is_ok());
    assert!(!fx.driver.attached_file_exists(&orphan).await.unwrap());
}

#[tokio::test]
async fn overlapping_collectors_are_deduplicated() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let orphan = store_with_context(&fx, &manager, "a.png", "Post::$cover").await;
    // Bytes already gone: the record is still deleted and the run succeeds.
    fx.driver.remove_attached_file(&orphan).await.unwrap();

    let gc = GarbageCollection::new(fx.db.clone(), fx.driver.clone())
        .with_collector(AssociationContextCollector::new(registry()))
        .with_collector(ContextTagCollector::new(registry()))
        .with_collector(Fixed(vec![orphan.clone()]));
    let report = gc.run(false).await.unwrap();

    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].collector, "association-context");
    assert_eq!(report.deleted_records, 1);
    assert_eq!(report.missing_files, 1);
    assert_eq!(fx.db.count_attachments().await.unwrap(), 0);
}

#[tokio::test]
async fn orphan_file_sweep_respects_grace_period() {
    let fx = Fixture::new();
    let manager = fx.manager(ProcessorPipeline::default());
    let recorded = store_with_context(&fx, &manager, "kept.png", "Post::$cover").await;
    let stray = store_with_context(&fx, &manager, "stray.png", "Post::$cover").await;
    // Simulate a crash between the file write and the record save.
    fx.db.delete_attachment(stray.id()).await.unwrap();

    let sweep = OrphanFileSweep::new(fx.db.clone(), fx.driver.clone())
        .with_grace_period(Duration::from_secs(3600));

    let fresh = sweep.run(false).await.unwrap();
    assert!(fresh.orphans.is_empty());
    assert!(fx.driver.attached_file_exists(&stray).await.unwrap());

    let later = Utc::now() + chrono::Duration::hours(2);
    let dry = sweep.run_at(true, later).await.unwrap();
    assert_eq!(dry.scanned, 2);
    assert_eq!(dry.orphans.len(), 1);
    assert_eq!(dry.orphans[0].attachment_id, stray.id());
    assert!(fx.driver.attached_file_exists(&stray).await.unwrap());

    let swept = sweep.run_at(false, later).await.unwrap();
    assert_eq!(swept.removed, 1);
    assert!(!fx.driver.attached_file_exists(&stray).await.unwrap());
    assert!(fx.driver.attached_file_exists(&recorded).await.unwrap());
}
