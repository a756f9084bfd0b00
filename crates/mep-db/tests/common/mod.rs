// Backend-agnostic integration tests for the Database trait.
//
// Each public async function accepts `&dyn Database` so that the same logic
// can be exercised against both the SQLite and Postgres backends. Owner
// tables belong to the host, so tests that need one take a `reference`
// callback that inserts a `posts` row pointing at an attachment.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;

use mep_core::{Attachment, AttachmentId, Metadata, MetadataValue, SourceFile, UnprocessedAttachment};
use mep_db::{ContextFilter, Database, DbError, OrphanQuery, SqlIdent, ORPHAN_PAGE_SIZE};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub const POSTS_DDL: &str = "CREATE TABLE posts (id BIGINT PRIMARY KEY, cover_id TEXT)";

pub fn make_attachment(name: &str, context: Option<&str>) -> Attachment {
    let mut metadata = Metadata::new();
    if let Some(context) = context {
        metadata.insert("context", context).unwrap();
    }
    let unprocessed = UnprocessedAttachment::new(
        SourceFile::local(format!("/tmp/{name}")),
        "image/png",
        2048,
        metadata,
        Metadata::new(),
    );
    Attachment::from_processed(&unprocessed).unwrap()
}

fn posts_query(context: ContextFilter) -> OrphanQuery {
    OrphanQuery {
        table: SqlIdent::new("posts").unwrap(),
        column: SqlIdent::new("cover_id").unwrap(),
        context,
    }
}

// ---------------------------------------------------------------------------
// Record tests
// ---------------------------------------------------------------------------

/// Insert, get, patch, delete.
pub async fn test_attachment_crud(db: &dyn Database) {
    let a = make_attachment("cover.png", Some("Post::$cover"));
    db.insert_attachment(&a).await.unwrap();

    let fetched = db.get_attachment(a.id()).await.unwrap();
    assert_eq!(fetched.id(), a.id());
    assert_eq!(fetched.file_name(), "cover.png");
    assert_eq!(fetched.mime_type(), "image/png");
    assert_eq!(fetched.file_size(), 2048);
    assert_eq!(fetched.context(), Some("Post::$cover"));
    assert_eq!(
        fetched.created_at().timestamp(),
        a.created_at().timestamp()
    );

    let patched = db
        .patch_attachment_metadata(a.id(), "alt", &MetadataValue::from("A cover"))
        .await
        .unwrap();
    assert_eq!(patched.metadata().get("alt").and_then(|v| v.as_str()), Some("A cover"));
    assert_eq!(patched.context(), Some("Post::$cover"));
    let reread = db.get_attachment(a.id()).await.unwrap();
    assert_eq!(reread.metadata(), patched.metadata());

    let deleted = db.delete_attachment(a.id()).await.unwrap();
    assert_eq!(deleted.id(), a.id());
    assert!(matches!(db.get_attachment(a.id()).await, Err(DbError::NotFound(_))));
    assert!(matches!(db.delete_attachment(a.id()).await, Err(DbError::NotFound(_))));
}

pub async fn test_patch_missing(db: &dyn Database) {
    let err = db
        .patch_attachment_metadata(AttachmentId::generate(), "alt", &MetadataValue::from(true))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));
}

/// Batch delete counts only rows that existed and leaves the rest.
pub async fn test_batch_delete(db: &dyn Database) {
    let a = make_attachment("a.png", None);
    let b = make_attachment("b.png", None);
    let c = make_attachment("c.png", None);
    for x in [&a, &b, &c] {
        db.insert_attachment(x).await.unwrap();
    }
    assert_eq!(db.count_attachments().await.unwrap(), 3);

    let deleted = db
        .delete_attachments(&[a.id(), b.id(), AttachmentId::generate()])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(db.count_attachments().await.unwrap(), 1);
    assert_eq!(db.delete_attachments(&[]).await.unwrap(), 0);

    let existing = db
        .existing_attachment_ids(&[a.id(), b.id(), c.id()])
        .await
        .unwrap();
    assert_eq!(existing, HashSet::from([c.id()]));
}

// ---------------------------------------------------------------------------
// Orphan tests
// ---------------------------------------------------------------------------

/// One referenced cover, one orphaned cover, one attachment of another owner.
pub async fn test_find_orphans<F, Fut>(db: &dyn Database, reference: F)
where
    F: Fn(AttachmentId) -> Fut,
    Fut: Future<Output = ()>,
{
    let referenced = make_attachment("kept.png", Some("Post::$cover"));
    let orphan = make_attachment("orphan.png", Some("Post::$cover"));
    let other = make_attachment("other.png", Some("Article::$image"));
    let untagged = make_attachment("untagged.png", None);
    for x in [&referenced, &orphan, &other, &untagged] {
        db.insert_attachment(x).await.unwrap();
    }
    reference(referenced.id()).await;

    for filter in [
        ContextFilter::Column("Post::$cover".into()),
        ContextFilter::JsonPath("Post::$cover".into()),
    ] {
        let page = db
            .find_orphans(&posts_query(filter.clone()), None, ORPHAN_PAGE_SIZE)
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(Attachment::id).collect();
        assert_eq!(ids, vec![orphan.id()], "filter {filter:?}");
    }
}

/// Pages come back in id order and the cursor is exclusive.
pub async fn test_orphan_pagination(db: &dyn Database) {
    let mut expected = Vec::new();
    for i in 0..5 {
        let a = make_attachment(&format!("{i}.png"), Some("Post::$cover"));
        db.insert_attachment(&a).await.unwrap();
        expected.push(a.id());
    }
    expected.sort();

    let query = posts_query(ContextFilter::Column("Post::$cover".into()));
    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = db.find_orphans(&query, cursor, 2).await.unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 2);
        cursor = page.last().map(Attachment::id);
        seen.extend(page.iter().map(Attachment::id));
    }
    assert_eq!(seen, expected);
}

/// Block attachments are matched on `#<subContext>` regardless of block id.
pub async fn test_sub_context_orphans(db: &dyn Database) {
    let in_block = make_attachment("block.png", Some("Page::$body#image_block-42"));
    let other_block = make_attachment("quote.png", Some("Page::$body#quote_block-1"));
    let lookalike = make_attachment("look.png", Some("Page::$body#imageXblock-7"));
    let upper = make_attachment("upper.png", Some("Page::$body#IMAGE_BLOCK-9"));
    for x in [&in_block, &other_block, &lookalike, &upper] {
        db.insert_attachment(x).await.unwrap();
    }

    let page = db
        .find_orphans(
            &posts_query(ContextFilter::SubContext("image_block".into())),
            None,
            ORPHAN_PAGE_SIZE,
        )
        .await
        .unwrap();
    let ids: Vec<_> = page.iter().map(Attachment::id).collect();
    assert_eq!(ids, vec![in_block.id()]);
}
