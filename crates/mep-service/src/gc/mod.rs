//! Garbage collection of attachments that no owner references anymore.
//!
//! Collectors re-scan the repository on every call and stream candidates page
//! by page; [`GarbageCollection`] drains them, deduplicates, and deletes.

mod collectors;
mod config;
mod run;

pub use collectors::{AssociationContextCollector, BlockContextCollector, ContextTagCollector};
pub use config::{BlockContextConfig, GcConfig};
pub use run::{GarbageCollection, GcCandidate, GcReport};

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mep_core::{Attachment, AttachmentId};
use mep_db::{Database, OrphanQuery, ORPHAN_PAGE_SIZE};

use crate::GcError;

/// A scanner yielding attachments that no longer have an owner.
///
/// The scan is the same with or without `dry_run`; deciding what to do with
/// the results is up to the caller.
pub trait GarbageCollector: Send + Sync {
    fn name(&self) -> &str;

    fn collect<'a>(
        &'a self,
        db: &'a dyn Database,
        dry_run: bool,
    ) -> BoxStream<'a, Result<Attachment, GcError>>;
}

struct Cursor {
    query: OrphanQuery,
    after: Option<AttachmentId>,
    exhausted: bool,
}

/// Stream every orphan matching `query`, fetching one page per round trip.
pub(crate) fn paged(
    db: &dyn Database,
    query: OrphanQuery,
) -> BoxStream<'_, Result<Attachment, GcError>> {
    let start = Cursor {
        query,
        after: None,
        exhausted: false,
    };
    stream::try_unfold(start, move |mut cursor| async move {
        if cursor.exhausted {
            return Ok::<_, GcError>(None);
        }
        let page = db
            .find_orphans(&cursor.query, cursor.after, ORPHAN_PAGE_SIZE)
            .await?;
        if page.is_empty() {
            return Ok(None);
        }
        cursor.exhausted = page.len() < ORPHAN_PAGE_SIZE as usize;
        cursor.after = page.last().map(Attachment::id);
        Ok(Some((page, cursor)))
    })
    .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

/// Chain the paged scans of several queries, in order.
pub(crate) fn paged_all(
    db: &dyn Database,
    queries: Vec<OrphanQuery>,
) -> BoxStream<'_, Result<Attachment, GcError>> {
    stream::iter(queries)
        .map(move |query| paged(db, query))
        .flatten()
        .boxed()
}
