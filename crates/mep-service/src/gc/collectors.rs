use futures::stream::BoxStream;
use mep_core::Attachment;
use mep_db::{AssociationRegistry, ContextFilter, Database, OrphanQuery, SqlIdent};
use tracing::debug;

use super::{paged, paged_all, GarbageCollector};
use crate::GcError;

/// Attachments whose indexed `context` names a registered owner field while
/// no owner row points at them.
pub struct AssociationContextCollector {
    registry: AssociationRegistry,
}

impl AssociationContextCollector {
    pub fn new(registry: AssociationRegistry) -> Self {
        Self { registry }
    }
}

impl GarbageCollector for AssociationContextCollector {
    fn name(&self) -> &str {
        "association-context"
    }

    fn collect<'a>(
        &'a self,
        db: &'a dyn Database,
        dry_run: bool,
    ) -> BoxStream<'a, Result<Attachment, GcError>> {
        debug!(associations = self.registry.len(), dry_run, "scanning association contexts");
        let queries = self
            .registry
            .iter()
            .map(|a| OrphanQuery::for_association(a, false))
            .collect();
        paged_all(db, queries)
    }
}

/// Legacy variant of [`AssociationContextCollector`] that reads `context`
/// straight out of the metadata JSON, for rows written before the generated
/// column existed.
pub struct ContextTagCollector {
    registry: AssociationRegistry,
}

impl ContextTagCollector {
    pub fn new(registry: AssociationRegistry) -> Self {
        Self { registry }
    }
}

impl GarbageCollector for ContextTagCollector {
    fn name(&self) -> &str {
        "context-tag"
    }

    fn collect<'a>(
        &'a self,
        db: &'a dyn Database,
        dry_run: bool,
    ) -> BoxStream<'a, Result<Attachment, GcError>> {
        debug!(associations = self.registry.len(), dry_run, "scanning context tags");
        let queries = self
            .registry
            .iter()
            .map(|a| OrphanQuery::for_association(a, true))
            .collect();
        paged_all(db, queries)
    }
}

/// Images embedded in editor blocks: context `...#<blockContext>...`, with
/// the block table's column as the only reference.
pub struct BlockContextCollector {
    name: String,
    block_context: String,
    table: SqlIdent,
    column: SqlIdent,
}

impl BlockContextCollector {
    pub fn new(block_context: impl Into<String>, table: SqlIdent, column: SqlIdent) -> Self {
        let block_context = block_context.into();
        Self {
            name: format!("block-context:{block_context}"),
            block_context,
            table,
            column,
        }
    }
}

impl GarbageCollector for BlockContextCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect<'a>(
        &'a self,
        db: &'a dyn Database,
        dry_run: bool,
    ) -> BoxStream<'a, Result<Attachment, GcError>> {
        debug!(block_context = %self.block_context, dry_run, "scanning block contexts");
        paged(
            db,
            OrphanQuery {
                table: self.table.clone(),
                column: self.column.clone(),
                context: ContextFilter::SubContext(self.block_context.clone()),
            },
        )
    }
}
