//! Domain hooks for the ingestion pipeline.

use crate::aggregate::AggregateSpec;
use crate::directive::DirectiveTable;
use crate::entity::CanonicalEntity;
use crate::error::CoreResult;
use crate::reconcile::ChildCollectionSpec;
use crate::snapshot::SnapshotMessage;

/// Everything domain specific the pipeline needs for one entity type.
///
/// Hooks run in this order while the entity lock is held: directives,
/// [`IngestProfile::derive`], child reconciliation,
/// [`IngestProfile::finalize`], aggregates.
pub trait IngestProfile: Send + Sync {
    /// Short entity type name used in lock names and logs, e.g. `entry`.
    fn entity_type(&self) -> &str;

    /// Directives for top-level snapshot fields.
    fn directives(&self) -> &DirectiveTable;

    /// Owned child collections.
    fn child_collections(&self) -> &[ChildCollectionSpec] {
        &[]
    }

    /// Aggregates recomputed after reconciliation.
    fn aggregates(&self) -> &[AggregateSpec] {
        &[]
    }

    /// Domain calculations on merged fields, before children are touched.
    fn derive(&self, _entity: &mut CanonicalEntity, _message: &SnapshotMessage) -> CoreResult<()> {
        Ok(())
    }

    /// Adjustments after children are reconciled, before aggregates.
    fn finalize(&self, _entity: &mut CanonicalEntity) -> CoreResult<()> {
        Ok(())
    }
}
