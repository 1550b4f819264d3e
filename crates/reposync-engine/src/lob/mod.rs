//! Large-object synchronization.
//!
//! Object types carrying long-text or binary attributes get a second,
//! column-specific pass after each upserted batch. Values are moved through
//! ordered paged streams and bounded instruction batches, never as whole
//! result sets, so a multi-gigabyte attribute costs one page of rows at a
//! time.

pub mod merge;

use async_trait::async_trait;
use tracing::{debug, info};

use reposync_model::id::ContentId;
use reposync_model::record::AttrValue;
use reposync_model::schema::{AttributeType, SchemaComparisonPolicy};
use reposync_repo::cursor::Cursor;
use reposync_repo::rows::{DetailOp, DetailOpCounts};
use reposync_repo::traits::ContentRepository;

use crate::error::{SyncError, SyncResult};

use merge::{merge_detail_streams, OpSink};

/// What the LOB pass has to do for one object type.
#[derive(Debug, Clone, PartialEq)]
pub struct LobPlan {
    type_id: i64,
    /// Database-stored LOB attribute names, the detail pass's column set.
    detail_attributes: Vec<String>,
    /// Quick columns optimized on both sides: source column, target column.
    quick_pairs: Vec<(String, String)>,
    /// Attributes optimized only in the target, whose quick columns are
    /// recomputed from the just-written detail rows.
    recompute: Vec<AttributeType>,
}

impl LobPlan {
    /// Build the plan for one object type, or `None` when it has no
    /// database-stored LOB attributes.
    ///
    /// Filesystem-backed attributes are the attribute-storage collaborator's
    /// business and are skipped here.
    #[must_use]
    pub fn for_type(
        type_id: i64,
        source_attrs: &[AttributeType],
        target_attrs: &[AttributeType],
        policy: &SchemaComparisonPolicy,
    ) -> Option<Self> {
        let lob_attrs: Vec<&AttributeType> = source_attrs
            .iter()
            .filter(|a| a.kind.is_lob() && !a.filesystem)
            .collect();
        if lob_attrs.is_empty() {
            return None;
        }

        let detail_attributes = lob_attrs.iter().map(|a| a.name.clone()).collect();

        let mut quick_pairs = Vec::new();
        let mut recompute = Vec::new();
        for attr in &lob_attrs {
            let target_attr = target_attrs.iter().find(|t| t.name == attr.name);
            let source_quick = attr.optimized.then(|| attr.quick_column.clone()).flatten();
            let target_quick = target_attr
                .filter(|t| t.optimized)
                .and_then(|t| t.quick_column.clone());
            match (source_quick, target_quick) {
                (Some(src_col), Some(tgt_col)) => quick_pairs.push((src_col, tgt_col)),
                // Optimized only in the target: legal under the relaxed
                // comparison policy, repaired from detail rows afterwards.
                (None, Some(_)) if policy.ignore_optimized => {
                    if let Some(target_attr) = target_attr {
                        recompute.push(target_attr.clone());
                    }
                }
                _ => {}
            }
        }

        Some(Self {
            type_id,
            detail_attributes,
            quick_pairs,
            recompute,
        })
    }

    /// The object type this plan covers.
    #[must_use]
    pub fn type_id(&self) -> i64 {
        self.type_id
    }
}

/// Copies large-object values for the batches the data synchronizer just
/// upserted.
pub struct LobSynchronizer<'a> {
    source: &'a dyn ContentRepository,
    target: &'a dyn ContentRepository,
}

impl<'a> LobSynchronizer<'a> {
    /// Create a synchronizer over the two repositories.
    #[must_use]
    pub fn new(source: &'a dyn ContentRepository, target: &'a dyn ContentRepository) -> Self {
        Self { source, target }
    }

    /// Run both LOB passes for one upserted batch.
    pub async fn sync_batch(&self, plan: &LobPlan, ids: &[ContentId]) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        if !plan.quick_pairs.is_empty() {
            self.sync_quick_columns(plan, ids).await?;
        }

        let counts = self.sync_detail_rows(plan, ids).await?;
        debug!(
            type_id = plan.type_id,
            batch = ids.len(),
            updated = counts.updated,
            inserted = counts.inserted,
            deleted = counts.deleted,
            "Detail rows merged"
        );

        for attr in &plan.recompute {
            self.target.recompute_quick_column(ids, attr).await?;
        }

        Ok(())
    }

    /// Lock-step copy of optimized quick columns.
    ///
    /// Both streams cover exactly the batch ids in the same order, so the
    /// rows must pair up one to one. A divergence means a record appeared
    /// in or vanished from one side mid-run; nothing can be synchronized
    /// safely past that point.
    async fn sync_quick_columns(&self, plan: &LobPlan, ids: &[ContentId]) -> SyncResult<()> {
        let source_columns: Vec<String> =
            plan.quick_pairs.iter().map(|(s, _)| s.clone()).collect();
        let mut source_rows = Cursor::new(
            self.source
                .open_quick_source(plan.type_id, ids, &source_columns)
                .await?,
        );
        let target_columns: Vec<String> =
            plan.quick_pairs.iter().map(|(_, t)| t.clone()).collect();
        let mut target_rows = Cursor::new(
            self.target
                .open_quick_source(plan.type_id, ids, &target_columns)
                .await?,
        );

        loop {
            let src = source_rows.next().await?;
            let tgt = target_rows.next().await?;
            match (src, tgt) {
                (None, None) => break,
                (Some(src), Some(tgt)) if src.id == tgt.id => {
                    let values: Vec<(String, &AttrValue)> = plan
                        .quick_pairs
                        .iter()
                        .zip(src.values.iter())
                        .map(|((_, tgt_col), (_, value))| (tgt_col.clone(), value))
                        .collect();
                    self.target.update_quick_row(&src.id, &values).await?;
                }
                (Some(src), Some(tgt)) => {
                    return Err(SyncError::consistency(format!(
                        "quick column cursors diverged for type {}: source at {}, target at {}",
                        plan.type_id, src.id, tgt.id
                    )));
                }
                (Some(src), None) => {
                    return Err(SyncError::consistency(format!(
                        "record {} missing from target during quick column pass",
                        src.id
                    )));
                }
                (None, Some(tgt)) => {
                    return Err(SyncError::consistency(format!(
                        "record {} missing from source during quick column pass",
                        tgt.id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn sync_detail_rows(
        &self,
        plan: &LobPlan,
        ids: &[ContentId],
    ) -> SyncResult<DetailOpCounts> {
        let mut source_rows = Cursor::new(
            self.source
                .open_detail_source(ids, &plan.detail_attributes)
                .await?,
        );
        let mut target_rows = Cursor::new(
            self.target
                .open_detail_source(ids, &plan.detail_attributes)
                .await?,
        );
        let mut sink = StoreSink {
            target: self.target,
        };
        merge_detail_streams(&mut source_rows, &mut target_rows, &mut sink).await
    }
}

/// Sink applying instruction batches straight to the target store.
struct StoreSink<'a> {
    target: &'a dyn ContentRepository,
}

#[async_trait]
impl OpSink for StoreSink<'_> {
    async fn apply(&mut self, ops: Vec<DetailOp>) -> SyncResult<DetailOpCounts> {
        Ok(self.target.apply_detail_ops(&ops).await?)
    }
}

/// Log the plan once per type, before its first batch.
pub fn log_plan(plan: &LobPlan) {
    info!(
        type_id = plan.type_id,
        attributes = ?plan.detail_attributes,
        quick_columns = plan.quick_pairs.len(),
        recompute = plan.recompute.len(),
        "Large-object pass planned"
    );
}
