//! The ordered two-stream merge over detail rows.
//!
//! Both streams arrive sorted by `(content_id, attribute_name, sort_order)`.
//! Source rows are walked one at a time; the target cursor only ever moves
//! forward. Each step emits an explicit instruction instead of mutating a
//! database cursor, and instructions are flushed to the sink in bounded
//! batches, so peak memory stays independent of the total row count.

use async_trait::async_trait;

use reposync_repo::cursor::Cursor;
use reposync_repo::rows::{DetailOp, DetailOpCounts, DetailRow};

use crate::error::SyncResult;

/// Instructions buffered before each flush to the sink.
const FLUSH_THRESHOLD: usize = 256;

/// Receives merge instructions in bounded batches.
#[async_trait]
pub trait OpSink: Send {
    /// Apply one batch of instructions.
    async fn apply(&mut self, ops: Vec<DetailOp>) -> SyncResult<DetailOpCounts>;
}

/// An [`OpSink`] that collects everything, for tests and dry planning.
#[derive(Default)]
pub struct CollectSink {
    /// Every instruction received, in emission order.
    pub ops: Vec<DetailOp>,
}

#[async_trait]
impl OpSink for CollectSink {
    async fn apply(&mut self, ops: Vec<DetailOp>) -> SyncResult<DetailOpCounts> {
        let mut counts = DetailOpCounts::default();
        for op in &ops {
            match op {
                DetailOp::Update(_) => counts.updated += 1,
                DetailOp::Insert(_) => counts.inserted += 1,
                DetailOp::Delete(_) => counts.deleted += 1,
            }
        }
        self.ops.extend(ops);
        Ok(counts)
    }
}

/// Merge the source stream into the target stream.
///
/// For every source row: target rows sorting strictly before it are
/// target-only leftovers and are deleted; an exact key match becomes an
/// update and consumes the target row; otherwise the source row is inserted
/// and the target row stays put for comparison against the next source row.
/// Once the source is exhausted, every remaining target row is deleted.
pub async fn merge_detail_streams(
    source: &mut Cursor<DetailRow>,
    target: &mut Cursor<DetailRow>,
    sink: &mut dyn OpSink,
) -> SyncResult<DetailOpCounts> {
    let mut counts = DetailOpCounts::default();
    let mut buffer: Vec<DetailOp> = Vec::new();

    while let Some(src_row) = source.next().await? {
        // Catch the target up to the current source key, deleting stale
        // target-only rows on the way.
        while let Some(tgt_row) = target.peek().await? {
            if tgt_row.key < src_row.key {
                buffer.push(DetailOp::Delete(tgt_row.key.clone()));
                target.next().await?;
            } else {
                break;
            }
        }

        let key_matches =
            matches!(target.peek().await?, Some(tgt_row) if tgt_row.key == src_row.key);
        if key_matches {
            buffer.push(DetailOp::Update(src_row));
            target.next().await?;
        } else {
            buffer.push(DetailOp::Insert(src_row));
        }

        if buffer.len() >= FLUSH_THRESHOLD {
            counts.merge(sink.apply(std::mem::take(&mut buffer)).await?);
        }
    }

    while let Some(tgt_row) = target.next().await? {
        buffer.push(DetailOp::Delete(tgt_row.key));
        if buffer.len() >= FLUSH_THRESHOLD {
            counts.merge(sink.apply(std::mem::take(&mut buffer)).await?);
        }
    }

    if !buffer.is_empty() {
        counts.merge(sink.apply(buffer).await?);
    }
    Ok(counts)
}
