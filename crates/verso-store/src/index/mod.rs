//! Primary and secondary indexes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  primary      key value ──► row       (versioned integer array)     │
//! │  secondary    pattern   ──► candidate rows                          │
//! │                 BitmapSecondaryIndex          one bitmap per value  │
//! │                 ChunkedBitmapSecondaryIndex   one index per chunk   │
//! │                 ImprintsSecondaryIndex        column imprints       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Secondary indexes are append-only and never see deletions: a version's
//! candidate rows are filtered through the table version of the same epoch.

mod bitmap;
mod bitmap_index;
mod chunked;
mod imprints;
mod level;
mod primary;

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::warn;
use verso_mvcc::{Epoch, TransactionHandle};

pub use bitmap::{BitmapIndexTransaction, BitmapIndexVersion, BitmapSecondaryIndex};
pub use bitmap_index::BitmapIndex;
pub use chunked::{ChunkedBitmapSecondaryIndex, ChunkedIndexTransaction, ChunkedIndexVersion};
pub use imprints::{
    CACHELINE_ROWS, ColumnImprintsIndex, ImprintsIndexTransaction, ImprintsIndexVersion,
    ImprintsSecondaryIndex,
};
pub use level::LevelBitmapIndex;
pub use primary::{MultiVersionPrimaryIndex, PrimaryIndexTransaction, PrimaryIndexVersion};

use crate::{RowSet, StoreError, StoreFormat, StoreResult, table::SharedTable};

/// Pattern slot matching every value of its level.
pub const ANY: i32 = -1;

/// Indexed values of one record, one per level.
pub type Point = SmallVec<[i32; 8]>;

/// Staged appends of a secondary index.
pub trait SecondaryIndexTransaction: Send {
    /// Indexes `point` at `row`. Rows must be indexed in order.
    fn index(&mut self, point: &[i32], row: usize) -> StoreResult<()>;
}

/// A secondary index as of one epoch.
pub trait SecondaryIndexVersion: Send + Sync {
    type Rows: RowSet;

    /// Rows whose value on each level equals the pattern slot, or any row
    /// where the slot is [`ANY`].
    fn match_pattern(&self, pattern: &[i32]) -> StoreResult<Self::Rows>;

    /// Rows whose value on each level is one of the listed values. A level
    /// listing [`ANY`] is unconstrained.
    fn match_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<Self::Rows>;
}

/// A multi-version secondary index strategy.
pub trait SecondaryIndex: Send + Sync + Sized + 'static {
    type Rows: RowSet;
    type Transaction: SecondaryIndexTransaction;
    type Version: SecondaryIndexVersion<Rows = Self::Rows>;

    /// Builds an empty index over the indexed fields of `format`.
    fn build(format: &StoreFormat, table: &SharedTable) -> StoreResult<Self>;

    /// The open transaction, created if there is none.
    fn transaction(&self) -> TransactionHandle<Self::Transaction>;

    fn commit(&self, epoch: Epoch) -> StoreResult<Arc<Self::Version>>;

    fn rollback(&self);

    fn latest(&self) -> Arc<Self::Version>;

    /// Drops whatever the index keeps for table chunks that were reclaimed.
    fn discard_chunks(&self, chunks: &[usize]) {
        if !chunks.is_empty() {
            warn!(chunks = chunks.len(), "index does not support discarding chunks");
        }
    }

    fn size_in_bytes(&self) -> u64;
}

/// Rejects patterns without one slot per level.
pub(crate) const fn check_pattern_length(expected: usize, actual: usize) -> StoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::PatternLength { expected, actual })
    }
}

/// Rejects points with negative values.
pub(crate) fn check_point(point: &[i32]) -> StoreResult<()> {
    match point.iter().position(|&value| value < 0) {
        Some(level) => Err(StoreError::NegativeValue {
            level,
            value: point[level],
        }),
        None => Ok(()),
    }
}

/// Whether a composite slot leaves its level unconstrained.
#[inline]
pub(crate) fn is_any(values: &[i32]) -> bool {
    values.contains(&ANY)
}
