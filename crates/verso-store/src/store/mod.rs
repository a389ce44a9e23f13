//! The store: a table, a primary index and a secondary index committed as one.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  MultiVersionStore<I>                                                 │
//! │    StoreBase                                                          │
//! │      table      MultiVersionTable          records + lifecycle stamps │
//! │      primary    MultiVersionPrimaryIndex   key ──► row                │
//! │      secondary  I: SecondaryIndex          pattern ──► rows           │
//! │    PendingWrite      drives the three part transactions               │
//! │    StoreTransaction  shared handle on the PendingWrite                │
//! │    StoreVersion      the three part versions of one epoch             │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A commit validates the epoch once, commits the table, the primary index
//! and the secondary index in that order, then publishes a version made of
//! the three new part versions.

mod transaction;
mod version;

use std::{marker::PhantomData, mem, sync::Arc};

use tracing::{debug, info};
use verso_mvcc::{Epoch, EpochId, MultiVersion, Versioning};

pub use transaction::{PendingWrite, StoreTransaction};
pub use version::StoreVersion;

use crate::{
    StoreFormat, StoreResult,
    chunk::{ChunkAllocator, HeapAllocator},
    index::{MultiVersionPrimaryIndex, SecondaryIndex},
    table::{MultiVersionTable, SharedTable},
};

/// Parts of a store shared by its transaction and versions.
pub struct StoreBase<I> {
    format: StoreFormat,
    table: MultiVersionTable,
    primary: MultiVersionPrimaryIndex,
    secondary: I,
}

pub struct StoreVersioning<I>(PhantomData<I>);

impl<I: SecondaryIndex> Versioning for StoreVersioning<I> {
    type Base = StoreBase<I>;
    type Transaction = PendingWrite<I>;
    type Version = StoreVersion<I>;

    fn create_transaction(
        base: &Arc<StoreBase<I>>,
        latest: &Arc<StoreVersion<I>>,
    ) -> PendingWrite<I> {
        debug!(epoch = %latest.epoch(), "opening store transaction");
        PendingWrite::new(Arc::clone(base))
    }

    fn create_version(
        base: &Arc<StoreBase<I>>,
        epoch: &Epoch,
        _transaction: Option<&PendingWrite<I>>,
    ) -> StoreVersion<I> {
        StoreVersion {
            epoch: epoch.clone(),
            table: base.table.latest(),
            primary: base.primary.latest(),
            secondary: base.secondary.latest(),
        }
    }
}

/// Multi-version columnar store with a pluggable secondary index.
pub struct MultiVersionStore<I: SecondaryIndex> {
    inner: MultiVersion<StoreVersioning<I>>,
}

impl<I: SecondaryIndex> MultiVersionStore<I> {
    /// An empty store on the heap allocator.
    pub fn new(format: StoreFormat) -> StoreResult<Self> {
        Self::with_parts(format, Arc::new(HeapAllocator), I::build)
    }

    /// An empty store whose secondary index is built by `build_index`.
    pub fn with_parts(
        format: StoreFormat,
        allocator: Arc<dyn ChunkAllocator>,
        build_index: impl FnOnce(&StoreFormat, &SharedTable) -> StoreResult<I>,
    ) -> StoreResult<Self> {
        let primary = MultiVersionPrimaryIndex::new(format.key_fields())?;
        let table = MultiVersionTable::new(*format.table(), allocator);
        let secondary = build_index(&format, table.base())?;
        info!(
            attributes = format.table().attribute_count(),
            values = format.table().value_count(),
            indexed = format.indexed_fields().len(),
            chunk_size = format.chunk_size(),
            "created store"
        );
        Ok(Self {
            inner: MultiVersion::new(StoreBase {
                format,
                table,
                primary,
                secondary,
            }),
        })
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> &StoreFormat {
        &self.inner.base().format
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &MultiVersionTable {
        &self.inner.base().table
    }

    #[inline]
    #[must_use]
    pub fn secondary_index(&self) -> &I {
        &self.inner.base().secondary
    }

    /// The most recently committed version.
    #[must_use]
    pub fn latest(&self) -> Arc<StoreVersion<I>> {
        self.inner.latest()
    }

    #[must_use]
    pub fn has_transaction(&self) -> bool {
        self.inner.has_transaction()
    }

    /// The open transaction, created if needed.
    ///
    /// Handles may be kept across [`MultiVersionStore::commit`]; the commit
    /// closes them.
    pub fn transaction(&self) -> StoreTransaction<I> {
        StoreTransaction::new(self.inner.transaction())
    }

    /// Commits the open transaction at `epoch`.
    pub fn commit(&self, epoch: Epoch) -> StoreResult<Arc<StoreVersion<I>>> {
        let base = Arc::clone(self.inner.base());
        let part_epoch = epoch.clone();
        self.inner.commit_with(epoch, move |_| {
            base.table.commit(part_epoch.clone())?;
            base.primary.commit(part_epoch.clone())?;
            base.secondary.commit(part_epoch)?;
            Ok(())
        })
    }

    /// Discards the open transaction, if any.
    pub fn rollback(&self) {
        self.inner.rollback();
    }

    /// Reclaims storage only snapshots older than `watermark` could read.
    pub fn discard_before(&self, watermark: EpochId) {
        let base = self.inner.base();
        let dropped = base.table.discard_before(watermark);
        if !dropped.is_empty() {
            base.secondary.discard_chunks(&dropped);
        }
    }

    /// Approximate memory held by the store and all its parts.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let base = self.inner.base();
        mem::size_of::<Self>() as u64
            + base.table.size_in_bytes()
            + base.primary.size_in_bytes()
            + base.secondary.size_in_bytes()
    }
}
