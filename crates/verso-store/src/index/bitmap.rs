//! Bitmap-per-value secondary index strategy.

use std::{mem, sync::Arc};

use tracing::debug;
use verso_mvcc::{
    Epoch, MultiVersion, MvccResult, Transaction, TransactionHandle, Version, Versioning,
};

use super::{BitmapIndex, SecondaryIndex, SecondaryIndexTransaction, SecondaryIndexVersion};
use crate::{Bitmap, StoreError, StoreFormat, StoreResult, table::SharedTable};

/// Appends rows straight into the shared [`BitmapIndex`]; rollback truncates
/// back to the size the transaction started from.
pub struct BitmapIndexTransaction {
    base: Arc<BitmapIndex>,
    initial_size: usize,
}

impl SecondaryIndexTransaction for BitmapIndexTransaction {
    fn index(&mut self, point: &[i32], row: usize) -> StoreResult<()> {
        let expected = self.base.size();
        if row != expected {
            return Err(StoreError::NonSequentialRow { expected, actual: row });
        }
        self.base.append(point)?;
        Ok(())
    }
}

impl Transaction for BitmapIndexTransaction {
    fn commit(&mut self, _epoch: &Epoch) {}

    fn rollback(&mut self) {
        self.base.truncate(self.initial_size);
    }
}

/// The bitmap index limited to the rows appended before its epoch.
pub struct BitmapIndexVersion {
    epoch: Epoch,
    base: Arc<BitmapIndex>,
    size: usize,
}

impl BitmapIndexVersion {
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Version for BitmapIndexVersion {
    type Transaction = BitmapIndexTransaction;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        _next: &Arc<Self>,
        _transaction: &mut BitmapIndexTransaction,
    ) -> MvccResult<()> {
        Ok(())
    }
}

impl SecondaryIndexVersion for BitmapIndexVersion {
    type Rows = Bitmap;

    fn match_pattern(&self, pattern: &[i32]) -> StoreResult<Bitmap> {
        self.base.match_pattern(pattern, self.size)
    }

    fn match_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<Bitmap> {
        self.base.match_composite(pattern, self.size)
    }
}

pub struct BitmapVersioning;

impl Versioning for BitmapVersioning {
    type Base = BitmapIndex;
    type Transaction = BitmapIndexTransaction;
    type Version = BitmapIndexVersion;

    fn create_transaction(
        base: &Arc<BitmapIndex>,
        _latest: &Arc<BitmapIndexVersion>,
    ) -> BitmapIndexTransaction {
        BitmapIndexTransaction {
            base: Arc::clone(base),
            initial_size: base.size(),
        }
    }

    fn create_version(
        base: &Arc<BitmapIndex>,
        epoch: &Epoch,
        _transaction: Option<&BitmapIndexTransaction>,
    ) -> BitmapIndexVersion {
        BitmapIndexVersion {
            epoch: epoch.clone(),
            base: Arc::clone(base),
            size: base.size(),
        }
    }
}

/// Multi-version [`BitmapIndex`] over the indexed fields of a store.
pub struct BitmapSecondaryIndex {
    inner: MultiVersion<BitmapVersioning>,
}

impl BitmapSecondaryIndex {
    #[must_use]
    pub fn new(level_count: usize) -> Self {
        Self {
            inner: MultiVersion::new(BitmapIndex::new(level_count)),
        }
    }

    #[must_use]
    pub fn base(&self) -> &BitmapIndex {
        self.inner.base()
    }
}

impl SecondaryIndex for BitmapSecondaryIndex {
    type Rows = Bitmap;
    type Transaction = BitmapIndexTransaction;
    type Version = BitmapIndexVersion;

    fn build(format: &StoreFormat, _table: &SharedTable) -> StoreResult<Self> {
        Ok(Self::new(format.indexed_fields().len()))
    }

    fn transaction(&self) -> TransactionHandle<BitmapIndexTransaction> {
        self.inner.transaction()
    }

    fn commit(&self, epoch: Epoch) -> StoreResult<Arc<BitmapIndexVersion>> {
        let version = self.inner.commit(epoch)?;
        debug!(rows = version.size(), "bitmap index committed");
        Ok(version)
    }

    fn rollback(&self) {
        self.inner.rollback();
    }

    fn latest(&self) -> Arc<BitmapIndexVersion> {
        self.inner.latest()
    }

    fn size_in_bytes(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.base().size_in_bytes()
    }
}
