//! The versioned columnar table.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  MultiVersionTable                                             │
//! │    base: Arc<VersionedColumnarTable>     (shared by versions)  │
//! │    TableTransaction  appends straight into the base, stages    │
//! │                      deletions until commit                    │
//! │    TableVersion      (epoch, visible_size) view of the base    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Committed cells are never rewritten: only appends and stamp flips touch
//! the base, so versions read cells directly once a row is known to exist.
//! Cells and stamps are atomics, and versions read them without locking.

mod columnar;
mod values;
mod versioned;

use std::{mem, sync::Arc};

use rustc_hash::FxHashSet;
use tracing::debug;
use verso_mvcc::{
    Epoch, EpochId, MultiVersion, MvccResult, Transaction, TransactionHandle, Version, Versioning,
};

pub use columnar::{ChunkSet, ColumnarTable, MAX_ROWS};
pub use values::ValueColumn;
pub use versioned::VersionedColumnarTable;

use crate::{Record, RowSet, StoreError, StoreResult, TableFormat, chunk::ChunkAllocator};

/// Handle on the table base shared by versions and column-reading indexes.
pub type SharedTable = Arc<VersionedColumnarTable>;

/// Pending appends and deletions against the table.
pub struct TableTransaction {
    base: SharedTable,
    current: Arc<TableVersion>,
    initial_size: usize,
    deletions: FxHashSet<usize>,
}

impl TableTransaction {
    fn new(base: SharedTable, current: Arc<TableVersion>) -> Self {
        let initial_size = base.size();
        Self {
            base,
            current,
            initial_size,
            deletions: FxHashSet::default(),
        }
    }

    /// Rows the table had when the transaction started.
    #[inline]
    #[must_use]
    pub const fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// Rows in the table including this transaction's appends.
    #[must_use]
    pub fn size(&self) -> usize {
        self.base.size()
    }

    /// Reserves room for `count` more rows.
    pub fn ensure_can_add(&mut self, count: usize) -> StoreResult<()> {
        let target = self.base.size().saturating_add(count);
        self.base.ensure_capacity(target)?;
        Ok(())
    }

    /// Fails if `record` does not fit the table's columns.
    pub fn check_record(&self, record: &Record) -> StoreResult<()> {
        self.base.format().check_record(record)
    }

    /// Appends `record`; returns its row.
    pub fn append(&mut self, record: &Record) -> StoreResult<usize> {
        self.base.append(record)
    }

    /// Marks `row` deleted as of the commit epoch.
    pub fn delete(&mut self, row: usize) {
        self.deletions.insert(row);
    }

    /// Whether `row` exists as seen by this transaction.
    #[must_use]
    pub fn exists(&self, row: usize) -> bool {
        if row >= self.size() || self.deletions.contains(&row) {
            return false;
        }
        row >= self.initial_size || self.current.exists(row)
    }

    /// The record at `row`, if it exists for this transaction.
    #[must_use]
    pub fn read(&self, row: usize) -> Option<Record> {
        if self.exists(row) {
            self.base.get_record(row)
        } else {
            None
        }
    }
}

impl Transaction for TableTransaction {
    fn commit(&mut self, epoch: &Epoch) {
        self.base.commit(self.initial_size, epoch, &self.deletions);
    }

    fn rollback(&mut self) {
        self.deletions.clear();
        self.base.truncate(self.initial_size);
    }
}

/// The table as of one epoch.
pub struct TableVersion {
    epoch: Epoch,
    base: SharedTable,
    visible_size: usize,
}

impl TableVersion {
    /// Row boundary captured when this version was created.
    #[inline]
    #[must_use]
    pub const fn visible_size(&self) -> usize {
        self.visible_size
    }

    #[inline]
    fn epoch_id(&self) -> EpochId {
        self.epoch.id()
    }

    #[must_use]
    pub fn exists(&self, row: usize) -> bool {
        self.base.exists(row, self.epoch_id(), self.visible_size)
    }

    /// Number of live rows; scans every stamp below the visible size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.base.valid_record_count(self.epoch_id(), self.visible_size)
    }

    /// Keeps the candidate rows that exist in this version.
    pub fn filter<R: RowSet>(&self, rows: R) -> R {
        self.base.filter(rows, self.epoch_id(), self.visible_size)
    }

    /// Reads a cell of a row known to exist.
    #[must_use]
    pub fn read_int(&self, row: usize, column: usize) -> Option<i32> {
        self.base.read_int(row, column)
    }

    #[must_use]
    pub fn read_double(&self, row: usize, column: usize) -> Option<f64> {
        self.base.read_double(row, column)
    }

    pub fn read_ints(&self, row: usize, column: usize, buf: &mut [i32]) {
        self.base.read_ints(row, column, buf);
    }

    #[must_use]
    pub fn get_record(&self, row: usize) -> Option<Record> {
        self.base.get_record(row)
    }

    /// Copies value `column` of `rows` into a [`ValueColumn`], in row order.
    pub fn gather_values<R: RowSet>(&self, rows: &R, column: usize) -> StoreResult<ValueColumn> {
        let value_count = self.base.format().value_count();
        if column >= value_count {
            return Err(StoreError::InvalidFormat(format!(
                "value column {column} out of {value_count}"
            )));
        }
        let values: Vec<f64> = rows
            .rows()
            .filter_map(|row| self.base.read_double(row, column))
            .collect();
        Ok(ValueColumn::gather(self.base.allocator().as_ref(), &values))
    }
}

impl Version for TableVersion {
    type Transaction = TableTransaction;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        _next: &Arc<Self>,
        _transaction: &mut TableTransaction,
    ) -> MvccResult<()> {
        Ok(())
    }
}

/// [`Versioning`] of the columnar table.
pub struct TableVersioning;

impl Versioning for TableVersioning {
    type Base = VersionedColumnarTable;
    type Transaction = TableTransaction;
    type Version = TableVersion;

    fn create_transaction(base: &SharedTable, latest: &Arc<TableVersion>) -> TableTransaction {
        TableTransaction::new(Arc::clone(base), Arc::clone(latest))
    }

    fn create_version(
        base: &SharedTable,
        epoch: &Epoch,
        _transaction: Option<&TableTransaction>,
    ) -> TableVersion {
        TableVersion {
            epoch: epoch.clone(),
            base: Arc::clone(base),
            visible_size: base.size(),
        }
    }
}

/// Multi-version columnar table.
pub struct MultiVersionTable {
    inner: MultiVersion<TableVersioning>,
}

impl MultiVersionTable {
    #[must_use]
    pub fn new(format: TableFormat, allocator: Arc<dyn ChunkAllocator>) -> Self {
        Self {
            inner: MultiVersion::new(VersionedColumnarTable::new(format, allocator)),
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> &SharedTable {
        self.inner.base()
    }

    #[must_use]
    pub fn latest(&self) -> Arc<TableVersion> {
        self.inner.latest()
    }

    pub fn transaction(&self) -> TransactionHandle<TableTransaction> {
        self.inner.transaction()
    }

    pub fn commit(&self, epoch: Epoch) -> StoreResult<Arc<TableVersion>> {
        Ok(self.inner.commit(epoch)?)
    }

    pub fn rollback(&self) {
        self.inner.rollback();
    }

    /// Reclaims fully deleted chunks no snapshot at or after `watermark`
    /// can see; returns the reclaimed chunks.
    pub fn discard_before(&self, watermark: EpochId) -> Vec<usize> {
        let dropped = self.base().discard_before(watermark);
        debug!(watermark, dropped = dropped.len(), "table discard");
        dropped
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.base().size_in_bytes()
    }
}
