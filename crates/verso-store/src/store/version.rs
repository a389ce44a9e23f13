use std::sync::Arc;

use verso_mvcc::{Epoch, MvccResult, Version};

use super::PendingWrite;
use crate::{
    Record, RowSet, StoreResult,
    index::{PrimaryIndexVersion, SecondaryIndex, SecondaryIndexVersion},
    table::{TableVersion, ValueColumn},
};

/// Read-only snapshot of a store at one epoch.
///
/// Holds the table, primary and secondary versions committed together, so
/// every query answers as of the same epoch however many commits follow.
pub struct StoreVersion<I: SecondaryIndex> {
    pub(super) epoch: Epoch,
    pub(super) table: Arc<TableVersion>,
    pub(super) primary: PrimaryIndexVersion,
    pub(super) secondary: Arc<I::Version>,
}

impl<I: SecondaryIndex> StoreVersion<I> {
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Number of live records.
    #[must_use]
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Rows matching `pattern`, one slot per indexed field.
    pub fn find_rows(&self, pattern: &[i32]) -> StoreResult<I::Rows> {
        let rows = self.secondary.match_pattern(pattern)?;
        Ok(self.table.filter(rows))
    }

    /// Rows matching a composite pattern, one value set per indexed field.
    pub fn find_rows_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<I::Rows> {
        let rows = self.secondary.match_composite(pattern)?;
        Ok(self.table.filter(rows))
    }

    /// Row of the live record with the key of `key`.
    pub fn find_row(&self, key: &Record) -> StoreResult<Option<usize>> {
        let row = self.primary.get_row(key.attributes())?;
        Ok(row.filter(|&row| self.table.exists(row)))
    }

    /// Records matching `pattern`, in row order.
    pub fn scan(&self, pattern: &[i32]) -> StoreResult<Vec<Record>> {
        let rows = self.find_rows(pattern)?;
        Ok(self.records(&rows))
    }

    pub fn scan_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<Vec<Record>> {
        let rows = self.find_rows_composite(pattern)?;
        Ok(self.records(&rows))
    }

    fn records(&self, rows: &I::Rows) -> Vec<Record> {
        rows.rows().filter_map(|row| self.table.get_record(row)).collect()
    }

    /// Reads a cell of a row found through this version.
    #[must_use]
    pub fn read_int(&self, row: usize, column: usize) -> Option<i32> {
        self.table.read_int(row, column)
    }

    #[must_use]
    pub fn read_double(&self, row: usize, column: usize) -> Option<f64> {
        self.table.read_double(row, column)
    }

    /// Reads consecutive cells of one attribute column within a chunk.
    pub fn read_ints(&self, row: usize, column: usize, buf: &mut [i32]) {
        self.table.read_ints(row, column, buf);
    }

    #[must_use]
    pub fn get_record(&self, row: usize) -> Option<Record> {
        self.table.get_record(row)
    }

    /// Value `column` of the records matching `pattern`, copied out for
    /// arithmetic.
    pub fn value_column(&self, column: usize, pattern: &[i32]) -> StoreResult<ValueColumn> {
        let rows = self.find_rows(pattern)?;
        self.table.gather_values(&rows, column)
    }
}

impl<I: SecondaryIndex> Version for StoreVersion<I> {
    type Transaction = PendingWrite<I>;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        _next: &Arc<Self>,
        _transaction: &mut PendingWrite<I>,
    ) -> MvccResult<()> {
        Ok(())
    }
}
