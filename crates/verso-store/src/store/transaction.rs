use std::sync::Arc;

use tracing::trace;
use verso_mvcc::{Epoch, Transaction, TransactionHandle};

use super::StoreBase;
use crate::{
    Record, StoreError, StoreFormat, StoreResult,
    index::{Point, PrimaryIndexTransaction, SecondaryIndex, SecondaryIndexTransaction, check_point},
    table::TableTransaction,
};

fn key_of(format: &StoreFormat, record: &Record) -> Point {
    format
        .key_fields()
        .iter()
        .filter_map(|&field| record.read_int(field))
        .collect()
}

fn point_of(format: &StoreFormat, record: &Record) -> Point {
    format
        .indexed_fields()
        .iter()
        .map(|&field| record.attributes()[field])
        .collect()
}

/// The writes staged by the open store transaction, one transaction per
/// part of the store.
///
/// Records are appended to the table as they are submitted; a record whose
/// key is already present replaces it, deleting the previous row as of the
/// commit epoch.
pub struct PendingWrite<I: SecondaryIndex> {
    base: Arc<StoreBase<I>>,
    table: TransactionHandle<TableTransaction>,
    primary: PrimaryIndexTransaction,
    secondary: TransactionHandle<I::Transaction>,
    submitted: usize,
    deleted: usize,
}

impl<I: SecondaryIndex> PendingWrite<I> {
    pub(super) fn new(base: Arc<StoreBase<I>>) -> Self {
        // Every part opens its transaction now so that commit and rollback
        // always find one.
        let table = base.table.transaction();
        let primary = base.primary.transaction();
        let secondary = base.secondary.transaction();
        Self {
            base,
            table,
            primary,
            secondary,
            submitted: 0,
            deleted: 0,
        }
    }

    /// Appends `records`, replacing any live record with the same key.
    ///
    /// A record is checked in full before anything is written for it, so a
    /// rejected record leaves the transaction as it was after the previous
    /// record.
    fn submit_records(&mut self, records: &[Record]) -> StoreResult<()> {
        let format = &self.base.format;
        let mut table = self.table.lock()?;
        let mut secondary = self.secondary.lock()?;

        table.ensure_can_add(records.len())?;
        for record in records {
            table.check_record(record)?;
            let key = key_of(format, record);
            PrimaryIndexTransaction::check_key(&key)?;
            let point = point_of(format, record);
            check_point(&point)?;
            let previous = self.primary.get_row(&key)?;

            let row = table.append(record)?;
            if let Some(previous) = previous {
                table.delete(previous);
            }
            self.primary.index(&key, Some(row))?;
            secondary.index(&point, row)?;
            self.submitted += 1;
        }
        trace!(records = records.len(), "submitted records");
        Ok(())
    }

    fn delete_record(&mut self, key: &Record) -> StoreResult<()> {
        let Some(row) = self.primary.get_row(key.attributes())? else {
            return Err(StoreError::KeyNotFound {
                key: key.attributes().to_vec(),
            });
        };
        self.table.lock()?.delete(row);
        self.primary.index(key.attributes(), None)?;
        self.deleted += 1;
        Ok(())
    }

    fn get_record(&self, key: &Record) -> StoreResult<Option<Record>> {
        let Some(row) = self.primary.get_row(key.attributes())? else {
            return Ok(None);
        };
        Ok(self.table.lock()?.read(row))
    }
}

impl<I: SecondaryIndex> Transaction for PendingWrite<I> {
    /// The parts of the store commit on their own, before the store version
    /// is built.
    fn commit(&mut self, _epoch: &Epoch) {}

    fn rollback(&mut self) {
        self.base.table.rollback();
        self.base.primary.rollback();
        self.base.secondary.rollback();
    }
}

/// Handle on the single open transaction of a store.
///
/// Every [`MultiVersionStore::transaction`](super::MultiVersionStore::transaction)
/// call made while the transaction is open returns a handle to it. Each
/// method locks the transaction for its own duration only. Commit and
/// rollback close the transaction; its handles then fail with
/// [`verso_mvcc::MvccError::TransactionClosed`].
pub struct StoreTransaction<I: SecondaryIndex> {
    handle: TransactionHandle<PendingWrite<I>>,
}

impl<I: SecondaryIndex> StoreTransaction<I> {
    pub(super) const fn new(handle: TransactionHandle<PendingWrite<I>>) -> Self {
        Self { handle }
    }

    /// Whether the transaction has been neither committed nor rolled back.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Whether both handles refer to the same transaction.
    #[inline]
    #[must_use]
    pub fn same_transaction(&self, other: &Self) -> bool {
        self.handle.ptr_eq(&other.handle)
    }

    /// Records submitted so far.
    pub fn submitted(&self) -> StoreResult<usize> {
        Ok(self.handle.lock()?.submitted)
    }

    /// Records deleted by key so far.
    pub fn deleted(&self) -> StoreResult<usize> {
        Ok(self.handle.lock()?.deleted)
    }

    pub fn submit_record(&self, record: &Record) -> StoreResult<()> {
        self.submit_records(std::slice::from_ref(record))
    }

    /// Appends `records`, replacing any live record with the same key.
    ///
    /// Records are taken in order. The first rejected record stops the
    /// submission; the records before it stay submitted.
    pub fn submit_records(&self, records: &[Record]) -> StoreResult<()> {
        self.handle.lock()?.submit_records(records)
    }

    /// Deletes the live record whose key is `key`; `key` carries only the
    /// key attributes.
    pub fn delete_record(&self, key: &Record) -> StoreResult<()> {
        self.handle.lock()?.delete_record(key)
    }

    /// The record with the key of `key` as this transaction sees it.
    pub fn get_record(&self, key: &Record) -> StoreResult<Option<Record>> {
        self.handle.lock()?.get_record(key)
    }
}

impl<I: SecondaryIndex> Clone for StoreTransaction<I> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}
