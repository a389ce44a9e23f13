//! Single-field primary index: key value ──► row.

use std::sync::Arc;

use verso_mvcc::{
    Epoch, IntegerArrayTransaction, IntegerArrayVersion, MultiVersionIntegerArray,
    TransactionHandle, Version, check_index,
};

use crate::{StoreError, StoreResult};

const NO_ROW: i32 = -1;

fn key_slot(point: &[i32]) -> StoreResult<usize> {
    match point.first() {
        Some(&key) if key >= 0 => Ok(key as usize),
        Some(&key) => Err(StoreError::NegativeValue { level: 0, value: key }),
        None => Err(StoreError::PatternLength { expected: 1, actual: 0 }),
    }
}

/// Multi-version key to row mapping backed by a versioned integer array.
pub struct MultiVersionPrimaryIndex {
    mapping: MultiVersionIntegerArray,
}

impl MultiVersionPrimaryIndex {
    /// Fails unless `key_fields` names exactly one field.
    pub fn new(key_fields: &[usize]) -> StoreResult<Self> {
        match key_fields.len() {
            0 => Err(StoreError::InvalidFormat("primary index needs a key field".to_owned())),
            1 => Ok(Self {
                mapping: MultiVersionIntegerArray::with_empty_value(NO_ROW),
            }),
            fields => Err(StoreError::MultiFieldPrimaryKey { fields }),
        }
    }

    pub fn transaction(&self) -> PrimaryIndexTransaction {
        PrimaryIndexTransaction {
            mapping: self.mapping.transaction(),
        }
    }

    pub fn commit(&self, epoch: Epoch) -> StoreResult<PrimaryIndexVersion> {
        let mapping = self.mapping.commit(epoch)?;
        Ok(PrimaryIndexVersion { mapping })
    }

    pub fn rollback(&self) {
        self.mapping.rollback();
    }

    #[must_use]
    pub fn latest(&self) -> PrimaryIndexVersion {
        PrimaryIndexVersion {
            mapping: self.mapping.latest(),
        }
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.mapping.size_in_bytes()
    }
}

/// Pending key assignments.
///
/// Each call locks the underlying array transaction for its own duration.
#[derive(Clone)]
pub struct PrimaryIndexTransaction {
    mapping: TransactionHandle<IntegerArrayTransaction>,
}

impl PrimaryIndexTransaction {
    /// Fails unless the key of `point` can be assigned a row.
    pub fn check_key(point: &[i32]) -> StoreResult<()> {
        check_index(key_slot(point)?)?;
        Ok(())
    }

    /// Row currently assigned to the key of `point`, as seen by the
    /// transaction.
    pub fn get_row(&self, point: &[i32]) -> StoreResult<Option<usize>> {
        let slot = key_slot(point)?;
        let row = self.mapping.lock()?.get(slot);
        Ok(usize::try_from(row).ok())
    }

    /// Assigns `row` to the key of `point`; `None` unassigns it.
    pub fn index(&self, point: &[i32], row: Option<usize>) -> StoreResult<()> {
        let slot = key_slot(point)?;
        let row = match row {
            Some(row) => i32::try_from(row)
                .map_err(|_| StoreError::CapacityOverflow { requested: row + 1 })?,
            None => NO_ROW,
        };
        self.mapping.lock()?.set(slot, row)?;
        Ok(())
    }
}

/// The key to row mapping as of one epoch.
#[derive(Clone)]
pub struct PrimaryIndexVersion {
    mapping: Arc<IntegerArrayVersion>,
}

impl PrimaryIndexVersion {
    /// Row of the key of `point`, if one is assigned.
    pub fn get_row(&self, point: &[i32]) -> StoreResult<Option<usize>> {
        let row = self.mapping.get(key_slot(point)?);
        Ok(usize::try_from(row).ok())
    }

    #[must_use]
    pub fn epoch(&self) -> &Epoch {
        self.mapping.epoch()
    }
}
