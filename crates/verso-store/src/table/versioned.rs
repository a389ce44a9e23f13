//! Columnar table with a lifecycle stamp per row.
//!
//! ```text
//! stamp > 0   inserted at epoch `stamp`, never deleted
//! stamp < 0   deleted at epoch `-stamp - 1`, visible to snapshots before it
//! stamp = 0   appended but not committed yet
//! ```

use std::{
    mem,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    },
};

use rustc_hash::FxHashSet;
use tracing::debug;
use verso_mvcc::{Epoch, EpochId, segments::Segments};

use super::ColumnarTable;
use crate::{Record, RowSet, StoreError, StoreResult, TableFormat, chunk::ChunkAllocator};

#[inline]
const fn inserted_stamp(epoch: EpochId) -> i64 {
    epoch as i64
}

#[inline]
const fn deleted_stamp(epoch: EpochId) -> i64 {
    -(epoch as i64) - 1
}

/// Whether a row stamped `stamp` is live for a snapshot at `epoch`.
#[inline]
const fn is_live(stamp: i64, epoch: EpochId) -> bool {
    stamp > 0 || -stamp - 1 > epoch as i64
}

/// Stamps of one chunk of rows.
struct StampChunk {
    stamps: Box<[AtomicI64]>,
    deleted: AtomicUsize,
    reclaimed: AtomicBool,
}

impl StampChunk {
    fn new(chunk_size: usize) -> Self {
        Self {
            stamps: (0..chunk_size).map(|_| AtomicI64::new(0)).collect(),
            deleted: AtomicUsize::new(0),
            reclaimed: AtomicBool::new(false),
        }
    }

    fn stamp(&self, offset: usize) -> i64 {
        self.stamps[offset].load(Ordering::Acquire)
    }

    fn set(&self, offset: usize, stamp: i64) {
        self.stamps[offset].store(stamp, Ordering::Release);
    }

    fn is_reclaimed(&self) -> bool {
        self.reclaimed.load(Ordering::Acquire)
    }
}

/// A [`ColumnarTable`] plus per-row stamps and per-chunk deletion counts.
///
/// Stamps are atomic and read without locks. Only commits write them, and a
/// commit only flips stamps of rows that no version sees as deleted yet.
pub struct VersionedColumnarTable {
    table: ColumnarTable,
    stamps: Segments<OnceLock<StampChunk>>,
}

impl VersionedColumnarTable {
    #[must_use]
    pub fn new(format: TableFormat, allocator: Arc<dyn ChunkAllocator>) -> Self {
        Self {
            table: ColumnarTable::new(format, allocator),
            stamps: Segments::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn format(&self) -> &TableFormat {
        self.table.format()
    }

    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn ChunkAllocator> {
        self.table.allocator()
    }

    /// Rows appended so far, committed or not.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn ensure_capacity(&self, capacity: usize) -> StoreResult<usize> {
        let before = self.table.chunk_count();
        let capacity = self.table.ensure_capacity(capacity)?;
        let chunk_size = self.format().chunk_size();
        for chunk in before..self.table.chunk_count() {
            self.stamps
                .get_or_create(chunk, OnceLock::new)
                .ok_or(StoreError::CapacityOverflow { requested: capacity })?
                .get_or_init(|| StampChunk::new(chunk_size));
        }
        Ok(capacity)
    }

    /// Appends an uncommitted row.
    pub fn append(&self, record: &Record) -> StoreResult<usize> {
        self.table.check_shape(record)?;
        self.ensure_capacity(self.size() + 1)?;
        self.table.append(record)
    }

    fn stamp_chunk(&self, chunk: usize) -> Option<&StampChunk> {
        self.stamps.get(chunk)?.get()
    }

    /// Stamps rows `[initial_size, size)` as inserted and `deletions` as
    /// deleted at `epoch`.
    pub fn commit(&self, initial_size: usize, epoch: &Epoch, deletions: &FxHashSet<usize>) {
        let format = *self.format();
        let size = self.size();
        let inserted = inserted_stamp(epoch.id());
        for row in initial_size..size {
            let (chunk, offset) = format.locate(row);
            if let Some(stamps) = self.stamp_chunk(chunk) {
                stamps.set(offset, inserted);
            }
        }

        let deleted = deleted_stamp(epoch.id());
        for &row in deletions {
            let (chunk, offset) = format.locate(row);
            if let Some(stamps) = self.stamp_chunk(chunk) {
                stamps.set(offset, deleted);
                stamps.deleted.fetch_add(1, Ordering::AcqRel);
            }
        }

        debug!(
            epoch = %epoch,
            inserted = size - initial_size,
            deleted = deletions.len(),
            "table commit"
        );
    }

    /// Forgets uncommitted rows `>= new_size`.
    pub fn truncate(&self, new_size: usize) {
        let size = self.size();
        self.table.truncate(new_size);
        for row in new_size..size {
            let (chunk, offset) = self.format().locate(row);
            if let Some(stamps) = self.stamp_chunk(chunk) {
                stamps.set(offset, 0);
            }
        }
    }

    /// Whether `chunk` still holds storage.
    #[must_use]
    pub fn has_chunk(&self, chunk: usize) -> bool {
        self.table.has_chunk(chunk)
    }

    /// Stamp of `row`; `None` once its chunk was reclaimed.
    #[must_use]
    pub fn stamp(&self, row: usize) -> Option<i64> {
        let (chunk, offset) = self.format().locate(row);
        self.stamp_chunk(chunk)
            .filter(|stamps| !stamps.is_reclaimed())
            .map(|stamps| stamps.stamp(offset))
    }

    /// Whether `row` exists for a snapshot `(epoch, visible_size)`.
    #[must_use]
    pub fn exists(&self, row: usize, epoch: EpochId, visible_size: usize) -> bool {
        row < visible_size && self.stamp(row).is_some_and(|stamp| is_live(stamp, epoch))
    }

    /// Keeps the rows of `rows` that exist for the snapshot.
    pub fn filter<R: RowSet>(&self, mut rows: R, epoch: EpochId, visible_size: usize) -> R {
        rows.retain(|row| self.exists(row, epoch, visible_size));
        rows
    }

    /// Number of rows existing for the snapshot.
    #[must_use]
    pub fn valid_record_count(&self, epoch: EpochId, visible_size: usize) -> usize {
        let chunk_size = self.format().chunk_size();
        let mut count = 0;
        for chunk in 0..self.format().chunks_for(visible_size) {
            let Some(stamps) = self.stamp_chunk(chunk).filter(|stamps| !stamps.is_reclaimed())
            else {
                continue;
            };
            let end = (visible_size - chunk * chunk_size).min(chunk_size);
            count += (0..end).filter(|&offset| is_live(stamps.stamp(offset), epoch)).count();
        }
        count
    }

    /// Drops every fully deleted chunk whose deletions are all at or before
    /// `watermark`, and returns the dropped chunks.
    pub fn discard_before(&self, watermark: EpochId) -> Vec<usize> {
        let chunk_size = self.format().chunk_size();
        let mut dropped = Vec::new();
        for chunk in 0..self.table.chunk_count() {
            let Some(stamps) = self.stamp_chunk(chunk) else {
                continue;
            };
            if stamps.is_reclaimed() || stamps.deleted.load(Ordering::Acquire) != chunk_size {
                continue;
            }
            let reclaimable =
                (0..chunk_size).all(|offset| !is_live(stamps.stamp(offset), watermark));
            if reclaimable && !stamps.reclaimed.swap(true, Ordering::AcqRel) {
                self.table.drop_chunk(chunk);
                dropped.push(chunk);
            }
        }
        if !dropped.is_empty() {
            debug!(watermark, chunks = ?dropped, "discarded table chunks");
        }
        dropped
    }

    #[must_use]
    pub fn read_int(&self, row: usize, column: usize) -> Option<i32> {
        self.table.read_int(row, column)
    }

    #[must_use]
    pub fn read_double(&self, row: usize, column: usize) -> Option<f64> {
        self.table.read_double(row, column)
    }

    pub fn read_ints(&self, row: usize, column: usize, buf: &mut [i32]) {
        self.table.read_ints(row, column, buf);
    }

    #[must_use]
    pub fn get_record(&self, row: usize) -> Option<Record> {
        self.table.get_record(row)
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let stamps: u64 = self
            .stamps
            .iter()
            .filter_map(OnceLock::get)
            .map(|chunk| {
                (mem::size_of::<StampChunk>() + chunk.stamps.len() * mem::size_of::<AtomicI64>())
                    as u64
            })
            .sum();
        self.table.size_in_bytes() + self.stamps.size_in_bytes() + stamps
    }
}
