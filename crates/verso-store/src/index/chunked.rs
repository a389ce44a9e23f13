//! Chunk-aligned bitmap secondary index strategy.
//!
//! Keeps one [`BitmapIndex`] per table chunk so that chunks reclaimed by the
//! table can be reclaimed here too. Queries answer with a [`ChunkedBitmap`]
//! whose chunks line up with the table's.

use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::debug;
use verso_mvcc::{
    Epoch, MultiVersion, MvccResult, Transaction, TransactionHandle, Version, Versioning,
};

use super::{
    BitmapIndex, SecondaryIndex, SecondaryIndexTransaction, SecondaryIndexVersion,
    check_pattern_length,
};
use crate::{
    bitmap::RowSet,
    Bitmap, ChunkedBitmap, StoreError, StoreFormat, StoreResult, TableFormat, table::SharedTable,
};

type Chunks = Vec<Option<Arc<BitmapIndex>>>;

/// Per-chunk bitmap indexes shared by all versions.
pub struct ChunkedBitmapIndex {
    format: TableFormat,
    level_count: usize,
    chunks: RwLock<Chunks>,
    size: AtomicUsize,
}

impl ChunkedBitmapIndex {
    fn new(format: TableFormat, level_count: usize) -> Self {
        Self {
            format,
            level_count,
            chunks: RwLock::new(Vec::new()),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn append(&self, point: &[i32]) -> StoreResult<()> {
        let row = self.size();
        let (chunk, _) = self.format.locate(row);
        let index = {
            let mut chunks = self.chunks.write();
            if chunks.len() <= chunk {
                chunks.resize(chunk + 1, None);
            }
            let level_count = self.level_count;
            Arc::clone(chunks[chunk].get_or_insert_with(|| Arc::new(BitmapIndex::new(level_count))))
        };
        index.append(point)?;
        self.size.store(row + 1, Ordering::Release);
        Ok(())
    }

    fn truncate(&self, len: usize) {
        if len >= self.size() {
            return;
        }
        let (chunk, offset) = self.format.locate(len);
        let mut chunks = self.chunks.write();
        let keep = if offset == 0 { chunk } else { chunk + 1 };
        chunks.truncate(keep);
        if offset != 0 {
            if let Some(Some(index)) = chunks.get(chunk) {
                index.truncate(offset);
            }
        }
        self.size.store(len, Ordering::Release);
    }

    fn discard(&self, dropped: &[usize]) {
        let mut chunks = self.chunks.write();
        for &chunk in dropped {
            if let Some(slot) = chunks.get_mut(chunk) {
                *slot = None;
            }
        }
    }

    /// Runs `query` on every chunk holding rows below `limit`.
    fn query(
        &self,
        limit: usize,
        query: impl Fn(&BitmapIndex, usize) -> StoreResult<Bitmap>,
    ) -> StoreResult<ChunkedBitmap> {
        let snapshot: Chunks = self.chunks.read().clone();
        let chunk_size = self.format.chunk_size();
        let chunk_count = self.format.chunks_for(limit);

        let mut result = Vec::with_capacity(chunk_count);
        for (chunk, index) in snapshot.iter().take(chunk_count).enumerate() {
            let Some(index) = index else {
                result.push(None);
                continue;
            };
            let local_limit = (limit - chunk * chunk_size).min(chunk_size);
            let rows = query(index, local_limit)?;
            result.push(if rows.is_empty() { None } else { Some(rows) });
        }
        Ok(ChunkedBitmap::new(result, chunk_size))
    }

    fn size_in_bytes(&self) -> u64 {
        let chunks = self.chunks.read();
        let slots = chunks.capacity() * mem::size_of::<Option<Arc<BitmapIndex>>>();
        let mut bytes = (mem::size_of::<Self>() + slots) as u64;
        for index in chunks.iter().flatten() {
            bytes += index.size_in_bytes();
        }
        bytes
    }
}

/// Appends rows into the chunk indexes; rollback truncates them.
pub struct ChunkedIndexTransaction {
    base: Arc<ChunkedBitmapIndex>,
    initial_size: usize,
}

impl SecondaryIndexTransaction for ChunkedIndexTransaction {
    fn index(&mut self, point: &[i32], row: usize) -> StoreResult<()> {
        let expected = self.base.size();
        if row != expected {
            return Err(StoreError::NonSequentialRow { expected, actual: row });
        }
        self.base.append(point)
    }
}

impl Transaction for ChunkedIndexTransaction {
    fn commit(&mut self, _epoch: &Epoch) {}

    fn rollback(&mut self) {
        self.base.truncate(self.initial_size);
    }
}

pub struct ChunkedIndexVersion {
    epoch: Epoch,
    base: Arc<ChunkedBitmapIndex>,
    size: usize,
}

impl Version for ChunkedIndexVersion {
    type Transaction = ChunkedIndexTransaction;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        _next: &Arc<Self>,
        _transaction: &mut ChunkedIndexTransaction,
    ) -> MvccResult<()> {
        Ok(())
    }
}

impl SecondaryIndexVersion for ChunkedIndexVersion {
    type Rows = ChunkedBitmap;

    fn match_pattern(&self, pattern: &[i32]) -> StoreResult<ChunkedBitmap> {
        check_pattern_length(self.base.level_count, pattern.len())?;
        self.base
            .query(self.size, |index, limit| index.match_pattern(pattern, limit))
    }

    fn match_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<ChunkedBitmap> {
        check_pattern_length(self.base.level_count, pattern.len())?;
        self.base
            .query(self.size, |index, limit| index.match_composite(pattern, limit))
    }
}

pub struct ChunkedVersioning;

impl Versioning for ChunkedVersioning {
    type Base = ChunkedBitmapIndex;
    type Transaction = ChunkedIndexTransaction;
    type Version = ChunkedIndexVersion;

    fn create_transaction(
        base: &Arc<ChunkedBitmapIndex>,
        _latest: &Arc<ChunkedIndexVersion>,
    ) -> ChunkedIndexTransaction {
        ChunkedIndexTransaction {
            base: Arc::clone(base),
            initial_size: base.size(),
        }
    }

    fn create_version(
        base: &Arc<ChunkedBitmapIndex>,
        epoch: &Epoch,
        _transaction: Option<&ChunkedIndexTransaction>,
    ) -> ChunkedIndexVersion {
        ChunkedIndexVersion {
            epoch: epoch.clone(),
            base: Arc::clone(base),
            size: base.size(),
        }
    }
}

/// Multi-version per-chunk bitmap index.
pub struct ChunkedBitmapSecondaryIndex {
    inner: MultiVersion<ChunkedVersioning>,
}

impl ChunkedBitmapSecondaryIndex {
    #[must_use]
    pub fn new(format: TableFormat, level_count: usize) -> Self {
        Self {
            inner: MultiVersion::new(ChunkedBitmapIndex::new(format, level_count)),
        }
    }

    /// Number of chunk indexes currently held.
    #[must_use]
    pub fn live_chunks(&self) -> usize {
        self.inner.base().chunks.read().iter().flatten().count()
    }
}

impl SecondaryIndex for ChunkedBitmapSecondaryIndex {
    type Rows = ChunkedBitmap;
    type Transaction = ChunkedIndexTransaction;
    type Version = ChunkedIndexVersion;

    fn build(format: &StoreFormat, _table: &SharedTable) -> StoreResult<Self> {
        Ok(Self::new(*format.table(), format.indexed_fields().len()))
    }

    fn transaction(&self) -> TransactionHandle<ChunkedIndexTransaction> {
        self.inner.transaction()
    }

    fn commit(&self, epoch: Epoch) -> StoreResult<Arc<ChunkedIndexVersion>> {
        Ok(self.inner.commit(epoch)?)
    }

    fn rollback(&self) {
        self.inner.rollback();
    }

    fn latest(&self) -> Arc<ChunkedIndexVersion> {
        self.inner.latest()
    }

    fn discard_chunks(&self, chunks: &[usize]) {
        self.inner.base().discard(chunks);
        debug!(chunks = chunks.len(), "discarded index chunks");
    }

    fn size_in_bytes(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.inner.base().size_in_bytes()
    }
}
