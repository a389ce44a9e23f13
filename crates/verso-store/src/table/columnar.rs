//! Chunked column storage without versioning.
//!
//! Chunks are created in [`Segments`], so they never move once allocated,
//! and their cells are atomic. The single writer fills slots at or past the
//! published size while readers read the slots below it without locking.
//! Each chunk sits behind its own lock, taken for writing only to release the
//! chunk's storage.

use std::{
    mem,
    ops::Range,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::trace;
use verso_mvcc::segments::Segments;

use crate::{
    Record, StoreError, StoreResult, TableFormat,
    chunk::{Chunk, ChunkAllocator, DoubleChunk, EMPTY_INT},
};

/// Largest number of rows a table can address.
pub const MAX_ROWS: usize = i32::MAX as usize;

/// The columns of one chunk of rows.
pub struct ChunkSet {
    attributes: Vec<Box<dyn Chunk<i32>>>,
    values: Vec<Box<dyn DoubleChunk>>,
}

impl ChunkSet {
    fn allocate(format: &TableFormat, allocator: &dyn ChunkAllocator) -> Self {
        let size = format.chunk_size();
        Self {
            attributes: (0..format.attribute_count())
                .map(|_| allocator.allocate_ints(size))
                .collect(),
            values: (0..format.value_count())
                .map(|_| allocator.allocate_doubles(size))
                .collect(),
        }
    }

    fn write(&self, offset: usize, record: &Record) {
        for (column, &value) in self.attributes.iter().zip(record.attributes()) {
            column.write(offset, value);
        }
        for (column, &value) in self.values.iter().zip(record.values()) {
            column.write(offset, value);
        }
    }

    /// Restores the freshly allocated contents of `range`.
    fn reset(&self, range: Range<usize>) {
        for column in &self.attributes {
            column.fill(range.clone(), EMPTY_INT);
        }
        for column in &self.values {
            column.fill(range.clone(), 0.0);
        }
    }

    fn record(&self, offset: usize) -> Record {
        Record::new(
            self.attributes.iter().map(|column| column.read(offset)).collect::<Vec<_>>(),
            self.values.iter().map(|column| column.read(offset)).collect::<Vec<_>>(),
        )
    }

    fn size_in_bytes(&self) -> u64 {
        let attributes: u64 = self.attributes.iter().map(|c| c.size_in_bytes()).sum();
        let values: u64 = self.values.iter().map(|c| c.size_in_bytes()).sum();
        mem::size_of::<Self>() as u64 + attributes + values
    }
}

type ChunkSlot = OnceLock<RwLock<Option<ChunkSet>>>;

/// Append-only rows of `attribute_count` integers and `value_count` doubles,
/// stored column-wise in chunks of `chunk_size` rows.
///
/// All methods take `&self`; appends, truncation and chunk release must come
/// from one writer at a time. A chunk may be dropped (see
/// [`ColumnarTable::drop_chunk`]); its rows then read as absent.
pub struct ColumnarTable {
    format: TableFormat,
    allocator: Arc<dyn ChunkAllocator>,
    chunks: Segments<ChunkSlot>,
    chunk_count: AtomicUsize,
    size: AtomicUsize,
}

impl ColumnarTable {
    #[must_use]
    pub fn new(format: TableFormat, allocator: Arc<dyn ChunkAllocator>) -> Self {
        Self {
            format,
            allocator,
            chunks: Segments::new(),
            chunk_count: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn format(&self) -> &TableFormat {
        &self.format
    }

    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn ChunkAllocator> {
        &self.allocator
    }

    /// Number of rows appended so far.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Number of chunks allocated, dropped ones included.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chunk_count() << self.format.chunk_order()
    }

    /// Grows the table so it can hold `capacity` rows; returns the capacity.
    pub fn ensure_capacity(&self, capacity: usize) -> StoreResult<usize> {
        if capacity > MAX_ROWS {
            return Err(StoreError::CapacityOverflow { requested: capacity });
        }
        let current = self.chunk_count();
        let target = self.format.chunks_for(capacity);
        if target > current {
            trace!(from = current, to = target, "allocating table chunks");
            for chunk in current..target {
                let slot = self
                    .chunks
                    .get_or_create(chunk, OnceLock::new)
                    .ok_or(StoreError::CapacityOverflow { requested: capacity })?;
                slot.get_or_init(|| {
                    RwLock::new(Some(ChunkSet::allocate(&self.format, self.allocator.as_ref())))
                });
            }
            self.chunk_count.store(target, Ordering::Release);
        }
        Ok(self.capacity())
    }

    /// Appends `record` and returns its row.
    pub fn append(&self, record: &Record) -> StoreResult<usize> {
        self.check_shape(record)?;
        let row = self.size();
        self.ensure_capacity(row + 1)?;
        let (chunk, offset) = self.format.locate(row);
        if let Some(chunk) = self.chunk(chunk) {
            chunk.write(offset, record);
        }
        self.size.store(row + 1, Ordering::Release);
        Ok(row)
    }

    /// Checks that `record` has the table's shape.
    pub fn check_shape(&self, record: &Record) -> StoreResult<()> {
        self.format.check_record(record)
    }

    /// Forgets every row `>= new_size`.
    ///
    /// Chunks stay allocated for the rows appended next; the forgotten cells
    /// are reset to their initial contents.
    pub fn truncate(&self, new_size: usize) {
        let size = self.size();
        if new_size >= size {
            return;
        }
        self.size.store(new_size, Ordering::Release);
        let chunk_size = self.format.chunk_size();
        let mut row = new_size;
        while row < size {
            let (chunk, offset) = self.format.locate(row);
            let end = (offset + size - row).min(chunk_size);
            if let Some(chunk) = self.chunk(chunk) {
                chunk.reset(offset..end);
            }
            row += end - offset;
        }
    }

    /// Releases the storage of a chunk.
    pub fn drop_chunk(&self, chunk: usize) {
        if let Some(slot) = self.chunks.get(chunk).and_then(OnceLock::get) {
            let released = slot.write().take();
            drop(released);
        }
    }

    #[must_use]
    pub fn has_chunk(&self, chunk: usize) -> bool {
        self.chunk(chunk).is_some()
    }

    fn chunk(&self, chunk: usize) -> Option<MappedRwLockReadGuard<'_, ChunkSet>> {
        let slot = self.chunks.get(chunk)?.get()?;
        RwLockReadGuard::try_map(slot.read(), Option::as_ref).ok()
    }

    fn chunk_of(&self, row: usize) -> Option<(MappedRwLockReadGuard<'_, ChunkSet>, usize)> {
        if row >= self.size() {
            return None;
        }
        let (chunk, offset) = self.format.locate(row);
        self.chunk(chunk).map(|chunk| (chunk, offset))
    }

    #[must_use]
    pub fn read_int(&self, row: usize, column: usize) -> Option<i32> {
        let (chunk, offset) = self.chunk_of(row)?;
        chunk.attributes.get(column).map(|c| c.read(offset))
    }

    #[must_use]
    pub fn read_double(&self, row: usize, column: usize) -> Option<f64> {
        let (chunk, offset) = self.chunk_of(row)?;
        chunk.values.get(column).map(|c| c.read(offset))
    }

    /// Reads `buf.len()` attributes of `column` starting at `row`.
    ///
    /// The read must stay within one chunk. Slots past the end of the table,
    /// or in a dropped chunk, read as [`EMPTY_INT`].
    pub fn read_ints(&self, row: usize, column: usize, buf: &mut [i32]) {
        let (chunk, offset) = self.format.locate(row);
        debug_assert!(
            offset + buf.len() <= self.format.chunk_size(),
            "read_ints crosses a chunk boundary"
        );
        let available = self.size().saturating_sub(row).min(buf.len());
        let Some(chunk) = self.chunk(chunk) else {
            buf.fill(EMPTY_INT);
            return;
        };
        match chunk.attributes.get(column) {
            Some(source) => {
                source.read_into(offset, &mut buf[..available]);
                buf[available..].fill(EMPTY_INT);
            }
            None => buf.fill(EMPTY_INT),
        }
    }

    #[must_use]
    pub fn get_record(&self, row: usize) -> Option<Record> {
        let (chunk, offset) = self.chunk_of(row)?;
        Some(chunk.record(offset))
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let chunks: u64 = self
            .chunks
            .iter()
            .filter_map(OnceLock::get)
            .filter_map(|slot| slot.read().as_ref().map(ChunkSet::size_in_bytes))
            .sum();
        mem::size_of::<Self>() as u64 + self.chunks.size_in_bytes() + chunks
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::chunk::HeapAllocator;

    fn table(chunk_size: usize) -> ColumnarTable {
        ColumnarTable::new(TableFormat::new(2, 1, chunk_size).unwrap(), Arc::new(HeapAllocator))
    }

    #[test]
    fn test_append_and_read() {
        let table = table(4);
        for i in 0..6 {
            let row = table.append(&Record::new([i, i * 10], [f64::from(i)])).unwrap();
            assert_eq!(row, i as usize);
        }
        assert_eq!(table.size(), 6);
        assert_eq!(table.chunk_count(), 2);
        assert_eq!(table.read_int(5, 1), Some(50));
        assert_eq!(table.read_double(2, 0), Some(2.0));
        assert_eq!(table.read_int(6, 0), None);
        assert_eq!(table.get_record(3), Some(Record::new([3, 30], [3.0])));
    }

    #[test]
    fn test_read_ints_pads_past_end() {
        let table = table(8);
        for i in 0..3 {
            table.append(&Record::new([i, 0], [0.0])).unwrap();
        }
        let mut buf = [0; 8];
        table.read_ints(0, 0, &mut buf);
        assert_eq!(buf, [0, 1, 2, -1, -1, -1, -1, -1]);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let table = table(4);
        let err = table.append(&Record::new([1], [0.0])).unwrap_err();
        assert!(matches!(err, StoreError::RecordShape { attributes: 1, .. }));
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_truncate_resets_cells_and_keeps_chunks() {
        let table = table(4);
        for i in 0..9 {
            table.append(&Record::new([i, 0], [1.5])).unwrap();
        }
        table.truncate(3);
        assert_eq!(table.size(), 3);
        assert_eq!(table.chunk_count(), 3);
        assert_eq!(table.read_int(4, 0), None);
        {
            let chunk = table.chunk(1).unwrap();
            assert_eq!(chunk.attributes[0].read(2), EMPTY_INT);
            assert_eq!(chunk.values[0].read(0), 0.0);
        }
        assert_eq!(table.chunk(0).unwrap().attributes[0].read(3), EMPTY_INT);
        assert_eq!(table.append(&Record::new([42, 0], [0.0])).unwrap(), 3);
        assert_eq!(table.read_int(3, 0), Some(42));
        assert_eq!(table.read_int(2, 0), Some(2));
    }

    #[test]
    fn test_dropped_chunk_reads_as_absent() {
        let table = table(4);
        for i in 0..8 {
            table.append(&Record::new([i, 0], [0.0])).unwrap();
        }
        let before = table.size_in_bytes();
        table.drop_chunk(0);
        assert!(!table.has_chunk(0));
        assert!(table.has_chunk(1));
        assert_eq!(table.read_int(1, 0), None);
        assert_eq!(table.read_int(5, 0), Some(5));
        assert!(table.size_in_bytes() < before);
    }

    #[test]
    fn test_capacity_overflow() {
        let table = table(4);
        assert!(matches!(
            table.ensure_capacity(MAX_ROWS + 1),
            Err(StoreError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn test_readers_run_alongside_appends() {
        let table = table(16);
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2_000 {
                    table.append(&Record::new([i, i + 1], [f64::from(i)])).unwrap();
                }
                done.store(true, Ordering::Release);
            });
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let size = table.size();
                    if let Some(last) = size.checked_sub(1) {
                        let key = last as i32;
                        let expected = Record::new([key, key + 1], [f64::from(key)]);
                        assert_eq!(table.get_record(last), Some(expected));
                    }
                }
            });
        });
        assert_eq!(table.size(), 2_000);
    }
}
