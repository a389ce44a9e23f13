//! Fixed-capacity column chunks and the allocator producing them.
//!
//! The table never touches raw memory: it asks a [`ChunkAllocator`] for
//! chunks and talks to them through [`Chunk`]. [`HeapAllocator`] backs chunks
//! with boxed slices of atomic cells, so a chunk can be read by snapshots
//! while the writer fills its free slots.

use std::{
    fmt, mem,
    ops::Range,
    sync::atomic::{AtomicI32, AtomicU64, Ordering},
};

use crate::{StoreError, StoreResult};

/// Value written in freshly allocated integer chunks.
pub const EMPTY_INT: i32 = -1;

/// A fixed-capacity chunk of `T`.
///
/// Writes take `&self`. Only the single writer writes, and only to slots no
/// published version can see yet.
pub trait Chunk<T: Copy>: Send + Sync {
    fn capacity(&self) -> usize;

    fn read(&self, index: usize) -> T;

    fn write(&self, index: usize, value: T);

    /// Writes `value` to every slot in `range`.
    fn fill(&self, range: Range<usize>, value: T);

    /// Reads `buf.len()` slots starting at `start`.
    fn read_into(&self, start: usize, buf: &mut [T]);

    fn size_in_bytes(&self) -> u64;
}

/// A chunk of `f64` with arithmetic helpers.
pub trait DoubleChunk: Chunk<f64> {
    /// Multiplies every slot in `range` by `factor`.
    fn scale(&self, range: Range<usize>, factor: f64);

    /// Adds `delta` to every slot in `range`.
    fn translate(&self, range: Range<usize>, delta: f64);

    /// Nearest-rank quantile of the slots in `range`, with `rank` in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// [`StoreError::RankOutOfRange`] for a rank outside `(0, 1]` and
    /// [`StoreError::EmptyRange`] when `range` holds no slot.
    fn quantile(&self, range: Range<usize>, rank: f64) -> StoreResult<f64>;
}

/// Produces chunks of a given capacity.
pub trait ChunkAllocator: Send + Sync + fmt::Debug {
    fn allocate_ints(&self, capacity: usize) -> Box<dyn Chunk<i32>>;

    fn allocate_doubles(&self, capacity: usize) -> Box<dyn DoubleChunk>;
}

/// Allocates chunks on the heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl ChunkAllocator for HeapAllocator {
    fn allocate_ints(&self, capacity: usize) -> Box<dyn Chunk<i32>> {
        Box::new(HeapChunk::<AtomicI32>::filled(capacity, EMPTY_INT))
    }

    fn allocate_doubles(&self, capacity: usize) -> Box<dyn DoubleChunk> {
        Box::new(HeapChunk::<AtomicF64>::filled(capacity, 0.0))
    }
}

/// One atomically accessed slot of a [`HeapChunk`].
pub trait ChunkCell: Send + Sync {
    type Value: Copy;

    fn new(value: Self::Value) -> Self;

    fn load(&self) -> Self::Value;

    fn store(&self, value: Self::Value);
}

impl ChunkCell for AtomicI32 {
    type Value = i32;

    #[inline]
    fn new(value: i32) -> Self {
        AtomicI32::new(value)
    }

    #[inline]
    fn load(&self) -> i32 {
        AtomicI32::load(self, Ordering::Acquire)
    }

    #[inline]
    fn store(&self, value: i32) {
        AtomicI32::store(self, value, Ordering::Release);
    }
}

/// An `f64` stored as its bit pattern.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl ChunkCell for AtomicF64 {
    type Value = f64;

    #[inline]
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// A chunk backed by a boxed slice of cells.
pub struct HeapChunk<C> {
    data: Box<[C]>,
}

impl<C: ChunkCell> HeapChunk<C> {
    #[must_use]
    pub fn filled(capacity: usize, value: C::Value) -> Self {
        Self {
            data: (0..capacity).map(|_| C::new(value)).collect(),
        }
    }

    fn update(&self, range: Range<usize>, f: impl Fn(C::Value) -> C::Value) {
        for cell in &self.data[range] {
            cell.store(f(cell.load()));
        }
    }
}

impl<C: ChunkCell> Chunk<C::Value> for HeapChunk<C> {
    #[inline]
    fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn read(&self, index: usize) -> C::Value {
        self.data[index].load()
    }

    #[inline]
    fn write(&self, index: usize, value: C::Value) {
        self.data[index].store(value);
    }

    fn fill(&self, range: Range<usize>, value: C::Value) {
        for cell in &self.data[range] {
            cell.store(value);
        }
    }

    fn read_into(&self, start: usize, buf: &mut [C::Value]) {
        let len = buf.len();
        for (slot, cell) in buf.iter_mut().zip(&self.data[start..start + len]) {
            *slot = cell.load();
        }
    }

    fn size_in_bytes(&self) -> u64 {
        (mem::size_of::<Self>() + self.data.len() * mem::size_of::<C>()) as u64
    }
}

impl DoubleChunk for HeapChunk<AtomicF64> {
    fn scale(&self, range: Range<usize>, factor: f64) {
        self.update(range, |value| value * factor);
    }

    fn translate(&self, range: Range<usize>, delta: f64) {
        self.update(range, |value| value + delta);
    }

    fn quantile(&self, range: Range<usize>, rank: f64) -> StoreResult<f64> {
        if !(rank > 0.0 && rank <= 1.0) {
            return Err(StoreError::RankOutOfRange(rank));
        }
        if range.is_empty() {
            return Err(StoreError::EmptyRange {
                start: range.start,
                end: range.end,
            });
        }
        let mut sorted = vec![0.0; range.len()];
        self.read_into(range.start, &mut sorted);
        sorted.sort_by(f64::total_cmp);
        let position = (rank * sorted.len() as f64).ceil() as usize;
        Ok(sorted[position.clamp(1, sorted.len()) - 1])
    }
}

impl<C: ChunkCell> fmt::Debug for HeapChunk<C>
where
    C::Value: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.iter().map(ChunkCell::load)).finish()
    }
}
