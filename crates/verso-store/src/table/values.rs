//! Values of a set of rows gathered into one double chunk.

use std::fmt;

use crate::{
    StoreResult,
    chunk::{ChunkAllocator, DoubleChunk},
};

/// One value column of some rows, copied out of the table.
///
/// The copy is private to its owner: scaling or translating it never touches
/// the table.
pub struct ValueColumn {
    chunk: Box<dyn DoubleChunk>,
    len: usize,
}

impl ValueColumn {
    /// Copies `values` into a chunk from `allocator`.
    #[must_use]
    pub fn gather(allocator: &dyn ChunkAllocator, values: &[f64]) -> Self {
        let chunk = allocator.allocate_doubles(values.len());
        for (index, &value) in values.iter().enumerate() {
            chunk.write(index, value);
        }
        Self {
            chunk,
            len: values.len(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&self, factor: f64) {
        self.chunk.scale(0..self.len, factor);
    }

    /// Adds `delta` to every value.
    pub fn translate(&self, delta: f64) {
        self.chunk.translate(0..self.len, delta);
    }

    /// Nearest-rank quantile, with `rank` in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// [`StoreError::RankOutOfRange`](crate::StoreError::RankOutOfRange) for
    /// a bad rank and [`StoreError::EmptyRange`](crate::StoreError::EmptyRange)
    /// when the column holds no value.
    pub fn quantile(&self, rank: f64) -> StoreResult<f64> {
        self.chunk.quantile(0..self.len, rank)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = vec![0.0; self.len];
        self.chunk.read_into(0, &mut values);
        values
    }
}

impl fmt::Debug for ValueColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}
