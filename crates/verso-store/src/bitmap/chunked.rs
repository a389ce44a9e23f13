//! A bitmap split into fixed-size chunks, some of which may be absent.

use std::{fmt, mem};

use super::{Bitmap, RowSet};

/// Rows grouped by chunk; chunk `i` holds rows `i * chunk_size ..`, stored
/// relative to the chunk start. An absent chunk holds no rows.
#[derive(Clone)]
pub struct ChunkedBitmap {
    chunks: Vec<Option<Bitmap>>,
    chunk_order: u32,
}

impl ChunkedBitmap {
    /// `chunk_size` must be a power of two.
    #[must_use]
    pub fn new(chunks: Vec<Option<Bitmap>>, chunk_size: usize) -> Self {
        debug_assert!(chunk_size.is_power_of_two());
        Self {
            chunks,
            chunk_order: chunk_size.trailing_zeros(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        1 << self.chunk_order
    }

    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<&Bitmap> {
        self.chunks.get(index).and_then(Option::as_ref)
    }

    fn locate(&self, row: usize) -> (usize, usize) {
        (row >> self.chunk_order, row & (self.chunk_size() - 1))
    }

    #[must_use]
    pub fn get(&self, row: usize) -> bool {
        let (chunk, offset) = self.locate(row);
        self.chunk(chunk).is_some_and(|bitmap| bitmap.get(offset))
    }

    pub fn set(&mut self, row: usize) {
        let (chunk, offset) = self.locate(row);
        if chunk >= self.chunks.len() {
            self.chunks.resize(chunk + 1, None);
        }
        self.chunks[chunk].get_or_insert_with(Bitmap::new).set(offset);
    }

    pub fn clear(&mut self, row: usize) {
        let (chunk, offset) = self.locate(row);
        if let Some(Some(bitmap)) = self.chunks.get_mut(chunk) {
            bitmap.clear(offset);
        }
    }

    /// Removes every row `>= len`.
    pub fn truncate(&mut self, len: usize) {
        let (chunk, offset) = self.locate(len);
        let keep = if offset == 0 { chunk } else { chunk + 1 };
        self.chunks.truncate(keep);
        if offset != 0 {
            if let Some(Some(bitmap)) = self.chunks.get_mut(chunk) {
                bitmap.truncate(offset);
            }
        }
    }

    /// In-place intersection; chunks absent on either side become absent.
    pub fn and_into(&mut self, other: &Self) {
        debug_assert_eq!(self.chunk_order, other.chunk_order);
        self.chunks.truncate(other.chunks.len());
        for (mine, theirs) in self.chunks.iter_mut().zip(&other.chunks) {
            if let (Some(bitmap), Some(rhs)) = (mine.as_mut(), theirs) {
                bitmap.and_into(rhs);
            } else {
                *mine = None;
            }
        }
    }

    /// In-place union.
    pub fn or_into(&mut self, other: &Self) {
        debug_assert_eq!(self.chunk_order, other.chunk_order);
        if self.chunks.len() < other.chunks.len() {
            self.chunks.resize(other.chunks.len(), None);
        }
        for (mine, theirs) in self.chunks.iter_mut().zip(&other.chunks) {
            if let Some(rhs) = theirs {
                match mine {
                    Some(bitmap) => bitmap.or_into(rhs),
                    None => *mine = Some(rhs.clone()),
                }
            }
        }
    }

    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.and_into(other);
        result
    }

    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.or_into(other);
        result
    }

    /// Flattens into a dense bitmap of absolute rows.
    #[must_use]
    pub fn to_bitmap(&self) -> Bitmap {
        self.rows().collect()
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let chunks: u64 = self.chunks.iter().flatten().map(Bitmap::size_in_bytes).sum();
        let slots = self.chunks.capacity() * mem::size_of::<Option<Bitmap>>();
        (mem::size_of::<Self>() + slots) as u64 + chunks
    }
}

impl RowSet for ChunkedBitmap {
    fn contains(&self, row: usize) -> bool {
        self.get(row)
    }

    fn cardinality(&self) -> usize {
        self.chunks.iter().flatten().map(RowSet::cardinality).sum()
    }

    fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        let order = self.chunk_order;
        self.chunks.iter().enumerate().flat_map(move |(index, chunk)| {
            chunk
                .iter()
                .flat_map(move |bitmap| bitmap.iter().map(move |row| (index << order) + row))
        })
    }

    fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let order = self.chunk_order;
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            if let Some(bitmap) = chunk {
                bitmap.retain(|row| keep((index << order) + row));
            }
        }
    }
}

impl PartialEq for ChunkedBitmap {
    fn eq(&self, other: &Self) -> bool {
        self.rows().eq(other.rows())
    }
}

impl fmt::Debug for ChunkedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.rows()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(rows: &[usize]) -> ChunkedBitmap {
        let mut bitmap = ChunkedBitmap::new(Vec::new(), 16);
        for &row in rows {
            bitmap.set(row);
        }
        bitmap
    }

    #[test]
    fn test_rows_carry_chunk_offsets() {
        let bitmap = chunked(&[1, 17, 40]);
        assert_eq!(bitmap.chunk_count(), 3);
        assert_eq!(bitmap.rows().collect::<Vec<_>>(), vec![1, 17, 40]);
        assert!(bitmap.get(17));
        assert!(!bitmap.get(16));
        assert_eq!(bitmap.to_bitmap().to_vec(), vec![1, 17, 40]);
    }

    #[test]
    fn test_absent_chunks_are_empty() {
        let bitmap = ChunkedBitmap::new(vec![None, Some(Bitmap::ones(2))], 16);
        assert_eq!(bitmap.rows().collect::<Vec<_>>(), vec![16, 17]);
        assert_eq!(bitmap.cardinality(), 2);
    }

    #[test]
    fn test_and_or_truncate() {
        let a = chunked(&[1, 17, 40]);
        let b = chunked(&[17, 40, 50]);
        assert_eq!(a.and(&b), chunked(&[17, 40]));
        assert_eq!(a.or(&b), chunked(&[1, 17, 40, 50]));

        let mut c = a.or(&b);
        c.truncate(41);
        assert_eq!(c, chunked(&[1, 17, 40]));
        c.truncate(32);
        assert_eq!(c.chunk_count(), 2);
    }

    #[test]
    fn test_retain_uses_absolute_rows() {
        let mut bitmap = chunked(&[1, 17, 40]);
        bitmap.retain(|row| row > 16);
        assert_eq!(bitmap.rows().collect::<Vec<_>>(), vec![17, 40]);
    }
}
