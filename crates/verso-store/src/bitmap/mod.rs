//! Row bitmaps returned by queries.
//!
//! Bits are stored little-endian within each `u64` word: bit 0 is the LSB of
//! word 0. A [`Bitmap`] grows on demand; unset trailing words are equivalent
//! to absent ones, so equality ignores them.

mod chunked;

use std::{fmt, mem};

pub use chunked::ChunkedBitmap;

const WORD_BITS: usize = 64;

/// A set of rows, as returned by secondary indexes and filtered by tables.
pub trait RowSet: Clone + Send {
    fn contains(&self, row: usize) -> bool;

    /// Number of rows in the set.
    fn cardinality(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.cardinality() == 0
    }

    /// Rows in increasing order.
    fn rows(&self) -> impl Iterator<Item = usize> + '_;

    /// Keeps only the rows for which `keep` returns true.
    fn retain(&mut self, keep: impl FnMut(usize) -> bool);
}

/// A dense, growable bitmap over row numbers.
#[derive(Clone, Default)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// An empty bitmap with room for `bits` rows.
    #[must_use]
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(WORD_BITS)),
        }
    }

    /// Rows `0..len`.
    #[must_use]
    pub fn ones(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(WORD_BITS)];
        let rem = len % WORD_BITS;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << rem) - 1;
            }
        }
        Self { words }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: usize) -> bool {
        self.words
            .get(row / WORD_BITS)
            .is_some_and(|word| (word >> (row % WORD_BITS)) & 1 == 1)
    }

    #[inline]
    pub fn set(&mut self, row: usize) {
        let word = row / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (row % WORD_BITS);
    }

    #[inline]
    pub fn clear(&mut self, row: usize) {
        if let Some(word) = self.words.get_mut(row / WORD_BITS) {
            *word &= !(1u64 << (row % WORD_BITS));
        }
    }

    /// Removes every row.
    pub fn clear_all(&mut self) {
        self.words.clear();
    }

    /// Removes every row `>= len`.
    pub fn truncate(&mut self, len: usize) {
        let words = len.div_ceil(WORD_BITS);
        self.words.truncate(words);
        let rem = len % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.get_mut(words - 1) {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    /// Replaces the contents with the rows of `other` below `len`, keeping
    /// this bitmap's allocation.
    pub fn assign_prefix(&mut self, other: &Self, len: usize) {
        let words = len.div_ceil(WORD_BITS).min(other.words.len());
        self.words.clear();
        self.words.extend_from_slice(&other.words[..words]);
        self.truncate(len);
    }

    /// `self ∩ other`.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.and_into(other);
        result
    }

    /// `self ∪ other`.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.or_into(other);
        result
    }

    /// In-place intersection.
    pub fn and_into(&mut self, other: &Self) {
        self.words.truncate(other.words.len());
        for (word, &rhs) in self.words.iter_mut().zip(&other.words) {
            *word &= rhs;
        }
    }

    /// In-place union.
    pub fn or_into(&mut self, other: &Self) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, &rhs) in self.words.iter_mut().zip(&other.words) {
            *word |= rhs;
        }
    }

    /// Iterates set rows in increasing order.
    pub fn iter(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        (mem::size_of::<Self>() + self.words.capacity() * mem::size_of::<u64>()) as u64
    }

    fn significant_words(&self) -> &[u64] {
        let len = self.words.iter().rposition(|&word| word != 0).map_or(0, |i| i + 1);
        &self.words[..len]
    }
}

impl RowSet for Bitmap {
    fn contains(&self, row: usize) -> bool {
        self.get(row)
    }

    fn cardinality(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter()
    }

    fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        for (index, word) in self.words.iter_mut().enumerate() {
            let mut bits = *word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                if !keep(index * WORD_BITS + bit) {
                    *word &= !(1u64 << bit);
                }
            }
        }
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for Bitmap {}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for Bitmap {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bitmap = Self::new();
        for row in iter {
            bitmap.set(row);
        }
        bitmap
    }
}

impl<'a> IntoIterator for &'a Bitmap {
    type Item = usize;
    type IntoIter = Ones<'a>;

    fn into_iter(self) -> Ones<'a> {
        self.iter()
    }
}

/// Iterator over the set rows of a [`Bitmap`].
pub struct Ones<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.index * WORD_BITS + bit);
            }
            self.index += 1;
            self.current = *self.words.get(self.index)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let mut bitmap = Bitmap::new();
        bitmap.set(3);
        bitmap.set(130);
        assert!(bitmap.get(3));
        assert!(bitmap.get(130));
        assert!(!bitmap.get(4));
        assert!(!bitmap.get(10_000));
        bitmap.clear(3);
        assert_eq!(bitmap.to_vec(), vec![130]);
    }

    #[test]
    fn test_ones_and_truncate() {
        let ones = Bitmap::ones(70);
        assert_eq!(ones.cardinality(), 70);
        assert!(ones.get(69));
        assert!(!ones.get(70));

        let mut bitmap = Bitmap::ones(200);
        bitmap.truncate(65);
        assert_eq!(bitmap, Bitmap::ones(65));
        bitmap.truncate(0);
        assert!(RowSet::is_empty(&bitmap));
    }

    #[test]
    fn test_and_or() {
        let a: Bitmap = [1, 5, 64, 200].into_iter().collect();
        let b: Bitmap = [5, 64, 300].into_iter().collect();
        assert_eq!(a.and(&b).to_vec(), vec![5, 64]);
        assert_eq!(a.or(&b).to_vec(), vec![1, 5, 64, 200, 300]);

        let mut c = a.clone();
        c.and_into(&Bitmap::new());
        assert!(RowSet::is_empty(&c));
    }

    #[test]
    fn test_assign_prefix_reuses_allocation() {
        let source: Bitmap = [1, 63, 64, 130].into_iter().collect();
        let mut scratch = Bitmap::with_capacity(256);
        let words = scratch.words.capacity();
        scratch.assign_prefix(&source, 64);
        assert_eq!(scratch.to_vec(), vec![1, 63]);
        scratch.assign_prefix(&source, 1_000);
        assert_eq!(scratch.to_vec(), vec![1, 63, 64, 130]);
        assert_eq!(scratch.words.capacity(), words);
    }

    #[test]
    fn test_equality_ignores_trailing_zero_words() {
        let mut a = Bitmap::new();
        a.set(500);
        a.clear(500);
        a.set(2);
        let b: Bitmap = [2].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(format!("{b:?}"), "{2}");
    }

    #[test]
    fn test_retain() {
        let mut bitmap = Bitmap::ones(10);
        bitmap.retain(|row| row % 3 == 0);
        assert_eq!(bitmap.to_vec(), vec![0, 3, 6, 9]);
    }
}
