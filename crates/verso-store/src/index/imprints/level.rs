//! Imprint state of one indexed field.
//!
//! ```text
//! rows      ┃ 0 ‥ 63 ┃ 64 ‥ 127 ┃ 128 ‥ 191 ┃ 192 ‥ 255 ┃ 256 ‥ (pending)
//! vectors   ┃  0b101 ┃  0b100   ┃           ┃           ┃
//! entries   ┃ single×1 ┃ repeat×3 (vector 1 covers three lines)  ┃
//! ```
//!
//! Each full cacheline of 64 rows contributes one 64-bit imprint vector with
//! bit `b` set when some row falls in bin `b`. Runs of equal vectors share
//! one stored vector and one repeat entry; a run of distinct vectors shares
//! one counting entry. The line still filling up lives in `pending`.

use std::mem;

use super::{CACHELINE_ROWS, bins::Bins};

const COUNT_INCREMENT: u32 = 0b10;
const REPEAT: u32 = 0b1;

/// Run-length entry: `count << 1 | repeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachelineEntry(u32);

impl CachelineEntry {
    const fn single() -> Self {
        Self(COUNT_INCREMENT)
    }

    const fn repeat(count: u32) -> Self {
        Self(count * COUNT_INCREMENT | REPEAT)
    }

    /// Lines covered by a repeat entry, or vectors owned by a counting one.
    #[inline]
    pub const fn count(self) -> u32 {
        self.0 >> 1
    }

    #[inline]
    pub const fn is_repeat(self) -> bool {
        self.0 & REPEAT != 0
    }

    const fn incremented(self) -> Self {
        Self(self.0 + COUNT_INCREMENT)
    }

    const fn decremented(self) -> Self {
        Self(self.0 - COUNT_INCREMENT)
    }
}

/// Position of a level that a rollback can come back to.
#[derive(Debug, Clone, Copy)]
pub struct LevelMark {
    size: usize,
    vectors: usize,
    dictionary: usize,
    last_entry: Option<CachelineEntry>,
    pending: u64,
    max_value: i32,
    last_bin_charge: usize,
}

#[derive(Debug, Clone)]
pub struct LevelImprints {
    bins: Bins,
    max_value: i32,
    last_bin_charge: usize,
    size: usize,
    vectors: Vec<u64>,
    dictionary: Vec<CachelineEntry>,
    pending: u64,
}

impl LevelImprints {
    pub fn new() -> Self {
        Self::with_bins(Bins::identity())
    }

    pub fn with_bins(bins: Bins) -> Self {
        Self {
            bins,
            max_value: -1,
            last_bin_charge: 0,
            size: 0,
            vectors: Vec::new(),
            dictionary: Vec::new(),
            pending: 0,
        }
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub const fn max_value(&self) -> i32 {
        self.max_value
    }

    #[inline]
    pub const fn bins(&self) -> &Bins {
        &self.bins
    }

    /// Rows that landed in the overflow bin.
    #[inline]
    pub const fn last_bin_charge(&self) -> usize {
        self.last_bin_charge
    }

    #[inline]
    pub fn vectors(&self) -> &[u64] {
        &self.vectors
    }

    #[inline]
    pub fn dictionary(&self) -> &[CachelineEntry] {
        &self.dictionary
    }

    /// Whether `value` may have been indexed on this level.
    #[inline]
    pub const fn exists(&self, value: i32) -> bool {
        value >= 0 && value <= self.max_value
    }

    /// Imprint bits covering every listed value that may exist.
    pub fn mask_of(&self, values: &[i32]) -> u64 {
        values
            .iter()
            .filter(|&&value| self.exists(value))
            .fold(0, |mask, &value| mask | 1 << self.bins.bin_of(value))
    }

    /// Indexes the next row. Negative values mark a row without a value.
    pub fn push_value(&mut self, value: i32) {
        if value >= 0 {
            let bin = self.bins.bin_of(value);
            if bin == Bins::OVERFLOW {
                self.last_bin_charge += 1;
            }
            self.max_value = self.max_value.max(value);
            self.pending |= 1 << bin;
        }
        self.size += 1;
        if self.size % CACHELINE_ROWS == 0 {
            let vector = mem::take(&mut self.pending);
            self.push_vector(vector);
        }
    }

    fn push_vector(&mut self, vector: u64) {
        let last_vector = self.vectors.last().copied();
        match (last_vector, self.dictionary.last_mut()) {
            (Some(last), Some(entry)) if last == vector => {
                if entry.is_repeat() {
                    *entry = entry.incremented();
                } else if entry.count() == 1 {
                    *entry = CachelineEntry::repeat(2);
                } else {
                    // The last vector leaves the counting run to start a repeat.
                    *entry = entry.decremented();
                    self.dictionary.push(CachelineEntry::repeat(2));
                }
            }
            (_, Some(entry)) if !entry.is_repeat() => {
                *entry = entry.incremented();
                self.vectors.push(vector);
            }
            _ => {
                self.vectors.push(vector);
                self.dictionary.push(CachelineEntry::single());
            }
        }
    }

    /// Calls `visit` with the first row of every cacheline below `limit`
    /// whose imprint intersects `mask`.
    pub fn candidate_lines(&self, mask: u64, limit: usize, mut visit: impl FnMut(usize)) {
        if mask == 0 {
            return;
        }
        let mut line = 0;
        let mut vector = 0;
        for entry in &self.dictionary {
            let count = entry.count() as usize;
            if line * CACHELINE_ROWS >= limit {
                return;
            }
            if entry.is_repeat() {
                if self.vectors[vector] & mask != 0 {
                    for covered in line..line + count {
                        if covered * CACHELINE_ROWS >= limit {
                            return;
                        }
                        visit(covered * CACHELINE_ROWS);
                    }
                }
                vector += 1;
                line += count;
            } else {
                for offset in 0..count {
                    let start = (line + offset) * CACHELINE_ROWS;
                    if start >= limit {
                        return;
                    }
                    if self.vectors[vector + offset] & mask != 0 {
                        visit(start);
                    }
                }
                vector += count;
                line += count;
            }
        }
        let start = line * CACHELINE_ROWS;
        if start < limit && start < self.size && self.pending & mask != 0 {
            visit(start);
        }
    }

    pub fn mark(&self) -> LevelMark {
        LevelMark {
            size: self.size,
            vectors: self.vectors.len(),
            dictionary: self.dictionary.len(),
            last_entry: self.dictionary.last().copied(),
            pending: self.pending,
            max_value: self.max_value,
            last_bin_charge: self.last_bin_charge,
        }
    }

    /// Returns to `mark`, forgetting every row indexed since.
    pub fn reset_to(&mut self, mark: &LevelMark) {
        self.size = mark.size;
        self.vectors.truncate(mark.vectors);
        self.dictionary.truncate(mark.dictionary);
        if let (Some(entry), Some(last)) = (self.dictionary.last_mut(), mark.last_entry) {
            *entry = last;
        }
        self.pending = mark.pending;
        self.max_value = mark.max_value;
        self.last_bin_charge = mark.last_bin_charge;
    }

    pub fn size_in_bytes(&self) -> u64 {
        (mem::size_of::<Self>()
            + self.vectors.capacity() * mem::size_of::<u64>()
            + self.dictionary.capacity() * mem::size_of::<CachelineEntry>()) as u64
    }
}
