//! Append-only bitmap index over a fixed number of levels.

use std::{
    mem,
    sync::atomic::{AtomicUsize, Ordering},
};

use tracing::trace;

use super::{ANY, LevelBitmapIndex, check_pattern_length, check_point, is_any};
use crate::{Bitmap, StoreError, StoreResult};

/// One [`LevelBitmapIndex`] per indexed field plus the number of rows
/// appended.
pub struct BitmapIndex {
    levels: Box<[LevelBitmapIndex]>,
    size: AtomicUsize,
}

impl BitmapIndex {
    #[must_use]
    pub fn new(level_count: usize) -> Self {
        Self {
            levels: (0..level_count).map(|_| LevelBitmapIndex::new()).collect(),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn level(&self, level: usize) -> Option<&LevelBitmapIndex> {
        self.levels.get(level)
    }

    /// Rows appended so far.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Appends `point` as the next row and returns the new size.
    pub fn append(&self, point: &[i32]) -> StoreResult<usize> {
        check_pattern_length(self.levels.len(), point.len())?;
        check_point(point)?;
        let row = self.size();
        for (level, &value) in self.levels.iter().zip(point) {
            let slot = value as usize;
            let bitmap = level
                .get_or_create(slot)
                .ok_or(StoreError::CapacityOverflow { requested: slot + 1 })?;
            bitmap.write().set(row);
        }
        self.size.store(row + 1, Ordering::Release);
        Ok(row + 1)
    }

    /// Forgets every row `>= len`.
    pub fn truncate(&self, len: usize) {
        if len >= self.size() {
            return;
        }
        trace!(from = self.size(), to = len, "truncating bitmap index");
        for level in &self.levels {
            level.truncate(len);
        }
        self.size.store(len, Ordering::Release);
    }

    /// Matches an exact pattern among the first `limit` rows.
    ///
    /// Predicates are intersected into a single scratch bitmap sized for
    /// `limit` rows, which becomes the answer.
    pub fn match_pattern(&self, pattern: &[i32], limit: usize) -> StoreResult<Bitmap> {
        check_pattern_length(self.levels.len(), pattern.len())?;

        let mut scratch: Option<Bitmap> = None;
        for (level, &value) in self.levels.iter().zip(pattern) {
            if value == ANY {
                continue;
            }
            let Some(bitmap) = level.bitmap(value) else {
                return Ok(Bitmap::new());
            };
            let bitmap = bitmap.read();
            match scratch.as_mut() {
                Some(rows) => rows.and_into(&bitmap),
                None => {
                    let mut rows = Bitmap::with_capacity(limit);
                    rows.assign_prefix(&bitmap, limit);
                    scratch = Some(rows);
                }
            }
        }
        Ok(scratch.unwrap_or_else(|| Bitmap::ones(limit)))
    }

    /// Matches a composite pattern among the first `limit` rows.
    ///
    /// Each constrained level is unioned into one reused scratch bitmap and
    /// then intersected into the answer.
    pub fn match_composite(&self, pattern: &[Vec<i32>], limit: usize) -> StoreResult<Bitmap> {
        check_pattern_length(self.levels.len(), pattern.len())?;

        let mut result: Option<Bitmap> = None;
        let mut scratch = Bitmap::with_capacity(limit);
        for (level, values) in self.levels.iter().zip(pattern) {
            if is_any(values) {
                continue;
            }
            scratch.clear_all();
            let mut found = false;
            for bitmap in values.iter().filter_map(|&value| level.bitmap(value)) {
                scratch.or_into(&bitmap.read());
                found = true;
            }
            if !found {
                return Ok(Bitmap::new());
            }
            match result.as_mut() {
                Some(rows) => rows.and_into(&scratch),
                None => {
                    let mut rows = Bitmap::with_capacity(limit);
                    rows.assign_prefix(&scratch, limit);
                    result = Some(rows);
                }
            }
        }
        Ok(result.unwrap_or_else(|| Bitmap::ones(limit)))
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let levels: u64 = self.levels.iter().map(LevelBitmapIndex::size_in_bytes).sum();
        mem::size_of::<Self>() as u64 + levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RowSet, StoreError};

    const EUR: i32 = 0;
    const USD: i32 = 1;
    const PORTFOLIO_A: i32 = 0;
    const PORTFOLIO_B: i32 = 1;
    const DATE_1: i32 = 0;
    const DATE_2: i32 = 1;

    fn index() -> BitmapIndex {
        let index = BitmapIndex::new(3);
        index.append(&[EUR, PORTFOLIO_A, DATE_1]).unwrap();
        index.append(&[EUR, PORTFOLIO_B, DATE_2]).unwrap();
        index.append(&[USD, PORTFOLIO_A, DATE_1]).unwrap();
        index.append(&[USD, PORTFOLIO_B, DATE_1]).unwrap();
        index
    }

    #[test]
    fn test_match_pattern() {
        let index = index();
        let all = index.size();
        let in_portfolio = index.match_pattern(&[ANY, PORTFOLIO_A, ANY], all).unwrap();
        assert_eq!(in_portfolio.to_vec(), vec![0, 2]);
        assert_eq!(index.match_pattern(&[USD, ANY, DATE_1], all).unwrap().to_vec(), vec![2, 3]);
        assert_eq!(index.match_pattern(&[ANY, ANY, ANY], all).unwrap().to_vec(), vec![0, 1, 2, 3]);
        assert!(index.match_pattern(&[7, ANY, ANY], all).unwrap().is_empty());
    }

    #[test]
    fn test_match_respects_limit() {
        let index = index();
        assert_eq!(index.match_pattern(&[USD, ANY, ANY], 3).unwrap().to_vec(), vec![2]);
        assert_eq!(index.match_pattern(&[ANY, ANY, ANY], 2).unwrap().to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_match_composite() {
        let index = index();
        let all = index.size();
        let rows = index
            .match_composite(&[vec![EUR, USD], vec![PORTFOLIO_B], vec![ANY]], all)
            .unwrap();
        assert_eq!(rows.to_vec(), vec![1, 3]);

        let rows = index.match_composite(&[vec![ANY], vec![ANY], vec![ANY]], all).unwrap();
        assert_eq!(rows.cardinality(), 4);

        let rows = index.match_composite(&[vec![9, 10], vec![ANY], vec![ANY]], all).unwrap();
        assert!(rows.is_empty());

        let rows = index.match_composite(&[vec![EUR, 9], vec![ANY], vec![DATE_1]], all).unwrap();
        assert_eq!(rows.to_vec(), vec![0]);
    }

    #[test]
    fn test_match_stays_within_limit() {
        let index = BitmapIndex::new(1);
        for row in 0..300 {
            index.append(&[row % 2]).unwrap();
        }
        let rows = index.match_pattern(&[1], 70).unwrap();
        assert_eq!(rows.cardinality(), 35);
        assert_eq!(rows.rows().last(), Some(69));

        let rows = index.match_composite(&[vec![0, 1]], 5).unwrap();
        assert_eq!(rows.to_vec(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_truncate_and_reappend() {
        let index = index();
        index.truncate(2);
        assert_eq!(index.size(), 2);
        assert!(index.match_pattern(&[USD, ANY, ANY], 10).unwrap().is_empty());
        assert_eq!(index.append(&[USD, PORTFOLIO_A, DATE_2]).unwrap(), 3);
        assert_eq!(index.match_pattern(&[USD, ANY, ANY], 10).unwrap().to_vec(), vec![2]);
    }

    #[test]
    fn test_rejects_bad_points() {
        let index = BitmapIndex::new(2);
        assert_eq!(
            index.append(&[1]),
            Err(StoreError::PatternLength { expected: 2, actual: 1 })
        );
        assert_eq!(
            index.append(&[1, -4]),
            Err(StoreError::NegativeValue { level: 1, value: -4 })
        );
        assert_eq!(index.size(), 0);
    }
}
