//! Column-imprints secondary index strategy.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  ColumnImprintsIndex                                                 │
//! │    levels[l]: RwLock<LevelImprints>   bins + imprint vectors + RLE   │
//! │    table:     SharedTable             raw column, read on a hit      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An imprint only says a cacheline *may* hold a value. Every hit is checked
//! against the raw column, so answers are exact.
//!
//! Appends take a level lock alone. Rebuilds replay the table before taking
//! the level lock; table reads never lock.

mod bins;
mod level;

use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use rand::{SeedableRng, rngs::StdRng, seq::index};
use tracing::debug;
use verso_mvcc::{
    Epoch, MultiVersion, MvccResult, Transaction, TransactionHandle, Version, Versioning,
};

use self::{
    bins::Bins,
    level::{LevelImprints, LevelMark},
};
use super::{
    ANY, SecondaryIndex, SecondaryIndexTransaction, SecondaryIndexVersion, check_pattern_length,
    check_point, is_any,
};
use crate::{
    Bitmap, ImprintsConfig, StoreError, StoreFormat, StoreResult,
    chunk::EMPTY_INT,
    table::{SharedTable, VersionedColumnarTable},
};

/// Rows summarized by one imprint vector.
pub const CACHELINE_ROWS: usize = 64;

type Line = [i32; CACHELINE_ROWS];

/// Reads the cacheline starting at `start`, chunk by chunk.
fn read_line(table: &VersionedColumnarTable, field: usize, start: usize, line: &mut Line) {
    let chunk_mask = table.format().chunk_mask();
    let mut offset = 0;
    while offset < CACHELINE_ROWS {
        let row = start + offset;
        let len = (chunk_mask + 1 - (row & chunk_mask)).min(CACHELINE_ROWS - offset);
        table.read_ints(row, field, &mut line[offset..offset + len]);
        offset += len;
    }
}

/// Imprints of every indexed field over the shared table.
pub struct ColumnImprintsIndex {
    table: SharedTable,
    fields: Box<[usize]>,
    levels: Box<[RwLock<LevelImprints>]>,
    size: AtomicUsize,
    config: ImprintsConfig,
}

impl ColumnImprintsIndex {
    #[must_use]
    pub fn new(table: SharedTable, fields: &[usize], config: ImprintsConfig) -> Self {
        Self {
            table,
            fields: fields.into(),
            levels: fields.iter().map(|_| RwLock::new(LevelImprints::new())).collect(),
            size: AtomicUsize::new(0),
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Bounds of the bins of `level`.
    #[must_use]
    pub fn bin_bounds(&self, level: usize) -> Option<Vec<i32>> {
        self.levels.get(level).map(|level| level.read().bins().bounds().to_vec())
    }

    /// Indexes `point` as the next row; returns the new size.
    pub fn append(&self, point: &[i32]) -> StoreResult<usize> {
        check_pattern_length(self.levels.len(), point.len())?;
        check_point(point)?;
        for (level, &value) in self.levels.iter().zip(point) {
            level.write().push_value(value);
        }
        let size = self.size.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(size)
    }

    fn marks(&self) -> Vec<LevelMark> {
        self.levels.iter().map(|level| level.read().mark()).collect()
    }

    fn reset_to(&self, size: usize, marks: &[LevelMark]) {
        if size == self.size() {
            return;
        }
        for (level, mark) in self.levels.iter().zip(marks) {
            level.write().reset_to(mark);
        }
        self.size.store(size, Ordering::Release);
    }

    /// Whether the overflow bin holds more than the tolerated share of rows.
    fn needs_rebinning(&self, level: &LevelImprints) -> bool {
        level.last_bin_charge() as f64 > level.size() as f64 * self.config.binning_tolerance
    }

    /// Rebins and rebuilds every level whose overflow bin got too full.
    pub fn rebuild(&self) {
        for (position, level) in self.levels.iter().enumerate() {
            let (size, max_value) = {
                let level = level.read();
                if !self.needs_rebinning(&level) {
                    continue;
                }
                (level.size(), level.max_value())
            };
            let field = self.fields[position];
            let bins = self.compute_bins(field, size, max_value);
            let rebuilt = self.replay(field, bins, size);
            debug!(
                level = position,
                rows = size,
                overflow = rebuilt.last_bin_charge(),
                "rebuilt imprints level"
            );
            *level.write() = rebuilt;
        }
    }

    fn compute_bins(&self, field: usize, size: usize, max_value: i32) -> Bins {
        let table = &self.table;
        if size < self.config.sample_threshold {
            let mut values = Vec::with_capacity(size);
            let mut line = [EMPTY_INT; CACHELINE_ROWS];
            for start in (0..size).step_by(CACHELINE_ROWS) {
                read_line(table, field, start, &mut line);
                let end = (size - start).min(CACHELINE_ROWS);
                values.extend(line[..end].iter().copied().filter(|&value| value >= 0));
            }
            values.sort_unstable();
            return Bins::from_values(&values, max_value);
        }

        let amount = ((size as f64 * self.config.sample_fraction) as usize).clamp(1, size);
        let mut rng = StdRng::seed_from_u64(size as u64);
        let mut sample: Vec<i32> = index::sample(&mut rng, size, amount)
            .into_iter()
            .filter_map(|row| table.read_int(row, field))
            .filter(|&value| value >= 0)
            .collect();
        sample.sort_unstable();
        debug!(field, rows = size, sampled = sample.len(), "sampled imprints bins");
        Bins::from_sample(&sample).unwrap_or_else(|| Bins::from_values(&[], max_value))
    }

    fn replay(&self, field: usize, bins: Bins, size: usize) -> LevelImprints {
        let table = &self.table;
        let mut level = LevelImprints::with_bins(bins);
        let mut line = [EMPTY_INT; CACHELINE_ROWS];
        for start in (0..size).step_by(CACHELINE_ROWS) {
            read_line(table, field, start, &mut line);
            let end = (size - start).min(CACHELINE_ROWS);
            for &value in &line[..end] {
                level.push_value(value);
            }
        }
        level
    }

    /// Rows below `limit` whose value on `position` is one of `values`, or
    /// `None` when none of the values can be present.
    fn level_rows(&self, position: usize, values: &[i32], limit: usize) -> Option<Bitmap> {
        let level = self.levels[position].read();
        let mask = level.mask_of(values);
        if mask == 0 {
            return None;
        }
        let table = &self.table;
        let field = self.fields[position];
        let mut rows = Bitmap::with_capacity(limit);
        let mut line = [EMPTY_INT; CACHELINE_ROWS];
        level.candidate_lines(mask, limit, |start| {
            read_line(table, field, start, &mut line);
            for (offset, value) in line.iter().enumerate() {
                let row = start + offset;
                if row < limit && *value >= 0 && values.contains(value) {
                    rows.set(row);
                }
            }
        });
        Some(rows)
    }

    /// Matches an exact pattern among the first `limit` rows.
    pub fn match_pattern(&self, pattern: &[i32], limit: usize) -> StoreResult<Bitmap> {
        check_pattern_length(self.levels.len(), pattern.len())?;
        if pattern
            .iter()
            .zip(self.levels.iter())
            .any(|(&value, level)| value != ANY && !level.read().exists(value))
        {
            return Ok(Bitmap::new());
        }

        let mut result: Option<Bitmap> = None;
        for (position, &value) in pattern.iter().enumerate() {
            if value == ANY {
                continue;
            }
            let Some(rows) = self.level_rows(position, &[value], limit) else {
                return Ok(Bitmap::new());
            };
            match result.as_mut() {
                Some(result) => result.and_into(&rows),
                None => result = Some(rows),
            }
        }
        Ok(result.unwrap_or_else(|| Bitmap::ones(limit)))
    }

    /// Matches a composite pattern among the first `limit` rows.
    pub fn match_composite(&self, pattern: &[Vec<i32>], limit: usize) -> StoreResult<Bitmap> {
        check_pattern_length(self.levels.len(), pattern.len())?;
        let mut result: Option<Bitmap> = None;
        for (position, values) in pattern.iter().enumerate() {
            if is_any(values) {
                continue;
            }
            let Some(rows) = self.level_rows(position, values, limit) else {
                return Ok(Bitmap::new());
            };
            match result.as_mut() {
                Some(result) => result.and_into(&rows),
                None => result = Some(rows),
            }
        }
        Ok(result.unwrap_or_else(|| Bitmap::ones(limit)))
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let levels: u64 = self.levels.iter().map(|level| level.read().size_in_bytes()).sum();
        (mem::size_of::<Self>() + self.fields.len() * mem::size_of::<usize>()) as u64 + levels
    }
}

/// Appends rows into the imprints and remembers where each level stood so
/// that rollback can come back to it. Commit rebins levels that need it.
pub struct ImprintsIndexTransaction {
    base: Arc<ColumnImprintsIndex>,
    initial_size: usize,
    marks: Vec<LevelMark>,
}

impl SecondaryIndexTransaction for ImprintsIndexTransaction {
    fn index(&mut self, point: &[i32], row: usize) -> StoreResult<()> {
        let expected = self.base.size();
        if row != expected {
            return Err(StoreError::NonSequentialRow { expected, actual: row });
        }
        self.base.append(point)?;
        Ok(())
    }
}

impl Transaction for ImprintsIndexTransaction {
    fn commit(&mut self, _epoch: &Epoch) {
        self.base.rebuild();
    }

    fn rollback(&mut self) {
        self.base.reset_to(self.initial_size, &self.marks);
    }
}

pub struct ImprintsIndexVersion {
    epoch: Epoch,
    base: Arc<ColumnImprintsIndex>,
    size: usize,
}

impl Version for ImprintsIndexVersion {
    type Transaction = ImprintsIndexTransaction;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        _next: &Arc<Self>,
        _transaction: &mut ImprintsIndexTransaction,
    ) -> MvccResult<()> {
        Ok(())
    }
}

impl SecondaryIndexVersion for ImprintsIndexVersion {
    type Rows = Bitmap;

    fn match_pattern(&self, pattern: &[i32]) -> StoreResult<Bitmap> {
        self.base.match_pattern(pattern, self.size)
    }

    fn match_composite(&self, pattern: &[Vec<i32>]) -> StoreResult<Bitmap> {
        self.base.match_composite(pattern, self.size)
    }
}

pub struct ImprintsVersioning;

impl Versioning for ImprintsVersioning {
    type Base = ColumnImprintsIndex;
    type Transaction = ImprintsIndexTransaction;
    type Version = ImprintsIndexVersion;

    fn create_transaction(
        base: &Arc<ColumnImprintsIndex>,
        _latest: &Arc<ImprintsIndexVersion>,
    ) -> ImprintsIndexTransaction {
        ImprintsIndexTransaction {
            base: Arc::clone(base),
            initial_size: base.size(),
            marks: base.marks(),
        }
    }

    fn create_version(
        base: &Arc<ColumnImprintsIndex>,
        epoch: &Epoch,
        _transaction: Option<&ImprintsIndexTransaction>,
    ) -> ImprintsIndexVersion {
        ImprintsIndexVersion {
            epoch: epoch.clone(),
            base: Arc::clone(base),
            size: base.size(),
        }
    }
}

/// Multi-version [`ColumnImprintsIndex`].
pub struct ImprintsSecondaryIndex {
    inner: MultiVersion<ImprintsVersioning>,
}

impl ImprintsSecondaryIndex {
    #[must_use]
    pub fn new(table: SharedTable, fields: &[usize], config: ImprintsConfig) -> Self {
        Self {
            inner: MultiVersion::new(ColumnImprintsIndex::new(table, fields, config)),
        }
    }

    /// Builds the index with custom rebinning thresholds.
    pub fn with_config(
        format: &StoreFormat,
        table: &SharedTable,
        config: ImprintsConfig,
    ) -> StoreResult<Self> {
        Ok(Self::new(Arc::clone(table), format.indexed_fields(), config))
    }

    #[must_use]
    pub fn base(&self) -> &ColumnImprintsIndex {
        self.inner.base()
    }
}

impl SecondaryIndex for ImprintsSecondaryIndex {
    type Rows = Bitmap;
    type Transaction = ImprintsIndexTransaction;
    type Version = ImprintsIndexVersion;

    fn build(format: &StoreFormat, table: &SharedTable) -> StoreResult<Self> {
        Self::with_config(format, table, ImprintsConfig::default())
    }

    fn transaction(&self) -> TransactionHandle<ImprintsIndexTransaction> {
        self.inner.transaction()
    }

    fn commit(&self, epoch: Epoch) -> StoreResult<Arc<ImprintsIndexVersion>> {
        Ok(self.inner.commit(epoch)?)
    }

    fn rollback(&self) {
        self.inner.rollback();
    }

    fn latest(&self) -> Arc<ImprintsIndexVersion> {
        self.inner.latest()
    }

    fn size_in_bytes(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.base().size_in_bytes()
    }
}
