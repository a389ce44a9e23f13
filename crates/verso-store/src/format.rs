//! Record shapes and tuning knobs, fixed at construction.

use crate::{Record, StoreError, StoreResult};

/// Shape of a columnar table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFormat {
    attribute_count: usize,
    value_count: usize,
    chunk_size: usize,
    chunk_order: u32,
}

impl TableFormat {
    /// `chunk_size` must be a power of two.
    pub fn new(attribute_count: usize, value_count: usize, chunk_size: usize) -> StoreResult<Self> {
        if !chunk_size.is_power_of_two() {
            return Err(StoreError::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            attribute_count,
            value_count,
            chunk_size,
            chunk_order: chunk_size.trailing_zeros(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn attribute_count(&self) -> usize {
        self.attribute_count
    }

    #[inline]
    #[must_use]
    pub const fn value_count(&self) -> usize {
        self.value_count
    }

    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    #[must_use]
    pub const fn chunk_order(&self) -> u32 {
        self.chunk_order
    }

    #[inline]
    #[must_use]
    pub const fn chunk_mask(&self) -> usize {
        self.chunk_size - 1
    }

    /// Splits a row into `(chunk, row within chunk)`.
    #[inline]
    #[must_use]
    pub const fn locate(&self, row: usize) -> (usize, usize) {
        (row >> self.chunk_order, row & self.chunk_mask())
    }

    /// Number of chunks needed to hold `rows` rows.
    #[inline]
    #[must_use]
    pub const fn chunks_for(&self, rows: usize) -> usize {
        if rows == 0 { 0 } else { ((rows - 1) >> self.chunk_order) + 1 }
    }

    /// Checks that `record` has this shape.
    pub fn check_record(&self, record: &Record) -> StoreResult<()> {
        let (attributes, values) = (record.attributes().len(), record.values().len());
        if attributes != self.attribute_count || values != self.value_count {
            return Err(StoreError::RecordShape {
                attributes,
                values,
                expected_attributes: self.attribute_count,
                expected_values: self.value_count,
            });
        }
        Ok(())
    }
}

/// Shape of a store: a table format plus key and indexed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFormat {
    table: TableFormat,
    key_fields: Vec<usize>,
    indexed_fields: Vec<usize>,
}

impl StoreFormat {
    /// Indexes every attribute that is not a key field.
    pub fn new(
        attribute_count: usize,
        value_count: usize,
        key_fields: impl Into<Vec<usize>>,
        chunk_size: usize,
    ) -> StoreResult<Self> {
        let table = TableFormat::new(attribute_count, value_count, chunk_size)?;
        let key_fields = key_fields.into();
        check_fields("key", &key_fields, attribute_count)?;
        let indexed_fields = (0..attribute_count)
            .filter(|field| !key_fields.contains(field))
            .collect();
        Ok(Self {
            table,
            key_fields,
            indexed_fields,
        })
    }

    /// Replaces the indexed fields.
    pub fn with_indexed_fields(
        mut self,
        indexed_fields: impl Into<Vec<usize>>,
    ) -> StoreResult<Self> {
        let indexed_fields = indexed_fields.into();
        check_fields("indexed", &indexed_fields, self.table.attribute_count())?;
        self.indexed_fields = indexed_fields;
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &TableFormat {
        &self.table
    }

    #[inline]
    #[must_use]
    pub fn key_fields(&self) -> &[usize] {
        &self.key_fields
    }

    #[inline]
    #[must_use]
    pub fn indexed_fields(&self) -> &[usize] {
        &self.indexed_fields
    }

    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.table.chunk_size()
    }
}

fn check_fields(kind: &str, fields: &[usize], attribute_count: usize) -> StoreResult<()> {
    if let Some(field) = fields.iter().find(|&&field| field >= attribute_count) {
        return Err(StoreError::InvalidFormat(format!(
            "{kind} field {field} out of {attribute_count} attributes"
        )));
    }
    Ok(())
}

/// Rebinning thresholds of the column-imprints index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImprintsConfig {
    /// Share of rows in the overflow bin that triggers rebinning.
    pub binning_tolerance: f64,
    /// Row count from which bins are computed from a sample.
    pub sample_threshold: usize,
    /// Share of rows read when sampling.
    pub sample_fraction: f64,
}

impl Default for ImprintsConfig {
    fn default() -> Self {
        Self {
            binning_tolerance: 0.05,
            sample_threshold: 20_480,
            sample_fraction: 0.1,
        }
    }
}
