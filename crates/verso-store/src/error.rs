//! Store error types.

use thiserror::Error;
use verso_mvcc::MvccError;

/// Store error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Commit protocol violation.
    #[error(transparent)]
    Mvcc(#[from] MvccError),

    /// No live record has this key.
    #[error("no record found for key {key:?}")]
    KeyNotFound { key: Vec<i32> },

    /// Primary indexes only support a single key field.
    #[error("primary index supports a single key field, got {fields}")]
    MultiFieldPrimaryKey { fields: usize },

    /// Chunk sizes must be non-zero powers of two.
    #[error("chunk size is not a power of 2: {0}")]
    InvalidChunkSize(usize),

    /// Inconsistent store or table format.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A record does not have the shape of the table.
    #[error(
        "record has {attributes} attributes and {values} values, \
         expected {expected_attributes} and {expected_values}"
    )]
    RecordShape {
        attributes: usize,
        values: usize,
        expected_attributes: usize,
        expected_values: usize,
    },

    /// A query pattern does not have one slot per index level.
    #[error("pattern has {actual} fields, expected {expected}")]
    PatternLength { expected: usize, actual: usize },

    /// Append-only indexes only accept the next row.
    #[error("append-only index expected row {expected}, got {actual}")]
    NonSequentialRow { expected: usize, actual: usize },

    /// Indexed values and keys must be non-negative.
    #[error("negative value {value} on index level {level}")]
    NegativeValue { level: usize, value: i32 },

    /// Quantile rank must lie in `(0, 1]`.
    #[error("rank {0} is outside (0, 1]")]
    RankOutOfRange(f64),

    /// A statistic was asked of a range holding no value.
    #[error("range {start}..{end} is empty")]
    EmptyRange { start: usize, end: usize },

    /// Growth past the addressable range.
    #[error("capacity overflow: {requested} rows requested")]
    CapacityOverflow { requested: usize },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
