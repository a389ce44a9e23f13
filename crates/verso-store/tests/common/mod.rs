//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use verso_store::{
    ImprintsConfig, ImprintsSecondaryIndex, MultiVersionStore, Record, RowSet, SecondaryIndex,
    StoreFormat, chunk::HeapAllocator,
};

/// Generates one `#[test]` per secondary index strategy for each generic
/// check function.
macro_rules! strategy_tests {
    ($($check:ident),* $(,)?) => {
        mod bitmap_index {
            $(
                #[test]
                fn $check() {
                    super::$check::<verso_store::BitmapSecondaryIndex>();
                }
            )*
        }

        mod chunked_index {
            $(
                #[test]
                fn $check() {
                    super::$check::<verso_store::ChunkedBitmapSecondaryIndex>();
                }
            )*
        }

        mod imprints_index {
            $(
                #[test]
                fn $check() {
                    super::$check::<verso_store::ImprintsSecondaryIndex>();
                }
            )*
        }
    };
}

/// Four attributes (key first) and two values, chunks of 128.
pub fn default_format() -> StoreFormat {
    StoreFormat::new(4, 2, [0], 128).unwrap()
}

pub fn store<I: SecondaryIndex>(format: StoreFormat) -> MultiVersionStore<I> {
    MultiVersionStore::new(format).unwrap()
}

/// An imprints store that samples its bins from `sample_threshold` rows on.
pub fn sampling_imprints_store(
    format: StoreFormat,
    sample_threshold: usize,
) -> MultiVersionStore<ImprintsSecondaryIndex> {
    let config = ImprintsConfig {
        sample_threshold,
        ..ImprintsConfig::default()
    };
    MultiVersionStore::with_parts(format, Arc::new(HeapAllocator), |format, table| {
        ImprintsSecondaryIndex::with_config(format, table, config)
    })
    .unwrap()
}

pub fn record(key: i32, f1: i32, f2: i32, f3: i32, v1: f64, v2: f64) -> Record {
    Record::new([key, f1, f2, f3], [v1, v2])
}

pub fn rows<R: RowSet>(rows: &R) -> Vec<usize> {
    rows.rows().collect()
}

/// Routes store logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
