//! Randomized and concurrent checks against a brute-force model.

#[macro_use]
mod common;

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use common::{default_format, init_tracing, record, rows, sampling_imprints_store, store};
use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use verso_mvcc::{Epoch, EpochClock};
use verso_store::{
    ANY, BitmapSecondaryIndex, ChunkedBitmapSecondaryIndex, ImprintsSecondaryIndex,
    MultiVersionStore, Record, RowSet, SecondaryIndex, StoreFormat, StoreVersion,
};

/// Live records by key, as of one committed epoch.
type Model = BTreeMap<i32, Record>;

fn matches(record: &Record, pattern: &[i32]) -> bool {
    record.attributes()[1..]
        .iter()
        .zip(pattern)
        .all(|(&value, &wanted)| wanted == ANY || wanted == value)
}

fn expected_keys(model: &Model, pattern: &[i32]) -> Vec<i32> {
    model
        .iter()
        .filter(|(_, record)| matches(record, pattern))
        .map(|(&key, _)| key)
        .collect()
}

fn found_keys<I: SecondaryIndex>(version: &StoreVersion<I>, pattern: &[i32]) -> Vec<i32> {
    let mut keys: Vec<i32> = version
        .scan(pattern)
        .unwrap()
        .iter()
        .map(|record| record.attributes()[0])
        .collect();
    keys.sort_unstable();
    keys
}

fn check_version<I: SecondaryIndex>(
    version: &StoreVersion<I>,
    model: &Model,
    rng: &mut StdRng,
    max_value: i32,
) {
    assert_eq!(version.size(), model.len(), "size at {}", version.epoch());

    for (key, record) in model {
        let row = version.find_row(&Record::key([*key])).unwrap();
        let row = row.unwrap_or_else(|| panic!("key {key} missing at {}", version.epoch()));
        assert_eq!(version.get_record(row).as_ref(), Some(record));
    }

    for _ in 0..16 {
        let pattern: Vec<i32> = (0..3)
            .map(|_| if rng.gen_bool(0.5) { ANY } else { rng.gen_range(0..max_value) })
            .collect();
        assert_eq!(
            found_keys(version, &pattern),
            expected_keys(model, &pattern),
            "pattern {pattern:?} at {}",
            version.epoch()
        );
    }
}

/// Random submits, overwrites and deletions; every retained snapshot keeps
/// answering as of its own epoch.
fn test_matches_model<I: SecondaryIndex>() {
    init_tracing();
    const KEYS: i32 = 96;
    const VALUES: i32 = 6;

    let mut rng = StdRng::seed_from_u64(7);
    let clock = EpochClock::new();
    let store = store::<I>(StoreFormat::new(4, 2, [0], 16).unwrap());
    let mut model = Model::new();
    let mut history = Vec::new();

    for round in 0..24 {
        {
            let txn = store.transaction();
            for _ in 0..rng.gen_range(1..40) {
                let key = rng.gen_range(0..KEYS);
                if rng.gen_bool(0.25) {
                    if model.remove(&key).is_some() {
                        txn.delete_record(&Record::key([key])).unwrap();
                    }
                } else {
                    let record = record(
                        key,
                        rng.gen_range(0..VALUES),
                        rng.gen_range(0..VALUES),
                        rng.gen_range(0..VALUES),
                        f64::from(round),
                        rng.r#gen(),
                    );
                    txn.submit_record(&record).unwrap();
                    model.insert(key, record);
                }
            }
        }
        let version = store.commit(clock.tick()).unwrap();
        history.push((version, model.clone()));

        // A rolled-back transaction leaves no trace.
        if round % 5 == 0 {
            store.transaction().submit_record(&record(0, 0, 0, 0, -1.0, -1.0)).unwrap();
            store.rollback();
        }
    }

    for (version, model) in &history {
        check_version(version, model, &mut rng, VALUES);
    }
}

/// Wide value ranges go through rebinning; no matching row may be missed.
fn test_wide_values<I: SecondaryIndex>() {
    let mut rng = StdRng::seed_from_u64(11);
    let store = store::<I>(default_format());
    let mut model = Model::new();

    for round in 0..4 {
        let records: Vec<Record> = (0..500)
            .map(|i| {
                let key = round * 500 + i;
                record(key, rng.gen_range(0..1000), rng.gen_range(0..70), key % 129, 0.0, 0.0)
            })
            .collect();
        store.transaction().submit_records(&records).unwrap();
        model.extend(records.into_iter().map(|r| (r.attributes()[0], r)));
        let version = store.commit(Epoch::new(round as u64 + 1)).unwrap();
        check_version(&version, &model, &mut rng, 1000);
    }
}

/// Rows one committed batch matches, through strategy `I`.
fn committed_rows<I: SecondaryIndex>(records: &[Record], pattern: &[i32]) -> Vec<usize> {
    let store = store::<I>(StoreFormat::new(4, 2, [0], 16).unwrap());
    store.transaction().submit_records(records).unwrap();
    let version = store.commit(Epoch::new(1)).unwrap();
    rows(&version.find_rows(pattern).unwrap())
}

fn slot(values: std::ops::Range<i32>) -> impl Strategy<Value = i32> {
    prop_oneof![Just(ANY), values]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_strategies_agree_with_brute_force(
        points in prop::collection::vec((0..8i32, 0..200i32, 0..40i32), 1..300),
        pattern in (slot(0..8), slot(0..200), slot(0..40)),
    ) {
        let records: Vec<Record> = points
            .iter()
            .zip(0..)
            .map(|(&(a, b, c), key)| record(key, a, b, c, 0.0, 0.0))
            .collect();
        let pattern = [pattern.0, pattern.1, pattern.2];
        let expected: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| matches(record, &pattern))
            .map(|(row, _)| row)
            .collect();

        let bitmap = committed_rows::<BitmapSecondaryIndex>(&records, &pattern);
        prop_assert_eq!(bitmap, expected.clone());
        let chunked = committed_rows::<ChunkedBitmapSecondaryIndex>(&records, &pattern);
        prop_assert_eq!(chunked, expected.clone());
        prop_assert_eq!(committed_rows::<ImprintsSecondaryIndex>(&records, &pattern), expected);
    }
}

#[test]
fn test_sampled_imprints_have_no_false_negatives() {
    let mut rng = StdRng::seed_from_u64(3);
    let store = sampling_imprints_store(default_format(), 256);
    let mut model = Model::new();

    for epoch in 1..=3 {
        let records: Vec<Record> = (0..1200)
            .map(|_| {
                let key = rng.gen_range(0..3000);
                let skewed = if rng.gen_bool(0.8) {
                    rng.gen_range(0..4)
                } else {
                    rng.gen_range(0..5000)
                };
                record(key, skewed, rng.gen_range(0..300), rng.gen_range(0..64), 0.0, 0.0)
            })
            .collect();
        store.transaction().submit_records(&records).unwrap();
        for record in records {
            model.insert(record.attributes()[0], record);
        }
        let version = store.commit(Epoch::new(epoch)).unwrap();
        check_version(&version, &model, &mut rng, 5000);

        for value in [0, 3, 4999] {
            let pattern = [value, ANY, ANY];
            assert_eq!(found_keys(&version, &pattern), expected_keys(&model, &pattern));
        }
    }
}

// ============================================================================
// Discard
// ============================================================================

fn fill(store: &MultiVersionStore<impl SecondaryIndex>, keys: std::ops::Range<i32>) {
    let records: Vec<Record> = keys.map(|k| record(k, k % 7, 0, 0, 0.0, 0.0)).collect();
    store.transaction().submit_records(&records).unwrap();
}

fn delete(store: &MultiVersionStore<impl SecondaryIndex>, keys: std::ops::Range<i32>) {
    let txn = store.transaction();
    for key in keys {
        txn.delete_record(&Record::key([key])).unwrap();
    }
}

fn test_discard_keeps_visible_chunks<I: SecondaryIndex>() {
    let store = store::<I>(StoreFormat::new(4, 2, [0], 16).unwrap());
    fill(&store, 0..64);
    let v1 = store.commit(Epoch::new(1)).unwrap();
    delete(&store, 0..16);
    let v2 = store.commit(Epoch::new(2)).unwrap();
    delete(&store, 16..32);
    let v3 = store.commit(Epoch::new(3)).unwrap();

    // v1 still reads chunks 0 and 1, v2 reads chunk 1.
    store.discard_before(1);
    let table = store.table().base();
    assert!(table.has_chunk(0) && table.has_chunk(1));
    assert_eq!(v1.size(), 64);
    assert_eq!(
        rows(&v1.find_rows(&[0, ANY, ANY]).unwrap()),
        vec![0, 7, 14, 21, 28, 35, 42, 49, 56, 63]
    );

    drop(v1);
    store.discard_before(2);
    assert!(!table.has_chunk(0));
    assert!(table.has_chunk(1) && table.has_chunk(2));
    assert_eq!(rows(&v2.find_rows(&[0, ANY, ANY]).unwrap()), vec![21, 28, 35, 42, 49, 56, 63]);
    assert_eq!(rows(&v3.find_rows(&[0, ANY, ANY]).unwrap()), vec![35, 42, 49, 56, 63]);

    drop(v2);
    store.discard_before(3);
    assert!(!table.has_chunk(1));
    assert_eq!(v3.size(), 32);
    assert_eq!(v3.read_int(40, 0), Some(40));

    // A partly deleted chunk is never reclaimed.
    delete(&store, 32..47);
    store.commit(Epoch::new(4)).unwrap();
    store.discard_before(10);
    assert!(table.has_chunk(2));
}

#[test]
fn test_discard_releases_chunked_index() {
    let store = store::<ChunkedBitmapSecondaryIndex>(StoreFormat::new(4, 2, [0], 16).unwrap());
    fill(&store, 0..48);
    store.commit(Epoch::new(1)).unwrap();
    assert_eq!(store.secondary_index().live_chunks(), 3);

    delete(&store, 0..32);
    let v2 = store.commit(Epoch::new(2)).unwrap();
    let bytes = store.size_in_bytes();
    store.discard_before(2);
    assert_eq!(store.secondary_index().live_chunks(), 1);
    assert!(store.size_in_bytes() < bytes);
    assert_eq!(rows(&v2.find_rows(&[1, ANY, ANY]).unwrap()), vec![36, 43]);
}

// ============================================================================
// Concurrency
// ============================================================================

fn test_readers_see_stable_snapshots<I: SecondaryIndex>() {
    init_tracing();
    let store = store::<I>(default_format());
    let initial: Vec<Record> = (0..256).map(|k| record(k, k % 3, 100, k % 5, 0.0, 0.0)).collect();
    store.transaction().submit_records(&initial).unwrap();
    let v1 = store.commit(Epoch::new(1)).unwrap();
    let expected = rows(&v1.find_rows(&[ANY, 100, 0]).unwrap());
    assert_eq!(expected.len(), 52);

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        let store = &store;
        let done = &done;
        scope.spawn(move || {
            for epoch in 2..40u64 {
                let base = 256 + (epoch as i32) * 16;
                let records: Vec<Record> =
                    (base..base + 16).map(|k| record(k, 0, 100, 0, 0.0, 0.0)).collect();
                store.transaction().submit_records(&records).unwrap();
                if epoch % 4 == 0 {
                    store.transaction().delete_record(&Record::key([epoch as i32])).unwrap();
                }
                store.commit(Epoch::new(epoch)).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..2 {
            let v1 = Arc::clone(&v1);
            let expected = expected.clone();
            scope.spawn(move || {
                let mut last_epoch = 0;
                while !done.load(Ordering::Acquire) {
                    assert_eq!(rows(&v1.find_rows(&[ANY, 100, 0]).unwrap()), expected);
                    let latest = store.latest();
                    assert!(latest.epoch().id() >= last_epoch);
                    last_epoch = latest.epoch().id();
                    let found = latest.find_rows(&[ANY, 100, ANY]).unwrap();
                    assert_eq!(found.cardinality(), latest.size());
                }
            });
        }
    });

    assert_eq!(rows(&v1.find_rows(&[ANY, 100, 0]).unwrap()), expected);
    assert_eq!(store.latest().size(), 256 + 38 * 16 - 9);
}

strategy_tests!(
    test_matches_model,
    test_wide_values,
    test_discard_keeps_visible_chunks,
    test_readers_see_stable_snapshots,
);
