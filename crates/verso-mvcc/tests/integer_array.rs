//! Snapshot reads of the integer array under a concurrent writer.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use verso_mvcc::{
    Epoch, EpochClock, IntegerArrayVersioning, MultiVersionIntegerArray, MvccError, Version,
    Versioning,
};

#[test]
fn test_versions_match_history() {
    let mut rng = StdRng::seed_from_u64(5);
    let clock = EpochClock::new();
    let array = MultiVersionIntegerArray::with_empty_value(-1);
    let mut model = vec![-1; 512];
    let mut history = Vec::new();

    for _ in 0..50 {
        let mut staged = model.clone();
        {
            let handle = array.transaction();
            let mut txn = handle.lock().unwrap();
            for _ in 0..rng.gen_range(1..64) {
                let index = rng.gen_range(0..staged.len());
                let value = rng.gen_range(0..1000);
                txn.set(index, value).unwrap();
                staged[index] = value;
            }
        }
        if rng.gen_bool(0.2) {
            array.rollback();
            continue;
        }
        model = staged;
        history.push((array.commit(clock.tick()).unwrap(), model.clone()));
    }

    for (version, expected) in &history {
        for (index, &value) in expected.iter().enumerate() {
            assert_eq!(version.get(index), value, "index {index} at {}", version.epoch());
        }
    }
}

#[test]
fn test_readers_never_see_later_writes() {
    let clock = EpochClock::new();
    let array = MultiVersionIntegerArray::with_empty_value(-1);
    {
        let handle = array.transaction();
        let mut txn = handle.lock().unwrap();
        for index in 0..256 {
            txn.set(index, 0).unwrap();
        }
    }
    let first = array.commit(clock.tick()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let array = &array;
        let done = &done;
        let clock = &clock;
        scope.spawn(move || {
            for round in 1..200 {
                {
                    let handle = array.transaction();
                    let mut txn = handle.lock().unwrap();
                    for index in 0..256 {
                        txn.set(index, round).unwrap();
                    }
                }
                array.commit(clock.tick()).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..3 {
            let first = &first;
            scope.spawn(move || {
                while !done.load(Ordering::Acquire) {
                    assert!((0..256).all(|index| first.get(index) == 0));
                    let latest = array.latest();
                    let value = latest.get(0);
                    assert!((0..256).all(|index| latest.get(index) == value));
                }
            });
        }
    });

    assert_eq!(array.latest().get(255), 199);
}

#[test]
fn test_version_is_linked_once() {
    let array = MultiVersionIntegerArray::with_empty_value(-1);
    array.transaction().lock().unwrap().set(0, 1).unwrap();
    let v1 = array.commit(Epoch::new(1)).unwrap();

    let handle = array.transaction();
    handle.lock().unwrap().set(0, 2).unwrap();
    let successors: Vec<_> = (0..4)
        .map(|_| {
            Arc::new(IntegerArrayVersioning::create_version(
                array.base(),
                &Epoch::new(2),
                None,
            ))
        })
        .collect();

    let outcomes: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = successors
            .iter()
            .map(|next| {
                let (v1, handle) = (&v1, &handle);
                scope.spawn(move || v1.mark_obsolete(next, &mut handle.lock().unwrap()))
            })
            .collect();
        workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|err| *err == MvccError::ConcurrentTransition { epoch: 1 })
    );

    // The real commit finds v1 already linked and leaves the transaction open.
    assert!(matches!(
        array.commit(Epoch::new(2)),
        Err(MvccError::ConcurrentTransition { epoch: 1 })
    ));
    assert!(array.has_transaction());
    assert_eq!(v1.get(0), 1);
    assert_eq!(array.latest().epoch().id(), 1);
}
