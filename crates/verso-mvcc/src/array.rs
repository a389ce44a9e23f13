//! A versioned, growable array of `i32`.
//!
//! The base is a bucketed array of atomic slots, written only by commits and
//! read without locks. Transactions stage writes in a hash map together with
//! the pre-image of every slot they overwrite, and hand those pre-images to
//! the version they obsolete. Unset slots read as the array's empty value.

use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicI32, AtomicUsize, Ordering},
    },
};

use rustc_hash::FxHashMap;

use crate::{
    DeltaVersion, Epoch, MultiVersion, MvccError, MvccResult, Transaction, TransitionCell, Version,
    Versioning, segments::Segments,
};

/// Largest number of addressable slots.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

/// Undo payload: slot → value before the next commit overwrote it.
pub type IntegerDelta = FxHashMap<usize, i32>;

/// Growable array of atomic slots; slots never written read as
/// `empty_value`.
///
/// Writes take `&self`. The multi-version wrapper only lets commits write,
/// one at a time, so readers see every slot either before or after a commit.
pub struct IntegerArray {
    empty_value: i32,
    slots: Segments<AtomicI32>,
    size: AtomicUsize,
}

impl IntegerArray {
    #[must_use]
    pub fn new(empty_value: i32) -> Self {
        Self {
            empty_value,
            slots: Segments::new(),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn empty_value(&self) -> i32 {
        self.empty_value
    }

    /// One past the highest slot ever written.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> i32 {
        if index >= MAX_CAPACITY {
            return self.empty_value;
        }
        self.slots
            .get(index)
            .map_or(self.empty_value, |slot| slot.load(Ordering::Acquire))
    }

    /// Writes `value` at `index`, growing the array as needed.
    pub fn set(&self, index: usize, value: i32) -> MvccResult<()> {
        check_index(index)?;
        self.put(index, value);
        Ok(())
    }

    /// Creates the slots up to `capacity` without writing them.
    pub fn ensure_capacity(&self, capacity: usize) -> MvccResult<()> {
        if capacity > MAX_CAPACITY {
            return Err(MvccError::CapacityOverflow { requested: capacity });
        }
        if let Some(last) = capacity.checked_sub(1) {
            self.slot(last);
        }
        Ok(())
    }

    /// Approximate heap footprint.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.slots.size_in_bytes() + mem::size_of::<Self>() as u64
    }

    /// Writes a slot already checked against [`MAX_CAPACITY`].
    fn put(&self, index: usize, value: i32) {
        if let Some(slot) = self.slot(index) {
            slot.store(value, Ordering::Release);
            self.size.fetch_max(index + 1, Ordering::AcqRel);
        }
    }

    fn slot(&self, index: usize) -> Option<&AtomicI32> {
        self.slots.get_or_create(index, || AtomicI32::new(self.empty_value))
    }
}

impl std::fmt::Debug for IntegerArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegerArray")
            .field("empty_value", &self.empty_value)
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Validates that `index` is addressable.
///
/// # Errors
///
/// [`MvccError::CapacityOverflow`] for `index >= MAX_CAPACITY`.
pub const fn check_index(index: usize) -> MvccResult<()> {
    if index >= MAX_CAPACITY {
        return Err(MvccError::CapacityOverflow { requested: index + 1 });
    }
    Ok(())
}

/// Staged writes against a shared [`IntegerArray`].
pub struct IntegerArrayTransaction {
    base: Arc<IntegerArray>,
    empty_value: i32,
    base_size: usize,
    new_size: usize,
    positive: FxHashMap<usize, i32>,
    negative: IntegerDelta,
}

impl IntegerArrayTransaction {
    fn new(base: Arc<IntegerArray>) -> Self {
        let (empty_value, base_size) = (base.empty_value(), base.size());
        Self {
            base,
            empty_value,
            base_size,
            new_size: base_size,
            positive: FxHashMap::default(),
            negative: IntegerDelta::default(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn empty_value(&self) -> i32 {
        self.empty_value
    }

    /// Size the array will have once committed.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.new_size
    }

    /// Reads the value as seen by this transaction.
    #[must_use]
    pub fn get(&self, index: usize) -> i32 {
        if let Some(&value) = self.positive.get(&index) {
            value
        } else if index < self.base_size {
            self.base.get(index)
        } else {
            self.empty_value
        }
    }

    pub fn set(&mut self, index: usize, value: i32) -> MvccResult<()> {
        check_index(index)?;
        self.positive.insert(index, value);
        if index < self.base_size && !self.negative.contains_key(&index) {
            let previous = self.base.get(index);
            self.negative.insert(index, previous);
        }
        self.new_size = self.new_size.max(index + 1);
        Ok(())
    }
}

impl Transaction for IntegerArrayTransaction {
    fn commit(&mut self, _epoch: &Epoch) {
        for (&index, &value) in &self.positive {
            self.base.put(index, value);
        }
    }

    fn rollback(&mut self) {
        self.positive.clear();
        self.negative.clear();
        self.new_size = self.base_size;
    }
}

/// Snapshot of an [`IntegerArray`] at one epoch.
pub struct IntegerArrayVersion {
    epoch: Epoch,
    base: Arc<IntegerArray>,
    empty_value: i32,
    size: usize,
    transition: TransitionCell<IntegerArrayVersion, IntegerDelta>,
}

impl IntegerArrayVersion {
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn empty_value(&self) -> i32 {
        self.empty_value
    }

    /// Value at `index` as of this version.
    #[must_use]
    pub fn get(&self, index: usize) -> i32 {
        if index >= self.size {
            return self.empty_value;
        }
        let live = self.base.get(index);
        self.resolve(live, |delta| delta.get(&index).copied())
    }
}

impl Version for IntegerArrayVersion {
    type Transaction = IntegerArrayTransaction;

    fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    fn mark_obsolete(
        &self,
        next: &Arc<Self>,
        transaction: &mut IntegerArrayTransaction,
    ) -> MvccResult<()> {
        let delta = mem::take(&mut transaction.negative);
        self.transition.set(&self.epoch, Arc::clone(next), delta)
    }
}

impl DeltaVersion for IntegerArrayVersion {
    type Delta = IntegerDelta;

    fn transition(&self) -> &TransitionCell<Self, IntegerDelta> {
        &self.transition
    }
}

/// [`Versioning`] of [`IntegerArray`].
pub struct IntegerArrayVersioning;

impl Versioning for IntegerArrayVersioning {
    type Base = IntegerArray;
    type Transaction = IntegerArrayTransaction;
    type Version = IntegerArrayVersion;

    fn create_transaction(
        base: &Arc<Self::Base>,
        _latest: &Arc<IntegerArrayVersion>,
    ) -> IntegerArrayTransaction {
        IntegerArrayTransaction::new(Arc::clone(base))
    }

    fn create_version(
        base: &Arc<Self::Base>,
        epoch: &Epoch,
        transaction: Option<&IntegerArrayTransaction>,
    ) -> IntegerArrayVersion {
        let (empty_value, base_size) = (base.empty_value(), base.size());
        IntegerArrayVersion {
            epoch: epoch.clone(),
            base: Arc::clone(base),
            empty_value,
            size: transaction.map_or(base_size, IntegerArrayTransaction::size),
            transition: TransitionCell::new(),
        }
    }
}

/// Multi-version growable `i32` array.
pub type MultiVersionIntegerArray = MultiVersion<IntegerArrayVersioning>;

impl MultiVersion<IntegerArrayVersioning> {
    /// An empty array whose unset slots read as `empty_value`.
    #[must_use]
    pub fn with_empty_value(empty_value: i32) -> Self {
        Self::new(IntegerArray::new(empty_value))
    }

    /// Approximate heap footprint of the base.
    pub fn size_in_bytes(&self) -> u64 {
        self.base().size_in_bytes() + mem::size_of::<Self>() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_array_grows_in_buckets() {
        let array = IntegerArray::new(-1);
        assert_eq!(array.get(3), -1);
        array.set(3, 7).unwrap();
        assert_eq!(array.size(), 4);
        assert_eq!(array.capacity(), 16);
        array.set(40, 1).unwrap();
        assert_eq!(array.capacity(), 48);
        assert_eq!(array.get(20), -1);
        assert_eq!(array.get(40), 1);
        assert!(matches!(
            array.ensure_capacity(MAX_CAPACITY + 1),
            Err(MvccError::CapacityOverflow { .. })
        ));
        assert!(matches!(
            array.set(MAX_CAPACITY, 1),
            Err(MvccError::CapacityOverflow { requested }) if requested == MAX_CAPACITY + 1
        ));
        assert_eq!(array.get(MAX_CAPACITY), -1);
    }

    #[test]
    fn test_versions_keep_their_values() {
        let mv = MultiVersionIntegerArray::with_empty_value(-1);
        let v0 = mv.latest();
        assert_eq!(v0.size(), 0);
        assert_eq!(v0.empty_value(), -1);

        mv.transaction().lock().unwrap().set(0, 5).unwrap();
        let v1 = mv.commit(Epoch::new(1)).unwrap();
        assert_eq!(v1.size(), 1);
        assert_eq!(v1.get(0), 5);

        {
            let handle = mv.transaction();
            let mut txn = handle.lock().unwrap();
            txn.set(1, 10).unwrap();
            txn.set(0, 1).unwrap();
        }
        let v2 = mv.commit(Epoch::new(2)).unwrap();

        assert_eq!(v2.size(), 2);
        assert_eq!(v2.get(0), 1);
        assert_eq!(v2.get(1), 10);
        assert_eq!(v1.size(), 1);
        assert_eq!(v1.get(0), 5);
        assert_eq!(v1.get(1), -1);
    }

    #[test]
    fn test_transaction_isolation() {
        let empty = 5;
        let mv = MultiVersionIntegerArray::with_empty_value(empty);
        let v1_size = 20;
        for i in 0..v1_size {
            mv.transaction().lock().unwrap().set(i, i as i32).unwrap();
        }
        let v1 = mv.commit(Epoch::new(1)).unwrap();

        for i in 0..2 * v1_size {
            let handle = mv.transaction();
            let mut txn = handle.lock().unwrap();
            txn.set(i, i as i32 + 1).unwrap();
            assert_eq!(txn.size(), v1_size.max(i + 1));
            assert_eq!(txn.get(i), i as i32 + 1);
        }
        for i in 0..v1_size {
            assert_eq!(v1.get(i), i as i32);
        }

        mv.rollback();
        assert_eq!(mv.latest().get(3), 3);
    }

    #[test]
    fn test_empty_value_can_be_written() {
        let empty = i32::MIN;
        let mv = MultiVersionIntegerArray::with_empty_value(empty);
        mv.transaction().lock().unwrap().set(0, empty + 100).unwrap();
        mv.commit(Epoch::new(1)).unwrap();

        mv.transaction().lock().unwrap().set(0, empty).unwrap();
        assert_eq!(mv.transaction().lock().unwrap().get(0), empty);
        let v2 = mv.commit(Epoch::new(2)).unwrap();
        assert_eq!(v2.get(0), empty);

        mv.transaction().lock().unwrap().set(0, empty + 200).unwrap();
        mv.commit(Epoch::new(3)).unwrap();
        assert_eq!(v2.get(0), empty);
    }

    #[test]
    fn test_old_versions_resolve_through_chain() {
        let mv = MultiVersionIntegerArray::with_empty_value(-1);
        mv.transaction().lock().unwrap().set(0, 1).unwrap();
        let v1 = mv.commit(Epoch::new(1)).unwrap();
        for epoch in 2..6 {
            mv.transaction().lock().unwrap().set(0, epoch as i32).unwrap();
            mv.commit(Epoch::new(epoch)).unwrap();
        }
        assert_eq!(v1.get(0), 1);
        assert_eq!(v1.chain_len(), 4);
        assert_eq!(mv.latest().get(0), 5);
    }

    #[test]
    fn test_concurrent_reader_sees_consistent_versions() {
        let mv = MultiVersionIntegerArray::with_empty_value(-1);
        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..1_000 {
                    let v = mv.latest();
                    let id = v.epoch().id() as i32;
                    if id == 0 {
                        assert_eq!(v.size(), 0);
                    } else if id & 1 == 1 {
                        assert_eq!(v.get(0), id);
                    } else {
                        assert_eq!(v.get(0), id - 1);
                        assert_eq!(v.get(1), id);
                    }
                    thread::yield_now();
                }
            });
            scope.spawn(|| {
                for i in 1..1_000u64 {
                    let slot = if i & 1 == 1 { 0 } else { 1 };
                    mv.transaction().lock().unwrap().set(slot, i as i32).unwrap();
                    mv.commit(Epoch::new(i)).unwrap();
                    thread::yield_now();
                }
            });
        });
    }
}
