//! Append-only slot storage that never moves a slot once created.
//!
//! Slots live in buckets of doubling size:
//!
//! ```text
//! bucket 0: indices  0 ..  15   (16 slots)
//! bucket 1: indices 16 ..  47   (32 slots)
//! bucket 2: indices 48 .. 111   (64 slots)
//! ...
//! ```
//!
//! A bucket is created on first use with [`OnceLock`], so readers reach any
//! existing slot without taking a lock, concurrently with a writer that
//! creates new buckets.

use std::{mem, sync::OnceLock};

use tracing::trace;

const FIRST_BUCKET_ORDER: u32 = 4;
const FIRST_BUCKET_LENGTH: usize = 1 << FIRST_BUCKET_ORDER;

/// Number of buckets; enough to address every index below `i32::MAX`.
pub const BUCKET_COUNT: usize = 28;

/// Maps an index to `(bucket, slot)`.
#[inline]
#[must_use]
pub const fn locate(index: usize) -> (usize, usize) {
    let shifted = index + FIRST_BUCKET_LENGTH;
    let high = usize::BITS - 1 - shifted.leading_zeros();
    let bucket = (high - FIRST_BUCKET_ORDER) as usize;
    (bucket, shifted ^ (1 << high))
}

/// Number of slots in `bucket`.
#[inline]
#[must_use]
pub const fn bucket_len(bucket: usize) -> usize {
    FIRST_BUCKET_LENGTH << bucket
}

/// Lazily bucketed slots of `T`.
pub struct Segments<T> {
    buckets: [OnceLock<Box<[T]>>; BUCKET_COUNT],
}

impl<T> Segments<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// The slot at `index`, if its bucket exists.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        let (bucket, slot) = locate(index);
        self.buckets.get(bucket)?.get()?.get(slot)
    }

    /// The slot at `index`, creating its bucket with `init` if needed.
    ///
    /// Returns `None` past the last bucket.
    pub fn get_or_create(&self, index: usize, init: impl Fn() -> T) -> Option<&T> {
        let (bucket, slot) = locate(index);
        let cell = self.buckets.get(bucket)?;
        let slots = cell.get_or_init(|| {
            trace!(bucket, "creating segment");
            (0..bucket_len(bucket)).map(|_| init()).collect()
        });
        slots.get(slot)
    }

    /// Number of slots across the created buckets.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(bucket, _)| bucket_len(bucket))
            .sum()
    }

    /// Every slot of every created bucket, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buckets.iter().filter_map(OnceLock::get).flat_map(|slots| slots.iter())
    }

    /// Bytes taken by the bucket arrays, not counting what slots own.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        (mem::size_of::<Self>() + self.capacity() * mem::size_of::<T>()) as u64
    }
}

impl<T> Default for Segments<T> {
    fn default() -> Self {
        Self::new()
    }
}
