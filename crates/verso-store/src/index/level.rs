//! One level of a bitmap index: a lazily created bitmap per value.
//!
//! Bitmaps live in [`Segments`], so growing the level never moves an
//! existing bitmap. Each bitmap slot is created once with [`OnceLock`]: the
//! first access synchronizes, later ones are lock-free.

use std::{
    mem,
    sync::{
        OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use verso_mvcc::segments::Segments;

use crate::Bitmap;

type Slot = OnceLock<RwLock<Bitmap>>;

/// Bitmaps of one indexed field, one per distinct value.
#[derive(Default)]
pub struct LevelBitmapIndex {
    slots: Segments<Slot>,
    created: AtomicUsize,
}

impl LevelBitmapIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bitmaps created so far.
    #[inline]
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// The bitmap of `value`, if one was ever created.
    #[must_use]
    pub fn bitmap(&self, value: i32) -> Option<&RwLock<Bitmap>> {
        let value = usize::try_from(value).ok()?;
        self.slots.get(value)?.get()
    }

    /// Whether `value` was ever indexed on this level.
    #[inline]
    #[must_use]
    pub fn exists(&self, value: i32) -> bool {
        self.bitmap(value).is_some()
    }

    /// The bitmap of `value`, created on first use; `None` past the last
    /// addressable value.
    pub fn get_or_create(&self, value: usize) -> Option<&RwLock<Bitmap>> {
        let slot = self.slots.get_or_create(value, OnceLock::new)?;
        Some(slot.get_or_init(|| {
            self.created.fetch_add(1, Ordering::AcqRel);
            RwLock::new(Bitmap::new())
        }))
    }

    /// Calls `f` with every created bitmap.
    fn for_each(&self, mut f: impl FnMut(&RwLock<Bitmap>)) {
        for bitmap in self.slots.iter().filter_map(OnceLock::get) {
            f(bitmap);
        }
    }

    /// Removes every row `>= len` from every bitmap.
    pub fn truncate(&self, len: usize) {
        self.for_each(|bitmap| bitmap.write().truncate(len));
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        let mut bytes = mem::size_of::<AtomicUsize>() as u64 + self.slots.size_in_bytes();
        self.for_each(|bitmap| bytes += bitmap.read().size_in_bytes());
        bytes
    }
}
