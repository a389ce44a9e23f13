//! Shared handle to the open transaction of a multi-version structure.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::{MvccError, MvccResult};

struct Shared<T> {
    open: AtomicBool,
    slot: Mutex<Option<T>>,
}

/// A cloneable reference to one open transaction.
///
/// Handles do not pin the transaction: commit and rollback close it while
/// handles are still alive, after which [`TransactionHandle::lock`] fails
/// with [`MvccError::TransactionClosed`]. The slot lock is only held for the
/// duration of one operation.
pub struct TransactionHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TransactionHandle<T> {
    pub(crate) fn new(transaction: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                open: AtomicBool::new(true),
                slot: Mutex::new(Some(transaction)),
            }),
        }
    }

    /// Whether the transaction is still open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Locks the transaction for one operation.
    pub fn lock(&self) -> MvccResult<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.shared.slot.lock(), Option::as_mut)
            .map_err(|_| MvccError::TransactionClosed)
    }

    /// Whether both handles refer to the same transaction.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Locks the slot itself, open or not.
    pub(crate) fn slot(&self) -> MutexGuard<'_, Option<T>> {
        self.shared.slot.lock()
    }

    /// Takes the transaction out and closes every handle to it.
    pub(crate) fn close(&self, slot: &mut Option<T>) -> Option<T> {
        self.shared.open.store(false, Ordering::Release);
        slot.take()
    }
}

impl<T> Clone for TransactionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
