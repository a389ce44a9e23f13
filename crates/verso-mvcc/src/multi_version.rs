//! The generic commit/rollback protocol.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  MultiVersion<S>                                                 │
//! │    base:        Arc<S::Base>      single mutable shared state    │
//! │    latest:      Arc<S::Version>   published by commit only       │
//! │    transaction: Option<Handle>    at most one, created on demand │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commit order is fixed: validate, build the next version, link the current
//! latest to it, run the pre-commit hook, let the transaction mutate the base,
//! then publish. Readers holding the old latest see the link before any base
//! mutation, which is what keeps their reads consistent.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::{Epoch, MvccError, Transaction, TransactionHandle, Version};

/// Describes one family of multi-version structure: its shared base, its
/// transaction and its version types, and how to create them.
pub trait Versioning: Sized + 'static {
    type Base: Send + Sync;
    type Transaction: Transaction;
    type Version: Version<Transaction = Self::Transaction>;

    /// Creates the transaction staging changes against `base`.
    fn create_transaction(base: &Arc<Self::Base>, latest: &Arc<Self::Version>) -> Self::Transaction;

    /// Creates the version describing `base` once `transaction` is committed.
    ///
    /// Called with `None` once, for the initial version. Must not mutate the
    /// base.
    fn create_version(
        base: &Arc<Self::Base>,
        epoch: &Epoch,
        transaction: Option<&Self::Transaction>,
    ) -> Self::Version;

    /// Runs after the old latest has been linked to its successor and before
    /// the transaction touches the base.
    fn before_commit(
        _base: &Arc<Self::Base>,
        _epoch: &Epoch,
        _transaction: &mut Self::Transaction,
    ) {
    }
}

/// A shared base with a published latest version and an optional pending
/// transaction.
pub struct MultiVersion<S: Versioning> {
    base: Arc<S::Base>,
    latest: RwLock<Arc<S::Version>>,
    transaction: Mutex<Option<TransactionHandle<S::Transaction>>>,
}

impl<S: Versioning> MultiVersion<S> {
    /// Wraps `base`; the initial version is at [`Epoch::initial`].
    #[must_use]
    pub fn new(base: S::Base) -> Self {
        Self::from_shared(Arc::new(base))
    }

    /// Wraps an already shared base.
    #[must_use]
    pub fn from_shared(base: Arc<S::Base>) -> Self {
        let latest = Arc::new(S::create_version(&base, &Epoch::initial(), None));
        Self {
            base,
            latest: RwLock::new(latest),
            transaction: Mutex::new(None),
        }
    }

    #[inline]
    pub const fn base(&self) -> &Arc<S::Base> {
        &self.base
    }

    /// The most recently committed version.
    #[inline]
    pub fn latest(&self) -> Arc<S::Version> {
        Arc::clone(&self.latest.read())
    }

    /// Whether a transaction is currently open.
    pub fn has_transaction(&self) -> bool {
        self.transaction.lock().as_ref().is_some_and(TransactionHandle::is_open)
    }

    /// Returns a handle to the open transaction, creating it if needed.
    ///
    /// Every call made while the transaction is open returns a handle to the
    /// same transaction. Handles may be kept across [`MultiVersion::commit`]
    /// and [`MultiVersion::rollback`]; they are closed by both.
    pub fn transaction(&self) -> TransactionHandle<S::Transaction> {
        let mut current = self.transaction.lock();
        if let Some(handle) = current.as_ref().filter(|handle| handle.is_open()) {
            return handle.clone();
        }
        let latest = self.latest();
        trace!(epoch = latest.epoch().id(), "creating transaction");
        let handle = TransactionHandle::new(S::create_transaction(&self.base, &latest));
        *current = Some(handle.clone());
        handle
    }

    /// Commits the open transaction at `epoch` and publishes the new version.
    pub fn commit(&self, epoch: Epoch) -> Result<Arc<S::Version>, MvccError> {
        self.commit_with(epoch, |_| Ok(()))
    }

    /// Commits like [`MultiVersion::commit`], running `prepare` once the
    /// transaction and epoch have been validated and before the next version
    /// is built.
    ///
    /// Composite structures use `prepare` to commit the structures they are
    /// made of. If `prepare` fails the transaction stays open.
    pub fn commit_with<E, F>(&self, epoch: Epoch, prepare: F) -> Result<Arc<S::Version>, E>
    where
        E: From<MvccError>,
        F: FnOnce(&mut S::Transaction) -> Result<(), E>,
    {
        let current = self.transaction.lock().clone();
        let Some(handle) = current else {
            return Err(MvccError::NoActiveTransaction.into());
        };
        let mut slot = handle.slot();
        let Some(transaction) = slot.as_mut() else {
            return Err(MvccError::NoActiveTransaction.into());
        };

        let current = self.latest();
        let latest_id = current.epoch().id();
        if epoch.id() <= latest_id {
            return Err(MvccError::NonIncreasingEpoch {
                latest: latest_id,
                requested: epoch.id(),
            }
            .into());
        }

        prepare(transaction)?;

        let next = Arc::new(S::create_version(&self.base, &epoch, Some(&*transaction)));
        current.mark_obsolete(&next, transaction)?;
        S::before_commit(&self.base, &epoch, transaction);
        transaction.commit(&epoch);

        *self.latest.write() = Arc::clone(&next);
        handle.close(&mut slot);
        drop(slot);
        self.forget(&handle);

        debug!(epoch = %epoch, "committed");
        Ok(next)
    }

    /// Rolls back and discards the open transaction, if any.
    ///
    /// No epoch is consumed.
    pub fn rollback(&self) {
        let taken = self.transaction.lock().take();
        let Some(handle) = taken else {
            return;
        };
        let mut slot = handle.slot();
        if let Some(mut transaction) = handle.close(&mut slot) {
            transaction.rollback();
            debug!("rolled back");
        }
    }

    /// Clears the creation slot if it still refers to `handle`.
    fn forget(&self, handle: &TransactionHandle<S::Transaction>) {
        let mut current = self.transaction.lock();
        if current.as_ref().is_some_and(|open| open.ptr_eq(handle)) {
            *current = None;
        }
    }
}
