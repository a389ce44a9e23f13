//! Versions, transactions and the write-once transition link between versions.
//!
//! ```text
//!   v1 ──transition──▶ v2 ──transition──▶ v3 (latest, no transition)
//!        { pre-images       { pre-images
//!          overwritten        overwritten
//!          by v2's commit }   by v3's commit }
//! ```
//!
//! The shared base always holds the newest state. An old version answers a
//! read by taking the live base value and then walking its transitions: the
//! first delta that mentions the key holds the value as of that version.

use std::sync::{Arc, OnceLock};

use crate::{Epoch, MvccError, MvccResult};

/// Mutable staging area for one pending commit.
///
/// A transaction is used once: after `commit` or `rollback` it is dropped.
pub trait Transaction: Send {
    /// Applies the staged changes to the shared base.
    fn commit(&mut self, epoch: &Epoch);

    /// Discards the staged changes, restoring the base to its shape at
    /// transaction creation.
    fn rollback(&mut self);
}

/// An immutable snapshot view tagged with an epoch.
pub trait Version: Send + Sync + Sized {
    /// Transaction type whose commit replaces this version.
    type Transaction: Transaction;

    fn epoch(&self) -> &Epoch;

    /// Links this version to the version replacing it.
    ///
    /// Called exactly once, when `next` is about to be published, and before
    /// the base is mutated by `transaction`.
    fn mark_obsolete(
        &self,
        next: &Arc<Self>,
        transaction: &mut Self::Transaction,
    ) -> MvccResult<()>;
}

/// Link from a version to its successor, carrying the undo payload.
#[derive(Debug)]
pub struct Transition<V, D> {
    next: Arc<V>,
    delta: D,
}

impl<V, D> Transition<V, D> {
    #[inline]
    pub fn next(&self) -> &Arc<V> {
        &self.next
    }

    #[inline]
    pub const fn delta(&self) -> &D {
        &self.delta
    }
}

/// A set-once slot for a [`Transition`].
///
/// Reads are lock-free with acquire semantics. A second `set` fails with
/// [`MvccError::ConcurrentTransition`].
#[derive(Debug)]
pub struct TransitionCell<V, D> {
    cell: OnceLock<Transition<V, D>>,
}

impl<V, D> TransitionCell<V, D> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> Option<&Transition<V, D>> {
        self.cell.get()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Publishes the transition of the version at `epoch`.
    pub fn set(&self, epoch: &Epoch, next: Arc<V>, delta: D) -> MvccResult<()> {
        self.cell
            .set(Transition { next, delta })
            .map_err(|_| MvccError::ConcurrentTransition { epoch: epoch.id() })
    }
}

impl<V, D> Default for TransitionCell<V, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// A version whose reads resolve through a chain of undo deltas.
pub trait DeltaVersion: Sized {
    type Delta;

    fn transition(&self) -> &TransitionCell<Self, Self::Delta>;

    /// Resolves a value as of this version.
    ///
    /// `live` must have been read from the base *before* calling this: the
    /// transition is always set before the base is touched, so a value read
    /// first and a chain walked second can never miss a concurrent commit.
    fn resolve<T>(&self, live: T, lookup: impl Fn(&Self::Delta) -> Option<T>) -> T {
        let mut current = self.transition().get();
        while let Some(transition) = current {
            if let Some(pre_image) = lookup(transition.delta()) {
                return pre_image;
            }
            current = transition.next().transition().get();
        }
        live
    }

    /// Number of versions chained after this one.
    fn chain_len(&self) -> usize {
        let mut len = 0;
        let mut current = self.transition().get();
        while let Some(transition) = current {
            len += 1;
            current = transition.next().transition().get();
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        transition: TransitionCell<Node, (usize, i32)>,
    }

    impl DeltaVersion for Node {
        type Delta = (usize, i32);

        fn transition(&self) -> &TransitionCell<Self, Self::Delta> {
            &self.transition
        }
    }

    fn node() -> Arc<Node> {
        Arc::new(Node {
            transition: TransitionCell::new(),
        })
    }

    #[test]
    fn test_transition_is_write_once() {
        let a = node();
        let b = node();
        a.transition.set(&Epoch::new(1), Arc::clone(&b), (0, 1)).unwrap();
        let err = a.transition.set(&Epoch::new(1), b, (0, 2)).unwrap_err();
        assert_eq!(err, MvccError::ConcurrentTransition { epoch: 1 });
        assert_eq!(a.transition.get().unwrap().delta(), &(0, 1));
    }

    #[test]
    fn test_resolve_walks_to_first_matching_delta() {
        let a = node();
        let b = node();
        let c = node();
        a.transition.set(&Epoch::new(1), Arc::clone(&b), (3, 10)).unwrap();
        b.transition.set(&Epoch::new(2), Arc::clone(&c), (5, 20)).unwrap();

        let lookup = |key: usize| move |delta: &(usize, i32)| (delta.0 == key).then_some(delta.1);
        assert_eq!(a.resolve(99, lookup(3)), 10);
        assert_eq!(a.resolve(99, lookup(5)), 20);
        assert_eq!(a.resolve(99, lookup(7)), 99);
        assert_eq!(b.resolve(99, lookup(3)), 99);
        assert_eq!(a.chain_len(), 2);
        assert_eq!(c.chain_len(), 0);
    }
}
