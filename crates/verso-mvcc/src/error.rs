//! Kernel error types.

use thiserror::Error;

use crate::EpochId;

/// Errors raised by the commit protocol.
///
/// All of these are caller-contract violations: the kernel never retries and
/// never silently corrects them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MvccError {
    /// `commit` was called while no transaction was open.
    #[error("no transaction started")]
    NoActiveTransaction,

    /// A transaction handle was used after its transaction was committed or
    /// rolled back.
    #[error("transaction already closed")]
    TransactionClosed,

    /// The committed epoch does not strictly follow the latest one.
    #[error("epoch {requested} does not follow the latest epoch {latest}")]
    NonIncreasingEpoch {
        /// Epoch of the latest published version.
        latest: EpochId,
        /// Epoch passed to `commit`.
        requested: EpochId,
    },

    /// Two writers raced to mark the same version obsolete.
    #[error("transition of the version at epoch {epoch} should not be set concurrently")]
    ConcurrentTransition {
        /// Epoch of the version whose transition was already set.
        epoch: EpochId,
    },

    /// A growable structure was asked for more slots than it can address.
    #[error("capacity overflow: {requested} slots requested")]
    CapacityOverflow {
        /// Requested number of slots.
        requested: usize,
    },
}

/// Result type for kernel operations.
pub type MvccResult<T> = Result<T, MvccError>;
