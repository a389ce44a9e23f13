//! Epoch, transaction and version-chain kernel.
//!
//! A multi-version structure has one mutable shared base, a published
//! `latest` version, and at most one pending transaction:
//!
//! - **Readers** hold `Arc`s to versions and never block on the writer.
//! - **The writer** stages changes in a transaction and commits them at a
//!   strictly increasing [`Epoch`].
//! - **Old versions** answer reads through a chain of write-once
//!   [`Transition`]s carrying undo deltas, so the base only ever holds the
//!   newest state.
//!
//! # Usage
//!
//! ```
//! use verso_mvcc::{Epoch, MultiVersionIntegerArray};
//!
//! let array = MultiVersionIntegerArray::with_empty_value(-1);
//! array.transaction().lock()?.set(0, 42)?;
//! let v1 = array.commit(Epoch::new(1))?;
//!
//! array.transaction().lock()?.set(0, 7)?;
//! let v2 = array.commit(Epoch::new(2))?;
//!
//! assert_eq!(v1.get(0), 42);
//! assert_eq!(v2.get(0), 7);
//! # Ok::<(), verso_mvcc::MvccError>(())
//! ```

mod array;
mod epoch;
mod error;
mod handle;
mod multi_version;
pub mod segments;
mod version;

pub use array::{
    IntegerArray, IntegerArrayTransaction, IntegerArrayVersion, IntegerArrayVersioning,
    IntegerDelta, MAX_CAPACITY, MultiVersionIntegerArray, check_index,
};
pub use epoch::{Epoch, EpochClock, EpochId, MASTER_BRANCH};
pub use error::{MvccError, MvccResult};
pub use handle::TransactionHandle;
pub use multi_version::{MultiVersion, Versioning};
pub use version::{DeltaVersion, Transaction, Transition, TransitionCell, Version};
