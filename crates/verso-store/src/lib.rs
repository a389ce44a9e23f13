//! In-memory columnar store with snapshot-isolated MVCC.
//!
//! A single writer appends and deletes records; any number of readers query
//! committed versions without blocking. Every committed [`StoreVersion`]
//! keeps answering as of its epoch.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  MultiVersionStore<I>                                               │
//! │    - submit/delete through one StoreTransaction                     │
//! │    - commit(epoch) ──► StoreVersion                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                       │                         │
//!          ▼                       ▼                         ▼
//! ┌──────────────────┐  ┌──────────────────────┐  ┌─────────────────────┐
//! │ MultiVersionTable│  │ MultiVersionPrimary- │  │ SecondaryIndex      │
//! │  chunked columns │  │ Index                │  │  bitmap / chunked / │
//! │  + row stamps    │  │  key ──► row         │  │  column imprints    │
//! └──────────────────┘  └──────────────────────┘  └─────────────────────┘
//! ```
//!
//! Secondary indexes only ever append. Deleted and not-yet-visible rows are
//! removed from their answers by the table version of the same epoch.
//!
//! # Usage
//!
//! ```
//! use verso_mvcc::Epoch;
//! use verso_store::{ANY, BitmapSecondaryIndex, MultiVersionStore, Record, StoreFormat};
//!
//! // key, currency, portfolio | amount
//! let format = StoreFormat::new(3, 1, [0], 1024)?;
//! let store = MultiVersionStore::<BitmapSecondaryIndex>::new(format)?;
//!
//! store.transaction().submit_records(&[
//!     Record::new([0, 0, 7], [10.0]),
//!     Record::new([1, 1, 7], [20.0]),
//! ])?;
//! let v1 = store.commit(Epoch::new(1))?;
//!
//! store.transaction().delete_record(&Record::key([0]))?;
//! let v2 = store.commit(Epoch::new(2))?;
//!
//! assert_eq!(v1.find_rows(&[ANY, 7])?.to_vec(), vec![0, 1]);
//! assert_eq!(v2.find_rows(&[ANY, 7])?.to_vec(), vec![1]);
//! # Ok::<(), verso_store::StoreError>(())
//! ```

mod bitmap;
pub mod chunk;
mod dictionary;
mod error;
mod format;
pub mod index;
mod record;
mod store;
pub mod table;

pub use bitmap::{Bitmap, ChunkedBitmap, Ones, RowSet};
pub use dictionary::Dictionary;
pub use error::{StoreError, StoreResult};
pub use format::{ImprintsConfig, StoreFormat, TableFormat};
pub use index::{
    ANY, BitmapSecondaryIndex, ChunkedBitmapSecondaryIndex, ImprintsSecondaryIndex, SecondaryIndex,
};
pub use record::Record;
pub use store::{
    MultiVersionStore, PendingWrite, StoreBase, StoreTransaction, StoreVersion, StoreVersioning,
};
