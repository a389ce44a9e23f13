//! Commit points on the version timeline.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// An epoch identifier (monotonically increasing across commits).
pub type EpochId = u64;

/// Branch every epoch lives on unless told otherwise.
pub const MASTER_BRANCH: &str = "master";

/// An immutable `(id, branch)` pair identifying a commit point.
///
/// Epoch `0` on [`MASTER_BRANCH`] is the state before any commit.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Epoch {
    id: EpochId,
    branch: Arc<str>,
}

impl Epoch {
    /// The epoch every multi-version structure starts at.
    #[must_use]
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// An epoch on the master branch.
    #[must_use]
    pub fn new(id: EpochId) -> Self {
        Self::on_branch(id, MASTER_BRANCH)
    }

    /// An epoch on a named branch.
    #[must_use]
    pub fn on_branch(id: EpochId, branch: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            branch: branch.into(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> EpochId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Whether this is the pre-commit epoch.
    #[inline]
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({}@{})", self.id, self.branch)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.branch)
    }
}

/// Hands out strictly increasing epochs, starting at 1.
///
/// Safe to share between threads; each call to [`EpochClock::tick`] returns a
/// distinct, larger epoch.
#[derive(Debug)]
pub struct EpochClock {
    next: AtomicU64,
    branch: Arc<str>,
}

impl EpochClock {
    #[must_use]
    pub fn new() -> Self {
        Self::on_branch(MASTER_BRANCH)
    }

    #[must_use]
    pub fn on_branch(branch: impl Into<Arc<str>>) -> Self {
        Self {
            next: AtomicU64::new(1),
            branch: branch.into(),
        }
    }

    /// Returns the next epoch.
    pub fn tick(&self) -> Epoch {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        Epoch {
            id,
            branch: Arc::clone(&self.branch),
        }
    }

    /// Id of the most recently handed out epoch (0 if none).
    #[must_use]
    pub fn last(&self) -> EpochId {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}
