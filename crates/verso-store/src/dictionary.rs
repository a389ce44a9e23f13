//! Dense integer codes for arbitrary attribute values.

use std::hash::Hash;

use hashbrown::HashMap;

/// Assigns each distinct key the next position, starting at 0.
///
/// Positions are valid attribute values: non-negative and dense, which keeps
/// bitmap index levels and imprint bins small.
#[derive(Debug, Clone)]
pub struct Dictionary<K> {
    positions: HashMap<K, i32>,
    keys: Vec<K>,
}

impl<K: Hash + Eq + Clone> Dictionary<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            keys: Vec::new(),
        }
    }

    /// Position of `key`, assigning one if it is new.
    pub fn map(&mut self, key: K) -> i32 {
        if let Some(&position) = self.positions.get(&key) {
            return position;
        }
        let position = self.keys.len() as i32;
        self.keys.push(key.clone());
        self.positions.insert(key, position);
        position
    }

    /// Position of `key`, if it was mapped.
    #[must_use]
    pub fn position(&self, key: &K) -> Option<i32> {
        self.positions.get(key).copied()
    }

    /// Key at `position`.
    #[must_use]
    pub fn read(&self, position: i32) -> Option<&K> {
        usize::try_from(position).ok().and_then(|position| self.keys.get(position))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for Dictionary<K> {
    fn default() -> Self {
        Self::new()
    }
}
