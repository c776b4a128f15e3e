//! Collections shared by the journal arena and the per-pass side tables
//!
//! Handles into the arena are plain indices. Slots are never reused, so a
//! handle that outlives its entity finds an empty slot instead of a
//! different entity.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

use fnv::FnvHasher;
use indexmap::IndexMap;

/// Fast HashMap using FNV hasher for small keys
pub type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<FnvHasher>>;

/// Fast HashSet using FNV hasher for small keys
pub type FastHashSet<K> = HashSet<K, BuildHasherDefault<FnvHasher>>;

/// Order-preserving HashMap for insertion-order sensitive data (tags, metadata)
pub type OrderedMap<K, V> = IndexMap<K, V>;

/// Sparse slot storage: indices grow monotonically, removed slots stay empty
#[derive(Debug, Clone)]
pub struct SparseVec<T> {
    data: FastHashMap<usize, T>,
    len: usize,
}

impl<T> Default for SparseVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseVec<T> {
    pub fn new() -> Self {
        Self { data: FastHashMap::default(), len: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: FastHashMap::with_capacity_and_hasher(capacity, BuildHasherDefault::default()),
            len: 0,
        }
    }

    /// Store `value` in a fresh slot and return its index
    pub fn push(&mut self, value: T) -> usize {
        let index = self.len;
        self.insert(index, value);
        index
    }

    /// Insert an element at the given index
    pub fn insert(&mut self, index: usize, value: T) {
        if index >= self.len {
            self.len = index + 1;
        }
        self.data.insert(index, value);
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(&index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.data.contains_key(&index)
    }

    /// Empty a slot. The index is not handed out again.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.data.remove(&index)
    }

    /// Highest index ever used + 1
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of occupied slots
    pub fn occupied_count(&self) -> usize {
        self.data.len()
    }

    /// Occupied indices in ascending order
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.data.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Iterate over occupied indices and their values, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.data.iter().map(|(&k, v)| (k, v))
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_vec_basic_operations() {
        let mut sv = SparseVec::new();
        sv.insert(10, "ten");
        sv.insert(5, "five");

        assert_eq!(sv.get(10), Some(&"ten"));
        assert_eq!(sv.get(5), Some(&"five"));
        assert_eq!(sv.get(50), None);
        assert_eq!(sv.len(), 11);
        assert_eq!(sv.occupied_count(), 2);
        assert_eq!(sv.indices(), vec![5, 10]);
    }

    #[test]
    fn test_push_never_reuses_removed_slots() {
        let mut sv = SparseVec::new();
        let a = sv.push('a');
        let b = sv.push('b');
        assert_eq!(sv.remove(b), Some('b'));
        let c = sv.push('c');

        assert_eq!((a, b, c), (0, 1, 2));
        assert!(!sv.contains(b));
        assert_eq!(sv.get(c), Some(&'c'));
    }

    #[test]
    fn test_fast_hash_map() {
        let mut map: FastHashMap<usize, &str> = FastHashMap::default();
        map.insert(1, "one");
        assert_eq!(map.get(&1), Some(&"one"));
    }

    #[test]
    fn test_ordered_map() {
        let mut map: OrderedMap<&str, i32> = OrderedMap::new();
        map.insert("z", 1);
        map.insert("a", 2);
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
