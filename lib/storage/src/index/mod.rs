//! Contains the permutation indexes of the in-memory triple store.
//!
//! A triple index represents a particular sorting of the triple components subject, property
//! and object. For example, the [IndexComponents::SPO] index represents that exact ordering
//! while the [IndexComponents::POS] has the property as the first component. Different types of
//! triple patterns are better suited for different indexes. [IndexPermutations] manages all
//! three permutations and chooses the index for a pattern.

mod components;
mod permutations;

pub use components::*;
pub use permutations::*;
use std::collections::BTreeSet;
use std::ops::Bound;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Duplicate indexed component given.")]
pub struct IndexComponentsCreationError;

/// A single sorted index with a given ordering. Keys are stored in the order of the index.
#[derive(Debug, Clone)]
pub struct TripleIndex {
    components: IndexComponents,
    keys: BTreeSet<[u64; 3]>,
}

impl TripleIndex {
    /// Creates a new empty [TripleIndex].
    pub fn new(components: IndexComponents) -> Self {
        Self {
            components,
            keys: BTreeSet::new(),
        }
    }

    pub fn components(&self) -> IndexComponents {
        self.components
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Computes the "scan score" for the bound positions `pattern` given in SPO order.
    ///
    /// The score is the length of the bound prefix in the order of this index.
    pub fn compute_scan_score(&self, pattern: [Option<u64>; 3]) -> usize {
        self.components
            .reorder(pattern)
            .iter()
            .take_while(|value| value.is_some())
            .count()
    }

    /// Inserts a triple in SPO order. Returns false if it already existed.
    pub fn insert(&mut self, spo: [u64; 3]) -> bool {
        self.keys.insert(self.components.reorder(spo))
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Returns up to `limit` keys that start with the bound prefix of `pattern` and are greater
    /// than `after`. The keys are in the order of this index.
    pub fn scan(
        &self,
        pattern: [Option<u64>; 3],
        after: Option<[u64; 3]>,
        limit: usize,
    ) -> Vec<[u64; 3]> {
        let pattern = self.components.reorder(pattern);
        let prefix = pattern
            .iter()
            .map_while(|value| *value)
            .collect::<Vec<_>>();
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => {
                let mut start = [0; 3];
                start[..prefix.len()].copy_from_slice(&prefix);
                Bound::Included(start)
            }
        };
        self.keys
            .range((lower, Bound::Unbounded))
            .take_while(|key| key.starts_with(&prefix))
            .take(limit)
            .copied()
            .collect()
    }

    /// Counts the keys that start with the bound prefix of `pattern`.
    pub fn count(&self, pattern: [Option<u64>; 3]) -> usize {
        let pattern = self.components.reorder(pattern);
        let prefix = pattern
            .iter()
            .map_while(|value| *value)
            .collect::<Vec<_>>();
        let mut start = [0; 3];
        start[..prefix.len()].copy_from_slice(&prefix);
        self.keys
            .range(start..)
            .take_while(|key| key.starts_with(&prefix))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TripleIndex {
        let mut index = TripleIndex::new(IndexComponents::POS);
        index.insert([1, 42, 2]);
        index.insert([3, 42, 4]);
        index.insert([5, 7, 2]);
        index
    }

    #[test]
    fn scan_score_is_bound_prefix() {
        let index = index();
        assert_eq!(index.compute_scan_score([None, Some(42), Some(2)]), 2);
        assert_eq!(index.compute_scan_score([Some(1), None, Some(2)]), 0);
    }

    #[test]
    fn scan_resumes_after_key() {
        let index = index();
        let first = index.scan([None, Some(42), None], None, 1);
        assert_eq!(first, vec![[42, 2, 1]]);
        let rest = index.scan([None, Some(42), None], first.last().copied(), 10);
        assert_eq!(rest, vec![[42, 4, 3]]);
        assert_eq!(index.count([None, Some(42), None]), 2);
        assert_eq!(index.count([None, None, None]), 3);
    }
}
