use crate::index::{IndexComponents, IndexPermutations};
use crate::{GraphStatistics, StorageError};
use koral_model::{PatternTerm, TriplePattern};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

/// The number of triples a [TripleCursor] of the [MemTripleStore] reads while holding the lock.
pub const DEFAULT_CURSOR_BATCH_SIZE: usize = 1024;

/// A triple of the local chunk together with the computers that know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTriple {
    pub triple: [u64; 3],
    pub containment: Box<[u8]>,
}

/// A resumable cursor over the triples that match a pattern.
///
/// Matches are returned in the order of the index that is used for the lookup.
pub trait TripleCursor: Iterator<Item = StoredTriple> + Send + Debug {
    /// Returns true if [Iterator::next] will return another triple.
    fn has_next(&mut self) -> bool;
}

/// The chunk of the graph that is stored on a slave.
///
/// The store is filled before queries are executed and is read-only while queries run.
pub trait TripleStore: GraphStatistics + Send + Sync + Debug {
    /// Returns a cursor over all triples that match `pattern`.
    fn lookup(&self, pattern: &TriplePattern) -> Box<dyn TripleCursor>;

    /// Stores a triple. If it already exists, the containments are merged.
    fn store_triple(&self, triple: [u64; 3], containment: &[u8]) -> Result<(), StorageError>;

    fn clear(&self);

    fn size(&self) -> usize;

    /// The number of bytes of the containment of each triple.
    fn containment_size(&self) -> usize;
}

#[derive(Debug, Default)]
struct MemTripleStoreContent {
    indexes: IndexPermutations,
    containments: FxHashMap<[u64; 3], Box<[u8]>>,
}

/// A [TripleStore] that keeps SPO, POS and OSP permutations in memory.
#[derive(Debug, Clone)]
pub struct MemTripleStore {
    content: Arc<RwLock<MemTripleStoreContent>>,
    containment_size: usize,
    batch_size: usize,
}

impl MemTripleStore {
    /// Creates a new empty [MemTripleStore].
    pub fn new(containment_size: usize) -> Self {
        Self::with_batch_size(containment_size, DEFAULT_CURSOR_BATCH_SIZE)
    }

    pub fn with_batch_size(containment_size: usize, batch_size: usize) -> Self {
        Self {
            content: Arc::new(RwLock::new(MemTripleStoreContent::default())),
            containment_size,
            batch_size: batch_size.max(1),
        }
    }

    fn count(&self, pattern: [Option<u64>; 3]) -> u64 {
        let content = self.content.read();
        let components = content.indexes.choose_index(pattern);
        let count = content
            .indexes
            .find_index(components)
            .map_or(0, |index| index.count(pattern));
        u64::try_from(count).unwrap_or(u64::MAX)
    }
}

impl TripleStore for MemTripleStore {
    fn lookup(&self, pattern: &TriplePattern) -> Box<dyn TripleCursor> {
        let bound = pattern.terms().map(|term| term.as_resource());
        let components = self.content.read().indexes.choose_index(bound);
        Box::new(MemTripleCursor {
            content: Arc::clone(&self.content),
            pattern: *pattern,
            bound,
            components,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            batch_size: self.batch_size,
            containment_size: self.containment_size,
        })
    }

    fn store_triple(&self, triple: [u64; 3], containment: &[u8]) -> Result<(), StorageError> {
        if containment.len() != self.containment_size {
            return Err(StorageError::ContainmentSize {
                expected: self.containment_size,
                actual: containment.len(),
            });
        }
        let mut content = self.content.write();
        content.indexes.insert(triple);
        let stored = content
            .containments
            .entry(triple)
            .or_insert_with(|| vec![0; containment.len()].into_boxed_slice());
        for (stored, new) in stored.iter_mut().zip(containment) {
            *stored |= new;
        }
        Ok(())
    }

    fn clear(&self) {
        let mut content = self.content.write();
        content.indexes.clear();
        content.containments.clear();
    }

    fn size(&self) -> usize {
        self.content.read().indexes.len()
    }

    fn containment_size(&self) -> usize {
        self.containment_size
    }
}

impl GraphStatistics for MemTripleStore {
    fn subject_frequency(&self, subject: u64) -> u64 {
        self.count([Some(subject), None, None])
    }

    fn property_frequency(&self, property: u64) -> u64 {
        self.count([None, Some(property), None])
    }

    fn object_frequency(&self, object: u64) -> u64 {
        self.count([None, None, Some(object)])
    }

    fn chunk_size(&self) -> u64 {
        u64::try_from(self.size()).unwrap_or(u64::MAX)
    }
}

/// Reads the matches of a pattern batch-wise. The lock is only held while a batch is read.
#[derive(Debug)]
struct MemTripleCursor {
    content: Arc<RwLock<MemTripleStoreContent>>,
    pattern: TriplePattern,
    bound: [Option<u64>; 3],
    components: IndexComponents,
    after: Option<[u64; 3]>,
    buffer: VecDeque<StoredTriple>,
    exhausted: bool,
    batch_size: usize,
    containment_size: usize,
}

impl MemTripleCursor {
    fn fetch(&mut self) {
        while self.buffer.is_empty() && !self.exhausted {
            let content = self.content.read();
            let Some(index) = content.indexes.find_index(self.components) else {
                self.exhausted = true;
                return;
            };
            let keys = index.scan(self.bound, self.after, self.batch_size);
            if keys.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some(last) = keys.last() {
                self.after = Some(*last);
            }

            for key in keys {
                let triple = self.components.restore(key);
                if !matches(&self.pattern, triple) {
                    continue;
                }
                let containment = content
                    .containments
                    .get(&triple)
                    .cloned()
                    .unwrap_or_else(|| vec![0; self.containment_size].into_boxed_slice());
                self.buffer.push_back(StoredTriple {
                    triple,
                    containment,
                });
            }
        }
    }
}

impl Iterator for MemTripleCursor {
    type Item = StoredTriple;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch();
        self.buffer.pop_front()
    }
}

impl TripleCursor for MemTripleCursor {
    fn has_next(&mut self) -> bool {
        self.fetch();
        !self.buffer.is_empty()
    }
}

/// Checks the bound positions and that a repeated variable is bound to the same value.
fn matches(pattern: &TriplePattern, triple: [u64; 3]) -> bool {
    let terms = pattern.terms();
    terms.iter().enumerate().all(|(position, term)| match term {
        PatternTerm::Resource(resource) => triple[position] == *resource,
        PatternTerm::Variable(variable) => terms[..position]
            .iter()
            .zip(triple)
            .filter(|(other, _)| other.as_variable() == Some(*variable))
            .all(|(_, value)| value == triple[position]),
    })
}
