use crate::index::{IndexComponents, TripleIndex};

/// Represents a set of multiple indexes, each of which indexes a different ordering of the
/// triple components (e.g., SPO, POS). This is necessary as different triple patterns require
/// different index structures.
///
/// For example, the pattern `<S> <P> ?o` can be best served by having an SPO index. The scan
/// would then look up `<S>`, then `<P>`, and lastly scan the entries and bind them to `?o`.
/// However, the triple pattern `?s <P> <O>` cannot be efficiently evaluated with an SPO index.
/// For this pattern, the store uses the POS index.
#[derive(Debug, Clone)]
pub struct IndexPermutations {
    indexes: Vec<TripleIndex>,
}

impl IndexPermutations {
    /// Creates a new [IndexPermutations] with empty SPO, POS and OSP indexes.
    pub fn new() -> Self {
        Self {
            indexes: [
                IndexComponents::SPO,
                IndexComponents::POS,
                IndexComponents::OSP,
            ]
            .into_iter()
            .map(TripleIndex::new)
            .collect(),
        }
    }

    /// Finds an index with the given `configuration`.
    pub fn find_index(&self, configuration: IndexComponents) -> Option<&TripleIndex> {
        self.indexes
            .iter()
            .find(|index| index.components() == configuration)
    }

    /// Chooses the index for scanning the given `pattern`, given in SPO order.
    pub fn choose_index(&self, pattern: [Option<u64>; 3]) -> IndexComponents {
        self.indexes
            .iter()
            .rev() // Prefer SPO (max by uses the last on equality)
            .max_by_key(|index| index.compute_scan_score(pattern))
            .map_or(IndexComponents::SPO, TripleIndex::components)
    }

    pub fn len(&self) -> usize {
        self.indexes.first().map_or(0, TripleIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a triple into all indexes. Returns false if it already existed.
    pub fn insert(&mut self, spo: [u64; 3]) -> bool {
        let mut inserted = false;
        for index in &mut self.indexes {
            inserted = index.insert(spo);
        }
        inserted
    }

    pub fn clear(&mut self) {
        for index in &mut self.indexes {
            index.clear();
        }
    }
}

impl Default for IndexPermutations {
    fn default() -> Self {
        Self::new()
    }
}
