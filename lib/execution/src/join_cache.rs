use crate::QueryExecutionError;
use koral_encoding::{Mapping, MappingError, MappingRecycleCache, MappingView};
use koral_model::Variable;
use koral_storage::{FileKeyValueStore, KeyValueStore, KeyValueStoreError};
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::hash::BuildHasher;
use std::path::PathBuf;

/// The mappings one side of a join has consumed so far, indexed by their join key.
///
/// The first `max_in_memory_mappings` mappings stay in memory, distributed over a fixed number
/// of hash buckets. All further mappings are written to a [FileKeyValueStore].
pub struct JoinMappingCache {
    variables: Vec<Variable>,
    join_variables: Vec<Variable>,
    containment_size: usize,
    buckets: Vec<FxHashMap<Vec<u64>, Vec<Mapping>>>,
    hasher: FxBuildHasher,
    in_memory: usize,
    max_in_memory_mappings: usize,
    spilled: Option<FileKeyValueStore>,
    tmp_dir: PathBuf,
}

// `FxBuildHasher` does not implement `Debug`, so the stateless hasher is omitted.
impl std::fmt::Debug for JoinMappingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinMappingCache")
            .field("variables", &self.variables)
            .field("join_variables", &self.join_variables)
            .field("containment_size", &self.containment_size)
            .field("buckets", &self.buckets)
            .field("in_memory", &self.in_memory)
            .field("max_in_memory_mappings", &self.max_in_memory_mappings)
            .field("spilled", &self.spilled)
            .field("tmp_dir", &self.tmp_dir)
            .finish_non_exhaustive()
    }
}

impl JoinMappingCache {
    /// Creates a new [JoinMappingCache] for mappings whose layout is `variables`.
    pub fn new(
        variables: Vec<Variable>,
        join_variables: Vec<Variable>,
        containment_size: usize,
        number_of_buckets: usize,
        max_in_memory_mappings: usize,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            variables,
            join_variables,
            containment_size,
            buckets: (0..number_of_buckets.max(1))
                .map(|_| FxHashMap::default())
                .collect(),
            hasher: FxBuildHasher,
            in_memory: 0,
            max_in_memory_mappings,
            spilled: None,
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.in_memory + self.spilled_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spilled_len(&self) -> usize {
        self.spilled.as_ref().map_or(0, KeyValueStore::len)
    }

    /// Returns the values of the join variables of `mapping`.
    pub fn join_key(&self, mapping: MappingView<'_>) -> Result<Vec<u64>, MappingError> {
        self.join_variables
            .iter()
            .map(|variable| mapping.value(*variable, &self.variables))
            .collect()
    }

    fn bucket_of(&self, key: &[u64]) -> usize {
        let hash = self.hasher.hash_one(key);
        let buckets = u64::try_from(self.buckets.len()).unwrap_or(u64::MAX);
        usize::try_from(hash % buckets).unwrap_or_default()
    }

    /// Adds `mapping` to the cache. If it is spilled, its buffer is given back to `cache`.
    pub fn insert(
        &mut self,
        mapping: Mapping,
        cache: &mut MappingRecycleCache,
    ) -> Result<(), QueryExecutionError> {
        let key = self.join_key(mapping.view())?;
        if self.in_memory < self.max_in_memory_mappings {
            let bucket = self.bucket_of(&key);
            self.buckets[bucket].entry(key).or_default().push(mapping);
            self.in_memory += 1;
            return Ok(());
        }

        if self.spilled.is_none() {
            self.spilled = Some(FileKeyValueStore::new(&self.tmp_dir, self.buckets.len())?);
        }
        let Some(spilled) = &mut self.spilled else {
            return Err(KeyValueStoreError::Closed.into());
        };
        spilled.put(&encode_key(&key), mapping.as_bytes())?;
        cache.release(mapping);
        Ok(())
    }

    /// Calls `visit` for every cached mapping whose join key is `key`.
    ///
    /// In-memory mappings are visited first, in insertion order.
    pub fn probe(
        &mut self,
        key: &[u64],
        mut visit: impl FnMut(MappingView<'_>) -> Result<(), QueryExecutionError>,
    ) -> Result<(), QueryExecutionError> {
        let bucket = self.bucket_of(key);
        if let Some(mappings) = self.buckets[bucket].get(key) {
            for mapping in mappings {
                visit(mapping.view())?;
            }
        }
        if let Some(spilled) = &mut self.spilled {
            for bytes in spilled.get(&encode_key(key))? {
                visit(MappingView::new(&bytes, self.containment_size)?)?;
            }
        }
        Ok(())
    }

    /// Releases all in-memory mappings and deletes spilled data.
    pub fn close(&mut self, cache: &mut MappingRecycleCache) -> Result<(), QueryExecutionError> {
        for bucket in &mut self.buckets {
            for mapping in bucket.drain().flat_map(|(_, mappings)| mappings) {
                cache.release(mapping);
            }
        }
        self.in_memory = 0;
        if let Some(mut spilled) = self.spilled.take() {
            spilled.close()?;
        }
        Ok(())
    }
}

fn encode_key(key: &[u64]) -> Vec<u8> {
    key.iter().flat_map(|value| value.to_be_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use koral_model::{PatternTerm, TriplePattern};

    fn var(id: u64) -> Variable {
        Variable::new(id)
    }

    fn mapping(cache: &mut MappingRecycleCache, x: u64, y: u64) -> Mapping {
        let pattern = TriplePattern::new(
            PatternTerm::Variable(var(0)),
            PatternTerm::Resource(9),
            PatternTerm::Variable(var(1)),
        );
        cache.create_mapping(&pattern, [x, 9, y], &[0x80]).unwrap()
    }

    fn probe_values(join_cache: &mut JoinMappingCache, key: &[u64]) -> Vec<Vec<u64>> {
        let mut result = Vec::new();
        join_cache
            .probe(key, |view| {
                result.push(view.values().collect());
                Ok(())
            })
            .unwrap();
        result
    }

    #[test]
    fn probe_returns_mappings_with_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MappingRecycleCache::new(10, 2);
        let mut join_cache =
            JoinMappingCache::new(vec![var(0), var(1)], vec![var(0)], 1, 4, 100, dir.path());
        for (x, y) in [(1, 10), (2, 20), (1, 11)] {
            let mapping = mapping(&mut cache, x, y);
            join_cache.insert(mapping, &mut cache).unwrap();
        }
        assert_eq!(join_cache.len(), 3);
        assert_eq!(probe_values(&mut join_cache, &[1]), [[1, 10], [1, 11]]);
        assert!(probe_values(&mut join_cache, &[3]).is_empty());
    }

    #[test]
    fn mappings_beyond_memory_budget_are_spilled() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MappingRecycleCache::new(10, 2);
        let mut join_cache =
            JoinMappingCache::new(vec![var(0), var(1)], vec![var(0)], 1, 2, 1, dir.path());
        for (x, y) in [(1, 10), (1, 11), (2, 20)] {
            let mapping = mapping(&mut cache, x, y);
            join_cache.insert(mapping, &mut cache).unwrap();
        }
        assert_eq!(join_cache.spilled_len(), 2);
        assert_eq!(join_cache.len(), 3);
        assert_eq!(probe_values(&mut join_cache, &[1]), [[1, 10], [1, 11]]);
        assert_eq!(probe_values(&mut join_cache, &[2]), [[2, 20]]);

        join_cache.close(&mut cache).unwrap();
        assert!(join_cache.is_empty());
    }

    #[test]
    fn without_join_variables_every_mapping_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MappingRecycleCache::new(10, 2);
        let mut join_cache =
            JoinMappingCache::new(vec![var(0), var(1)], Vec::new(), 1, 4, 100, dir.path());
        for (x, y) in [(1, 10), (2, 20)] {
            let mapping = mapping(&mut cache, x, y);
            join_cache.insert(mapping, &mut cache).unwrap();
        }
        assert_eq!(probe_values(&mut join_cache, &[]).len(), 2);
    }
}
