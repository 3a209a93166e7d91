use crate::QueryExecutionError;
use koral_encoding::{Mapping, MappingRecycleCache};
use koral_storage::SpillQueue;
use std::collections::VecDeque;
use std::path::PathBuf;

/// The FIFO input queue of one child of a task.
///
/// The first `in_memory_capacity` mappings are kept in memory. Further mappings are written to
/// a [SpillQueue] until it runs empty again, which keeps the order of all mappings intact.
#[derive(Debug)]
pub struct MappingQueue {
    in_memory: VecDeque<Mapping>,
    in_memory_capacity: usize,
    spilled: SpillQueue,
}

impl MappingQueue {
    /// Creates a new [MappingQueue] that spills to files in `tmp_dir`.
    pub fn new(in_memory_capacity: usize, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            in_memory: VecDeque::new(),
            in_memory_capacity,
            spilled: SpillQueue::new(tmp_dir),
        }
    }

    pub fn len(&self) -> usize {
        self.in_memory.len() + self.spilled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of mappings that currently live on disk.
    pub fn spilled_len(&self) -> usize {
        self.spilled.len()
    }

    pub fn push(&mut self, mapping: Mapping) -> Result<(), QueryExecutionError> {
        if self.spilled.is_empty() && self.in_memory.len() < self.in_memory_capacity {
            self.in_memory.push_back(mapping);
            return Ok(());
        }
        self.spilled.push(mapping.as_bytes())?;
        Ok(())
    }

    /// Removes the oldest mapping. Spilled mappings are read into buffers of `cache`.
    pub fn pop(
        &mut self,
        cache: &mut MappingRecycleCache,
    ) -> Result<Option<Mapping>, QueryExecutionError> {
        if let Some(mapping) = self.in_memory.pop_front() {
            return Ok(Some(mapping));
        }
        match self.spilled.pop()? {
            Some(bytes) => Ok(Some(cache.create_mapping_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drops all queued mappings. In-memory buffers are given back to `cache`.
    pub fn clear(&mut self, cache: &mut MappingRecycleCache) -> Result<(), QueryExecutionError> {
        for mapping in self.in_memory.drain(..) {
            cache.release(mapping);
        }
        self.spilled.clear()?;
        Ok(())
    }
}
