//! Bundling of mappings into `QUERY_MAPPING_BATCH` messages.
//!
//! A batch is `[type][u16 sender computer]` followed by complete mappings. Each mapping carries
//! its own length, so a batch can be split without further framing.

use crate::mapping::{length_field, MAPPING_HEADER_SIZE};
use crate::{Mapping, MappingError, MappingView};
use koral_common::{MessageType, MAPPING_BATCH_HEADER_SIZE};
use koral_model::ComputerId;

/// Iterates over the mappings of a received batch. The views borrow the batch buffer.
#[derive(Debug, Clone)]
pub struct MappingBatchIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    containment_size: usize,
}

impl<'a> MappingBatchIter<'a> {
    /// Creates a new iterator over `mappings`, the payload after the batch header.
    pub fn new(mappings: &'a [u8], containment_size: usize) -> Self {
        Self {
            bytes: mappings,
            offset: 0,
            containment_size,
        }
    }
}

impl<'a> Iterator for MappingBatchIter<'a> {
    type Item = Result<MappingView<'a>, MappingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let remaining = self.bytes.len() - self.offset;
        let Some(length) = length_field(self.bytes, self.offset) else {
            self.offset = self.bytes.len();
            return Some(Err(MappingError::TooShort {
                minimum: MAPPING_HEADER_SIZE,
                actual: remaining,
            }));
        };
        if length < MAPPING_HEADER_SIZE || length > remaining {
            self.offset = self.bytes.len();
            return Some(Err(MappingError::LengthMismatch {
                field: length,
                actual: remaining,
            }));
        }
        let bytes = &self.bytes[self.offset..self.offset + length];
        self.offset += length;
        Some(MappingView::new(bytes, self.containment_size))
    }
}

/// Collects mappings for one destination into a batch message.
#[derive(Debug)]
pub struct MappingBatchBuilder {
    bytes: Vec<u8>,
    sender: ComputerId,
    count: usize,
    capacity: usize,
}

impl MappingBatchBuilder {
    /// Creates a new builder that is full after `capacity` mappings.
    pub fn new(sender: ComputerId, capacity: usize) -> Self {
        let mut builder = Self {
            bytes: Vec::new(),
            sender,
            count: 0,
            capacity,
        };
        builder.write_header();
        builder
    }

    fn write_header(&mut self) {
        self.bytes.clear();
        self.bytes.push(MessageType::QueryMappingBatch.value());
        self.bytes.extend_from_slice(&self.sender.to_be_bytes());
    }

    pub fn push(&mut self, mapping: &Mapping) {
        self.bytes.extend_from_slice(mapping.as_bytes());
        self.count += 1;
    }

    /// Returns the number of mappings in the batch.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    /// Returns the encoded message and resets the builder.
    pub fn take(&mut self) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.bytes.len());
        std::mem::swap(&mut message, &mut self.bytes);
        self.count = 0;
        self.write_header();
        message
    }

    /// Returns the encoded message.
    pub fn finish(mut self) -> Vec<u8> {
        self.take()
    }

    /// Returns the payload size in bytes, excluding the batch header.
    pub fn payload_size(&self) -> usize {
        self.bytes.len() - MAPPING_BATCH_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MappingRecycleCache;
    use koral_common::Message;
    use koral_model::{PatternTerm, TaskId, TriplePattern, Variable};

    fn mappings(cache: &mut MappingRecycleCache, values: &[u64]) -> Vec<Mapping> {
        let pattern = TriplePattern::new(
            PatternTerm::Variable(Variable::new(0)),
            PatternTerm::Resource(8),
            PatternTerm::Variable(Variable::new(1)),
        );
        values
            .iter()
            .map(|value| {
                let mut mapping = cache
                    .create_mapping(&pattern, [*value, 8, value + 1], &[0x80])
                    .unwrap();
                mapping.set_receiver(TaskId::new(2, 1, u16::try_from(*value).unwrap()));
                mapping
            })
            .collect()
    }

    #[test]
    fn batch_preserves_order() {
        let mut cache = MappingRecycleCache::new(10, 2);
        let mut builder = MappingBatchBuilder::new(1, 3);
        for mapping in mappings(&mut cache, &[1, 2, 3]) {
            builder.push(&mapping);
            cache.release(mapping);
        }
        assert!(builder.is_full());

        let message = builder.finish();
        let Message::QueryMappingBatch { sender, mappings } = Message::decode(&message).unwrap()
        else {
            panic!("expected a mapping batch");
        };
        assert_eq!(sender, 1);

        let receivers = MappingBatchIter::new(mappings, 1)
            .map(|view| view.unwrap().receiver().local_task_id())
            .collect::<Vec<_>>();
        assert_eq!(receivers, vec![1, 2, 3]);
    }

    #[test]
    fn take_resets_builder() {
        let mut cache = MappingRecycleCache::new(10, 1);
        let mut builder = MappingBatchBuilder::new(4, 2);
        for mapping in mappings(&mut cache, &[1]) {
            builder.push(&mapping);
        }
        let first = builder.take();
        assert!(builder.is_empty());
        assert_eq!(builder.payload_size(), 0);
        assert_eq!(first.len(), MAPPING_BATCH_HEADER_SIZE + MAPPING_HEADER_SIZE + 17);
    }

    #[test]
    fn truncated_batch_reports_error_once() {
        let mut cache = MappingRecycleCache::new(10, 1);
        let mut builder = MappingBatchBuilder::new(1, 2);
        for mapping in mappings(&mut cache, &[1, 2]) {
            builder.push(&mapping);
        }
        let mut message = builder.finish();
        message.truncate(message.len() - 4);

        let results = MappingBatchIter::new(&message[MAPPING_BATCH_HEADER_SIZE..], 1)
            .collect::<Vec<_>>();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(MappingError::LengthMismatch { .. })
        ));
    }
}
