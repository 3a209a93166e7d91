use crate::mapping::{prepare_buffer, write_value, MAPPING_HEADER_SIZE};
use crate::{containment_size, Mapping, MappingError, MappingView};
use koral_model::{position_of, TriplePattern, UnboundVariableError, Variable};

/// A pool of mapping buffers that belongs to a single worker thread.
///
/// The cache never blocks. If it is empty, a new buffer is allocated. If it is full, released
/// buffers are dropped. Every buffer is cleared before it is handed out again.
#[derive(Debug)]
pub struct MappingRecycleCache {
    pool: Vec<Vec<u8>>,
    capacity: usize,
    number_of_slaves: u16,
    containment_size: usize,
}

impl MappingRecycleCache {
    /// Creates a new [MappingRecycleCache] that keeps at most `capacity` buffers.
    pub fn new(capacity: usize, number_of_slaves: u16) -> Self {
        Self {
            pool: Vec::new(),
            capacity,
            number_of_slaves,
            containment_size: containment_size(number_of_slaves),
        }
    }

    pub fn number_of_slaves(&self) -> u16 {
        self.number_of_slaves
    }

    pub fn containment_size(&self) -> usize {
        self.containment_size
    }

    /// Returns the number of buffers that are ready for reuse.
    pub fn pooled_buffers(&self) -> usize {
        self.pool.len()
    }

    fn take_buffer(&mut self, number_of_variables: usize) -> Vec<u8> {
        let mut buffer = self.pool.pop().unwrap_or_default();
        prepare_buffer(&mut buffer, number_of_variables, self.containment_size);
        buffer
    }

    fn take_copy(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut buffer = self.pool.pop().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(bytes);
        buffer
    }

    fn check_containment(&self, containment: &[u8]) -> Result<(), MappingError> {
        if containment.len() != self.containment_size {
            return Err(MappingError::ContainmentSize {
                expected: self.containment_size,
                actual: containment.len(),
            });
        }
        Ok(())
    }

    fn write_containment(buffer: &mut [u8], containment: &[u8]) {
        let start = buffer.len() - containment.len();
        buffer[start..].copy_from_slice(containment);
    }

    /// Creates the mapping of a matched `triple`.
    ///
    /// Only the free positions of `pattern` become values, in the order of
    /// [TriplePattern::variables]. The containment is copied from the stored triple.
    pub fn create_mapping(
        &mut self,
        pattern: &TriplePattern,
        triple: [u64; 3],
        containment: &[u8],
    ) -> Result<Mapping, MappingError> {
        self.check_containment(containment)?;
        let terms = pattern.terms();
        let variables = pattern.variables();
        let mut buffer = self.take_buffer(variables.len());
        for (index, variable) in variables.iter().enumerate() {
            let position = terms
                .iter()
                .position(|term| term.as_variable() == Some(*variable))
                .ok_or(UnboundVariableError(variable.id()))?;
            write_value(&mut buffer, index, triple[position]);
        }
        Self::write_containment(&mut buffer, containment);
        Ok(Mapping::from_buffer(buffer, self.containment_size))
    }

    /// Creates a mapping without values that is not known by any computer yet.
    pub fn create_empty_mapping(&mut self) -> Mapping {
        let buffer = self.take_buffer(0);
        Mapping::from_buffer(buffer, self.containment_size)
    }

    /// Copies a mapping out of a received buffer after validating it.
    pub fn create_mapping_from_bytes(&mut self, bytes: &[u8]) -> Result<Mapping, MappingError> {
        let view = MappingView::new(bytes, self.containment_size)?;
        Ok(self.copy_of(view))
    }

    /// Copies `view` into an owned mapping.
    pub fn copy_of(&mut self, view: MappingView<'_>) -> Mapping {
        let buffer = self.take_copy(view.as_bytes());
        Mapping::from_buffer(buffer, view.containment_size())
    }

    pub fn clone_mapping(&mut self, mapping: &Mapping) -> Mapping {
        self.copy_of(mapping.view())
    }

    /// Projects `mapping`, whose layout is `variables`, onto `selected`.
    ///
    /// The values of the result follow the order of `selected`. Receiver, sender and
    /// containment are kept.
    pub fn restrict_mapping(
        &mut self,
        selected: &[Variable],
        mapping: MappingView<'_>,
        variables: &[Variable],
    ) -> Result<Mapping, MappingError> {
        let mut buffer = self.take_buffer(selected.len());
        for (index, variable) in selected.iter().enumerate() {
            match mapping.value(*variable, variables) {
                Ok(value) => write_value(&mut buffer, index, value),
                Err(error) => {
                    self.recycle(buffer);
                    return Err(error);
                }
            }
        }
        let routing = 1..MAPPING_HEADER_SIZE - 4;
        buffer[routing.clone()].copy_from_slice(&mapping.as_bytes()[routing]);
        Self::write_containment(&mut buffer, mapping.containment().as_bytes());
        Ok(Mapping::from_buffer(buffer, self.containment_size))
    }

    /// Joins two mappings.
    ///
    /// Returns `None` if the mappings disagree on a shared variable. The values of the result
    /// follow `result_variables`. A computer knows the result only if it knows both inputs.
    /// An empty mapping binds nothing and joins with every mapping.
    pub fn join_mappings(
        &mut self,
        result_variables: &[Variable],
        first: MappingView<'_>,
        first_variables: &[Variable],
        second: MappingView<'_>,
        second_variables: &[Variable],
    ) -> Result<Option<Mapping>, MappingError> {
        let first_variables: &[Variable] = if first.is_empty_mapping() {
            &[]
        } else {
            first_variables
        };
        let second_variables: &[Variable] = if second.is_empty_mapping() {
            &[]
        } else {
            second_variables
        };

        let mut values = Vec::with_capacity(result_variables.len());
        for variable in result_variables {
            let value = match (
                position_of(*variable, first_variables),
                position_of(*variable, second_variables),
            ) {
                (Some(_), Some(_)) => {
                    let lhs = first.value(*variable, first_variables)?;
                    let rhs = second.value(*variable, second_variables)?;
                    if lhs != rhs {
                        return Ok(None);
                    }
                    lhs
                }
                (Some(_), None) => first.value(*variable, first_variables)?,
                (None, Some(_)) => second.value(*variable, second_variables)?,
                (None, None) => return Err(UnboundVariableError(variable.id()).into()),
            };
            values.push(value);
        }

        let mut buffer = self.take_buffer(values.len());
        for (index, value) in values.into_iter().enumerate() {
            write_value(&mut buffer, index, value);
        }
        Self::write_containment(&mut buffer, first.containment().as_bytes());
        let mut result = Mapping::from_buffer(buffer, self.containment_size);
        result.containment_mut().intersect(second.containment());
        Ok(Some(result))
    }

    /// Gives the buffer of `mapping` back to the cache.
    pub fn release(&mut self, mapping: Mapping) {
        self.recycle(mapping.into_buffer());
    }

    fn recycle(&mut self, buffer: Vec<u8>) {
        if self.pool.len() < self.capacity {
            self.pool.push(buffer);
        }
    }
}
