use crate::containment::{Containment, ContainmentMut};
use crate::MappingError;
use koral_common::MessageType;
use koral_model::{position_of, ComputerId, TaskId, UnboundVariableError, Variable};
use std::fmt::{Debug, Display, Formatter};

/// `[type][u64 receiver][u64 sender][u32 length]`
pub const MAPPING_HEADER_SIZE: usize = 21;

const RECEIVER_OFFSET: usize = 1;
const SENDER_OFFSET: usize = 9;
const LENGTH_OFFSET: usize = 17;
const VALUE_SIZE: usize = 8;

/// Returns the total size of a mapping with `number_of_variables` values.
pub fn mapping_size(number_of_variables: usize, containment_size: usize) -> usize {
    MAPPING_HEADER_SIZE + number_of_variables * VALUE_SIZE + containment_size
}

/// Reads the length field of the mapping that starts at `offset`.
pub(crate) fn length_field(bytes: &[u8], offset: usize) -> Option<usize> {
    let field = bytes.get(offset + LENGTH_OFFSET..offset + MAPPING_HEADER_SIZE)?;
    let field = <[u8; 4]>::try_from(field).ok()?;
    usize::try_from(u32::from_be_bytes(field)).ok()
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut value = [0; 8];
    value.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(value)
}

/// A read-only view of an encoded mapping.
///
/// The view borrows the buffer it was read from. For mappings received in a batch, this is the
/// batch buffer; the buffer can only be reused once all views are gone.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MappingView<'a> {
    bytes: &'a [u8],
    containment_size: usize,
}

impl<'a> MappingView<'a> {
    /// Creates a new [MappingView] after validating the layout of `bytes`.
    pub fn new(bytes: &'a [u8], containment_size: usize) -> Result<Self, MappingError> {
        let minimum = mapping_size(0, containment_size);
        if bytes.len() < minimum {
            return Err(MappingError::TooShort {
                minimum,
                actual: bytes.len(),
            });
        }
        if bytes[0] != MessageType::QueryMappingBatch.value() {
            return Err(MappingError::InvalidType(bytes[0]));
        }
        let field = length_field(bytes, 0).unwrap_or_default();
        if field != bytes.len() {
            return Err(MappingError::LengthMismatch {
                field,
                actual: bytes.len(),
            });
        }
        if (bytes.len() - minimum) % VALUE_SIZE != 0 {
            return Err(MappingError::MisalignedValues(bytes.len() - minimum));
        }
        Ok(Self::new_unchecked(bytes, containment_size))
    }

    pub(crate) fn new_unchecked(bytes: &'a [u8], containment_size: usize) -> Self {
        Self {
            bytes,
            containment_size,
        }
    }

    pub fn receiver(&self) -> TaskId {
        TaskId::from_u64(read_u64(self.bytes, RECEIVER_OFFSET))
    }

    pub fn sender(&self) -> TaskId {
        TaskId::from_u64(read_u64(self.bytes, SENDER_OFFSET))
    }

    /// Returns the size of the whole mapping including header and containment.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn number_of_variables(&self) -> usize {
        (self.bytes.len() - MAPPING_HEADER_SIZE - self.containment_size) / VALUE_SIZE
    }

    /// Returns true if no variable is bound. Empty mappings are the identity of joins.
    pub fn is_empty_mapping(&self) -> bool {
        self.number_of_variables() == 0
    }

    /// Returns the value at `index`.
    pub fn value_at(&self, index: usize) -> Option<u64> {
        (index < self.number_of_variables())
            .then(|| read_u64(self.bytes, MAPPING_HEADER_SIZE + index * VALUE_SIZE))
    }

    /// Returns all values in layout order.
    pub fn values(&self) -> impl Iterator<Item = u64> + 'a {
        let bytes = self.bytes;
        (0..self.number_of_variables())
            .map(move |index| read_u64(bytes, MAPPING_HEADER_SIZE + index * VALUE_SIZE))
    }

    /// Returns the value of `variable`, given that the layout of this mapping is `variables`.
    pub fn value(&self, variable: Variable, variables: &[Variable]) -> Result<u64, MappingError> {
        if self.is_empty_mapping() {
            return Err(MappingError::EmptyMapping);
        }
        position_of(variable, variables)
            .and_then(|index| self.value_at(index))
            .ok_or(MappingError::UnboundVariable(UnboundVariableError(
                variable.id(),
            )))
    }

    pub fn containment(&self) -> Containment<'a> {
        Containment::new(&self.bytes[self.bytes.len() - self.containment_size..])
    }

    pub fn containment_size(&self) -> usize {
        self.containment_size
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Displays the mapping with variable names.
    pub fn display(self, variables: &'a [Variable]) -> MappingDisplay<'a> {
        MappingDisplay {
            view: self,
            variables,
        }
    }
}

impl Debug for MappingView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("receiver", &self.receiver().to_string())
            .field("sender", &self.sender().to_string())
            .field("values", &self.values().collect::<Vec<_>>())
            .field(
                "containment",
                &self.containment().known_computers().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Displays a mapping as `{?v0=1, ?v1=2}`.
pub struct MappingDisplay<'a> {
    view: MappingView<'a>,
    variables: &'a [Variable],
}

impl Display for MappingDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (index, (variable, value)) in self.variables.iter().zip(self.view.values()).enumerate()
        {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{variable}={value}")?;
        }
        f.write_str("}")
    }
}

/// An owned mapping.
///
/// Mappings are handed out by a [crate::MappingRecycleCache] and given back with
/// [crate::MappingRecycleCache::release]. Releasing consumes the mapping, so it cannot be read
/// afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Mapping {
    bytes: Vec<u8>,
    containment_size: usize,
}

impl Mapping {
    /// Wraps a buffer whose layout has already been written.
    pub(crate) fn from_buffer(bytes: Vec<u8>, containment_size: usize) -> Self {
        Self {
            bytes,
            containment_size,
        }
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.bytes
    }

    pub fn view(&self) -> MappingView<'_> {
        MappingView::new_unchecked(&self.bytes, self.containment_size)
    }

    pub fn receiver(&self) -> TaskId {
        self.view().receiver()
    }

    pub fn sender(&self) -> TaskId {
        self.view().sender()
    }

    pub fn number_of_variables(&self) -> usize {
        self.view().number_of_variables()
    }

    pub fn is_empty_mapping(&self) -> bool {
        self.view().is_empty_mapping()
    }

    pub fn value(&self, variable: Variable, variables: &[Variable]) -> Result<u64, MappingError> {
        self.view().value(variable, variables)
    }

    pub fn values(&self) -> Vec<u64> {
        self.view().values().collect()
    }

    pub fn containment(&self) -> Containment<'_> {
        self.view().containment()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn set_receiver(&mut self, receiver: TaskId) {
        self.bytes[RECEIVER_OFFSET..SENDER_OFFSET].copy_from_slice(&receiver.as_u64().to_be_bytes());
    }

    pub fn set_sender(&mut self, sender: TaskId) {
        self.bytes[SENDER_OFFSET..LENGTH_OFFSET].copy_from_slice(&sender.as_u64().to_be_bytes());
    }

    pub fn containment_mut(&mut self) -> ContainmentMut<'_> {
        let start = self.bytes.len() - self.containment_size;
        ContainmentMut::new(&mut self.bytes[start..])
    }

    /// Marks this mapping as known by all slaves.
    pub fn set_containment_to_all(&mut self, number_of_slaves: u16) {
        self.containment_mut().set_to_all(number_of_slaves);
    }

    /// Moves the knowledge of this mapping from `current` to `next`.
    pub fn update_containment(&mut self, current: ComputerId, next: ComputerId) {
        self.containment_mut().update(current, next);
    }
}

impl Debug for Mapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.view().fmt(f)
    }
}

/// Writes the header of a mapping with `number_of_variables` values into `buffer`. The buffer is
/// cleared first, so no bytes of a previous use survive.
pub(crate) fn prepare_buffer(
    buffer: &mut Vec<u8>,
    number_of_variables: usize,
    containment_size: usize,
) {
    let size = mapping_size(number_of_variables, containment_size);
    buffer.clear();
    buffer.resize(size, 0);
    buffer[0] = MessageType::QueryMappingBatch.value();
    let size = u32::try_from(size).unwrap_or(u32::MAX);
    buffer[LENGTH_OFFSET..MAPPING_HEADER_SIZE].copy_from_slice(&size.to_be_bytes());
}

pub(crate) fn write_value(buffer: &mut [u8], index: usize, value: u64) {
    let offset = MAPPING_HEADER_SIZE + index * VALUE_SIZE;
    buffer[offset..offset + VALUE_SIZE].copy_from_slice(&value.to_be_bytes());
}
