use koral_common::ProtocolError;
use koral_model::UnboundVariableError;
use thiserror::Error;

/// An error that occurs while reading, building or combining mappings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Mapping is too short: expected at least {minimum} bytes but got {actual}")]
    TooShort { minimum: usize, actual: usize },
    #[error("Mapping length field {field} does not match its size {actual}")]
    LengthMismatch { field: usize, actual: usize },
    #[error("Mapping values of {0} bytes are not a multiple of 8")]
    MisalignedValues(usize),
    #[error("Expected a mapping but found message type {0}")]
    InvalidType(u8),
    #[error(transparent)]
    UnboundVariable(#[from] UnboundVariableError),
    #[error("Containment has {actual} bytes but the cluster requires {expected}")]
    ContainmentSize { expected: usize, actual: usize },
    #[error("Empty mappings do not bind any variable")]
    EmptyMapping,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
