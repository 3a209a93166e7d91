use koral_common::ProtocolError;
use koral_encoding::MappingError;
use koral_model::{ComputerId, InvalidTriplePatternTypeError, PatternParseError, TaskId};
use koral_storage::KeyValueStoreError;
use thiserror::Error;

/// An error that fails the execution of a query task.
///
/// A failing task reports the error to the coordinator of its query, which in turn aborts the
/// query on all slaves.
#[derive(Debug, Error)]
pub enum QueryExecutionError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Spilling intermediate results failed")]
    Spill(#[from] KeyValueStoreError),
    #[error(transparent)]
    Tree(#[from] TreeDeserializationError),
    #[error("The operation {0} is not supported")]
    UnsupportedOperation(&'static str),
    #[error("Could not send mappings to computer {receiver} after {attempts} attempts")]
    SendFailed {
        receiver: ComputerId,
        attempts: usize,
    },
    #[error("Computer {0} is not part of the cluster")]
    UnknownComputer(ComputerId),
    #[error("Matching triple patterns requires a triple store")]
    MissingTripleStore,
    #[error("Task {0} received a mapping from {1} which is none of its children")]
    UnknownChild(TaskId, TaskId),
}

/// A serialized query execution tree could not be read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeDeserializationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Unknown operator type {0}")]
    UnknownOperatorType(i32),
    #[error(transparent)]
    InvalidPatternType(#[from] InvalidTriplePatternTypeError),
    #[error("Negative value {value} for {field}")]
    NegativeValue { field: &'static str, value: i64 },
    #[error("Serialized task id {0:#x} must not contain a computer id")]
    InvalidTaskId(u64),
    #[error("{0} trailing bytes after the query execution tree")]
    TrailingBytes(usize),
}

/// A textual query could not be turned into a query execution tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryPlanError {
    #[error(transparent)]
    Pattern(#[from] PatternParseError),
    #[error("The query contains no triple pattern")]
    Empty,
    #[error("The projected variable ?{0} does not occur in the query")]
    UnknownVariable(String),
    #[error("The query has more than {0} operators")]
    TooManyOperators(u16),
}
