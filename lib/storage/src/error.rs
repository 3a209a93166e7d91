use std::io;
use thiserror::Error;

/// An error of the triple store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Line {line}: {reason}")]
    InvalidTriple { line: usize, reason: String },
    #[error("Containment has {actual} bytes but the store expects {expected}")]
    ContainmentSize { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An error of a [crate::KeyValueStore] or [crate::SpillQueue].
#[derive(Debug, Error)]
pub enum KeyValueStoreError {
    #[error("Spill storage is corrupted: {0}")]
    Corrupted(String),
    #[error("The store has been closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}
