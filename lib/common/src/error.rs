use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A received message could not be interpreted.
///
/// Protocol errors never terminate a connection. The message is logged and dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("Unexpected message type {actual:?}, expected {expected:?}")]
    UnexpectedMessageType {
        expected: crate::MessageType,
        actual: crate::MessageType,
    },
    #[error("Message is truncated: expected at least {expected} bytes but got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Message is malformed: {0}")]
    Malformed(String),
}

/// An error related to loading or validating the [crate::KoralConfig].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
    #[error("The current computer {0} is not part of the cluster")]
    UnknownCurrentComputer(u16),
    #[error("The current computer could not be determined. Set current_id in the configuration")]
    MissingCurrentComputer,
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
