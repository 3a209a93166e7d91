use koral_common::ConfigError;
use koral_model::ComputerId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// An error that prevents the network from being set up.
///
/// Failures of individual sends are not errors; they are reported by
/// [crate::MessageTransport::send] and handled by the caller.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Could not bind to {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("No tokio runtime is available for the network")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("Computer {0} is not part of the cluster")]
    UnknownComputer(ComputerId),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
