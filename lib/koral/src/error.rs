use koral_common::ConfigError;
use koral_execution::QueryPlanError;
use koral_model::ComputerId;
use koral_network::NetworkError;
use koral_storage::StorageError;
use std::io;

/// An error raised while setting up a computer of the cluster or while submitting a query.
#[derive(Debug, thiserror::Error)]
pub enum KoralError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The network could not be set up.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// The graph chunk could not be loaded.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// No execution tree can be built for the query.
    #[error(transparent)]
    QueryPlan(#[from] QueryPlanError),
    /// Only the master accepts queries.
    #[error("Computer {0} is not the master")]
    NotMaster(ComputerId),
    #[error(transparent)]
    Io(#[from] io::Error),
}
