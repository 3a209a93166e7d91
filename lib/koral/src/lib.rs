//! Master and slave processes of a Koral cluster.
//!
//! A [KoralMaster] accepts queries, builds their execution trees and coordinates them. Each
//! [KoralSlave] holds one chunk of the graph and executes its share of every query. Both run
//! a [KoralSystem] control loop that hands the received messages to its [MessageListener]s.

pub mod error;
mod listener;
mod master;
mod slave;
mod system;

pub use listener::{ClearListener, QueryMessageListener};
pub use master::KoralMaster;
pub use slave::KoralSlave;
pub use system::{KoralSystem, MessageListener};

pub mod model {
    pub use koral_model::*;
}

pub mod common {
    pub use koral_common::*;
}

pub mod execution {
    pub use koral_execution::*;
}

pub mod network {
    pub use koral_network::*;
}

pub mod storage {
    pub use koral_storage::*;
}
