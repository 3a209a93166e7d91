//! Messaging between the master (id 0) and the slaves (ids 1 to n) of a Koral cluster.
//!
//! [NetworkManager] connects the members over TCP. [MemoryCluster] connects members that run
//! within the same process. Both implement [MessageTransport], which is all the query engine
//! depends on.

mod context;
mod error;
pub mod framing;
mod manager;
mod memory;
mod transport;

pub use context::NetworkContext;
pub use error::NetworkError;
pub use manager::NetworkManager;
pub use memory::{MemoryCluster, MemoryTransport};
pub use transport::MessageTransport;
