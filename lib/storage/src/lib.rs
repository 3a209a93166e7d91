//! Storage of the graph chunk of a slave and of intermediate query data.
//!
//! [MemTripleStore] holds the triples of the local chunk in three permutation indexes and
//! answers triple pattern lookups with resumable cursors. [KeyValueStore]s and [SpillQueue]s
//! move intermediate mappings to disk once they exceed their in-memory budget.

mod error;
pub mod index;
mod kv;
mod loader;
mod spill;
mod statistics;
mod store;

pub use error::*;
pub use kv::*;
pub use loader::load_triples;
pub use spill::SpillQueue;
pub use statistics::*;
pub use store::*;
