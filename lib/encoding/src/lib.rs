//! The binary representation of mappings.
//!
//! A mapping is a partial variable binding produced by a query operator. It is encoded as
//! `[type][u64 receiver][u64 sender][u32 length][u64 value]*[containment]` so that it can be
//! shipped between computers without conversion. Owned [Mapping]s are handed out by a
//! per-thread [MappingRecycleCache]; received mappings are read through [MappingView]s that
//! borrow the batch buffer.

mod batch;
mod cache;
mod containment;
mod error;
mod mapping;

pub use batch::*;
pub use cache::MappingRecycleCache;
pub use containment::*;
pub use error::MappingError;
pub use mapping::{mapping_size, Mapping, MappingDisplay, MappingView, MAPPING_HEADER_SIZE};
