//! The data model shared by all Koral crates.
//!
//! Koral operates purely on dictionary-encoded resources. A resource is a 64-bit
//! [ResourceId] whose upper 16 bits identify the slave that owns the resource. Query operators
//! are addressed by [TaskId]s that pack the computer, the query and the task within the query
//! into a single 64-bit value.

mod error;
mod id;
mod pattern;
mod variable;

pub use error::*;
pub use id::*;
pub use pattern::*;
pub use variable::*;
