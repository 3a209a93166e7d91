//! Distributed execution of queries over the chunks of a Koral cluster.
//!
//! Every operator of a [QueryExecutionTree] runs as one [QueryOperatorTask] per slave. Tasks
//! are scheduled cooperatively on the worker threads of a [WorkerManager] and exchange
//! mappings through [MessageSenderBuffer]s and the [MessageReceiver] of each computer. The
//! [QueryExecutionCoordinator] on the master collects the results of the root tasks.

mod builder;
mod coordinator;
mod error;
mod factory;
mod inbox;
mod join_cache;
pub mod operators;
mod queue;
mod receiver;
pub mod routing;
mod sender;
mod state;
mod task;
pub mod tree;
mod worker;

pub use builder::{QueryExecutionTreeBuilder, QueryExecutionTreeType, QueryPlan};
pub use coordinator::{ClientMessage, CoordinatorSettings, QueryExecutionCoordinator, ResultSink};
pub use error::*;
pub use factory::{QueryTaskFactory, TaskSettings};
pub use inbox::TaskInbox;
pub use join_cache::JoinMappingCache;
pub use queue::MappingQueue;
pub use receiver::MessageReceiver;
pub use sender::MessageSenderBuffer;
pub use state::QueryTaskState;
pub use task::{Emitter, QueryOperatorTask, TaskContext, TaskInputs, WorkerTask};
pub use tree::QueryExecutionTree;
pub use worker::{Worker, WorkerManager, WorkerTaskComparator, IDLE_SLEEP};
