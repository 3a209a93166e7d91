use crate::MessageListener;
use koral_common::{Message, MessageType};
use koral_execution::WorkerManager;
use koral_storage::TripleStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Passes the messages of the query protocol to the [WorkerManager] of a computer.
#[derive(Debug)]
pub struct QueryMessageListener {
    manager: Arc<WorkerManager>,
}

impl QueryMessageListener {
    pub fn new(manager: Arc<WorkerManager>) -> Self {
        Self { manager }
    }
}

impl MessageListener for QueryMessageListener {
    fn supported_types(&self) -> &'static [MessageType] {
        &[
            MessageType::QueryCreate,
            MessageType::QueryCreated,
            MessageType::QueryStart,
            MessageType::QueryAbortion,
            MessageType::QueryMappingBatch,
            MessageType::QueryTaskFinished,
            MessageType::QueryTaskFailed,
        ]
    }

    fn process(&self, message: &Message<'_>) {
        match message {
            Message::QueryCreate { query_id, tree } => self.manager.create_query(*query_id, tree),
            Message::QueryStart { query_id } => self.manager.start_query(*query_id),
            Message::QueryAbortion { query_id } => self.manager.abort_query(*query_id),
            message => {
                if let Err(error) = self.manager.receiver().receive(message) {
                    warn!("Dropping query message: {error}");
                }
            }
        }
    }
}

/// Aborts all running queries and empties the triple store when the master clears the cluster.
#[derive(Debug)]
pub struct ClearListener {
    manager: Arc<WorkerManager>,
    store: Option<Arc<dyn TripleStore>>,
}

impl ClearListener {
    pub fn new(manager: Arc<WorkerManager>, store: Option<Arc<dyn TripleStore>>) -> Self {
        Self { manager, store }
    }
}

impl MessageListener for ClearListener {
    fn supported_types(&self) -> &'static [MessageType] {
        &[MessageType::Clear]
    }

    fn process(&self, _message: &Message<'_>) {
        self.manager.clear();
        if let Some(store) = &self.store {
            store.clear();
        }
        info!("Cleared all queries and triples");
    }
}
