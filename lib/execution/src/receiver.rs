use crate::inbox::TaskInbox;
use crate::QueryExecutionError;
use dashmap::DashMap;
use itertools::Itertools;
use koral_common::Message;
use koral_encoding::{Mapping, MappingBatchIter, MappingRecycleCache};
use koral_model::{QueryId, TaskId};
use koral_network::MessageTransport;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// The registry of all tasks of this computer, keyed by their base id.
///
/// Mappings and control messages are addressed to a task id, but every computer only looks at
/// the base id and hands the message to its own replica. Messages for unknown tasks, e.g.,
/// tasks of an aborted query, are dropped.
#[derive(Debug)]
pub struct MessageReceiver {
    transport: Arc<dyn MessageTransport>,
    tasks: DashMap<u64, Arc<TaskInbox>, FxBuildHasher>,
    cache: Mutex<MappingRecycleCache>,
}

impl MessageReceiver {
    /// Creates a new [MessageReceiver] whose mapping cache keeps `cache_capacity` buffers.
    pub fn new(transport: Arc<dyn MessageTransport>, cache_capacity: usize) -> Self {
        let cache = MappingRecycleCache::new(cache_capacity, transport.number_of_slaves());
        Self {
            transport,
            tasks: DashMap::with_hasher(FxBuildHasher),
            cache: Mutex::new(cache),
        }
    }

    pub fn register(&self, inbox: Arc<TaskInbox>) {
        self.tasks.insert(inbox.id().base_id(), inbox);
    }

    pub fn unregister(&self, task: TaskId) {
        self.tasks.remove(&task.base_id());
    }

    pub fn get(&self, task: TaskId) -> Option<Arc<TaskInbox>> {
        self.tasks
            .get(&task.base_id())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_of_query(&self, query_id: QueryId) -> Vec<Arc<TaskInbox>> {
        self.tasks
            .iter()
            .filter(|entry| entry.value().id().query_id() == query_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the ids of all queries with registered tasks in ascending order.
    pub fn query_ids(&self) -> Vec<QueryId> {
        self.tasks
            .iter()
            .map(|entry| entry.value().id().query_id())
            .sorted_unstable()
            .dedup()
            .collect()
    }

    pub fn unregister_query(&self, query_id: QueryId) {
        self.tasks
            .retain(|_, inbox| inbox.id().query_id() != query_id);
    }

    /// Hands a mapping of a task on this computer to its receiver.
    pub fn deliver(
        &self,
        mapping: Mapping,
        cache: &mut MappingRecycleCache,
    ) -> Result<(), QueryExecutionError> {
        match self.get(mapping.receiver()) {
            Some(inbox) => inbox.enqueue(mapping.sender(), mapping),
            None => {
                trace!(receiver = %mapping.receiver(), "Dropping mapping for unknown task");
                cache.release(mapping);
                Ok(())
            }
        }
    }

    /// Processes a received query message.
    ///
    /// Messages that create, start or abort queries are handled by the
    /// [crate::WorkerManager] and ignored here.
    pub fn receive(&self, message: &Message<'_>) -> Result<(), QueryExecutionError> {
        match message {
            Message::QueryMappingBatch { mappings, .. } => self.receive_mappings(mappings),
            Message::QueryTaskFinished { .. } | Message::QueryCreated { .. } => {
                let Some(task) = message.receiving_task() else {
                    return Ok(());
                };
                let Some(inbox) = self.get(task) else {
                    trace!(task_id = %task, "Dropping {} for unknown task", message.message_type());
                    return Ok(());
                };
                if matches!(message, Message::QueryCreated { .. }) {
                    inbox.notify_created();
                } else {
                    inbox.notify_finished();
                }
                Ok(())
            }
            Message::QueryTaskFailed {
                sender,
                coordinator,
                message,
            } => {
                match self.get(*coordinator) {
                    Some(inbox) => {
                        inbox.record_failure(format!("Slave {sender}: {message}"));
                    }
                    None => trace!(task_id = %coordinator, "Dropping failure for unknown query"),
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn receive_mappings(&self, mappings: &[u8]) -> Result<(), QueryExecutionError> {
        let mut cache = self.cache.lock();
        let containment_size = cache.containment_size();
        for view in MappingBatchIter::new(mappings, containment_size) {
            let view = view?;
            let receiver = view.receiver();
            let Some(inbox) = self.get(receiver) else {
                trace!(receiver = %receiver, "Dropping mapping for unknown task");
                continue;
            };
            let mapping = cache.copy_of(view);
            if let Err(error) = inbox.enqueue(view.sender(), mapping) {
                self.report_failure(receiver, &error);
            }
        }
        Ok(())
    }

    /// Tells the coordinator of the query of `task` that `task` cannot continue.
    pub fn report_failure(&self, task: TaskId, error: &QueryExecutionError) {
        error!(task_id = %task, "Task failed: {error}");
        let coordinator = TaskId::coordinator(task.query_id());
        if coordinator.computer_id() == self.transport.current_id() {
            if let Some(inbox) = self.get(coordinator) {
                inbox.record_failure(error.to_string());
            }
            return;
        }
        let message = Message::QueryTaskFailed {
            sender: self.transport.current_id(),
            coordinator,
            message: &error.to_string(),
        }
        .encode();
        if !self.transport.send(coordinator.computer_id(), &message) {
            warn!(task_id = %task, "Could not report failure to the coordinator");
        }
    }
}
