use crate::queue::MappingQueue;
use crate::state::{AtomicTaskState, QueryTaskState};
use crate::QueryExecutionError;
use koral_encoding::{Mapping, MappingRecycleCache};
use koral_model::TaskId;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// The part of a task that is shared with the threads that deliver messages to it.
///
/// A task itself is owned by exactly one worker thread. Mappings, finish notifications and
/// state changes from the control loop reach it through its [TaskInbox], which is registered
/// with the [crate::MessageReceiver] under the base id of the task.
#[derive(Debug)]
pub struct TaskInbox {
    id: TaskId,
    state: AtomicTaskState,
    children: Vec<u64>,
    queues: Vec<Mutex<MappingQueue>>,
    finish_notifications: AtomicU32,
    created_notifications: AtomicU32,
    failures: Mutex<Vec<String>>,
}

impl TaskInbox {
    /// Creates a new [TaskInbox] with one input queue per child.
    pub fn new(id: TaskId, children: &[TaskId], queue_capacity: usize, tmp_dir: &Path) -> Self {
        Self {
            id,
            state: AtomicTaskState::new(QueryTaskState::Created),
            children: children.iter().map(|child| child.base_id()).collect(),
            queues: children
                .iter()
                .map(|_| Mutex::new(MappingQueue::new(queue_capacity, tmp_dir)))
                .collect(),
            finish_notifications: AtomicU32::new(0),
            created_notifications: AtomicU32::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> QueryTaskState {
        self.state.load()
    }

    pub fn transition(&self, current: QueryTaskState, new: QueryTaskState) -> bool {
        self.state.transition(current, new)
    }

    /// Moves the task into the final state `new` unless it already is in a final state.
    pub fn finish_with(&self, new: QueryTaskState) -> bool {
        self.state.finish_with(new)
    }

    /// Starts a created task.
    pub fn start(&self) -> bool {
        self.transition(QueryTaskState::Created, QueryTaskState::Started)
    }

    pub fn abort(&self) -> bool {
        self.finish_with(QueryTaskState::Aborted)
    }

    pub fn number_of_children(&self) -> usize {
        self.children.len()
    }

    /// Returns the index of the child whose replicas have the same base id as `sender`.
    pub fn child_index(&self, sender: TaskId) -> Option<usize> {
        self.children
            .iter()
            .position(|child| *child == sender.base_id())
    }

    /// Appends a mapping that was sent by a replica of one of the children.
    ///
    /// Mappings that arrive after the task reached a final state are dropped.
    pub fn enqueue(&self, sender: TaskId, mapping: Mapping) -> Result<(), QueryExecutionError> {
        if self.state().is_final() {
            return Ok(());
        }
        let index = self
            .child_index(sender)
            .ok_or(QueryExecutionError::UnknownChild(self.id, sender))?;
        self.queues[index].lock().push(mapping)
    }

    /// Removes the oldest mapping of the child at `index`.
    pub fn pop(
        &self,
        index: usize,
        cache: &mut MappingRecycleCache,
    ) -> Result<Option<Mapping>, QueryExecutionError> {
        match self.queues.get(index) {
            Some(queue) => queue.lock().pop(cache),
            None => Ok(None),
        }
    }

    pub fn queue_len(&self, index: usize) -> usize {
        self.queues.get(index).map_or(0, |queue| queue.lock().len())
    }

    pub fn is_queue_empty(&self, index: usize) -> bool {
        self.queue_len(index) == 0
    }

    pub fn has_queued_mappings(&self) -> bool {
        self.queues.iter().any(|queue| !queue.lock().is_empty())
    }

    /// Drops all queued mappings.
    pub fn clear_queues(&self, cache: &mut MappingRecycleCache) -> Result<(), QueryExecutionError> {
        for queue in &self.queues {
            queue.lock().clear(cache)?;
        }
        Ok(())
    }

    /// Records that one replica of this task (or, for a coordinator, of the root) finished.
    pub fn notify_finished(&self) {
        self.finish_notifications.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of finish notifications since the last call.
    pub fn take_finish_notifications(&self) -> u32 {
        self.finish_notifications.swap(0, Ordering::AcqRel)
    }

    /// Records that one slave created its tasks of the query.
    pub fn notify_created(&self) {
        self.created_notifications.fetch_add(1, Ordering::AcqRel);
    }

    pub fn take_created_notifications(&self) -> u32 {
        self.created_notifications.swap(0, Ordering::AcqRel)
    }

    pub fn record_failure(&self, message: impl Into<String>) {
        self.failures.lock().push(message.into());
    }

    pub fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.failures.lock())
    }
}
