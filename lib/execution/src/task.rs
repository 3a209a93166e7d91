use crate::inbox::TaskInbox;
use crate::operators::Operator;
use crate::routing::{route, ParentTask, Route};
use crate::sender::MessageSenderBuffer;
use crate::state::QueryTaskState;
use crate::QueryExecutionError;
use koral_encoding::{Mapping, MappingRecycleCache};
use koral_model::{TaskId, Variable};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// The per-thread resources a task uses while it executes.
pub struct TaskContext<'a> {
    pub cache: &'a mut MappingRecycleCache,
    pub sender: &'a mut MessageSenderBuffer,
}

/// A unit of work that is scheduled on a worker thread.
///
/// Worker threads call [WorkerTask::execute] whenever the task has input or final steps to
/// perform. A single execution is bounded, so that all tasks of a thread make progress.
pub trait WorkerTask: Send + Debug {
    fn id(&self) -> TaskId;

    /// The coordinator that is informed if the task fails.
    fn coordinator(&self) -> TaskId;

    /// The amount of work that is currently waiting, used to balance worker threads.
    fn current_load(&self) -> u64;

    /// The expected amount of work, used to assign new tasks to worker threads.
    fn estimated_load(&self) -> u64;

    fn has_input(&self) -> bool;

    fn has_to_perform_final_steps(&self) -> bool;

    fn execute(&mut self, context: &mut TaskContext<'_>) -> Result<(), QueryExecutionError>;

    fn is_in_final_state(&self) -> bool;

    /// Releases all resources. Called once before the task is dropped.
    fn close(&mut self, context: &mut TaskContext<'_>);
}

/// Read access to the input queues of a task and the state of its children.
pub struct TaskInputs<'a> {
    inbox: &'a TaskInbox,
    children: &'a [Arc<TaskInbox>],
}

impl<'a> TaskInputs<'a> {
    pub fn new(inbox: &'a TaskInbox, children: &'a [Arc<TaskInbox>]) -> Self {
        Self { inbox, children }
    }

    pub fn pop(
        &self,
        child: usize,
        cache: &mut MappingRecycleCache,
    ) -> Result<Option<Mapping>, QueryExecutionError> {
        self.inbox.pop(child, cache)
    }

    pub fn len(&self, child: usize) -> usize {
        self.inbox.queue_len(child)
    }

    pub fn is_empty(&self, child: usize) -> bool {
        self.inbox.is_queue_empty(child)
    }

    /// Returns true once all replicas of the child have finished.
    pub fn has_child_finished(&self, child: usize) -> bool {
        self.children
            .get(child)
            .is_some_and(|child| child.state() == QueryTaskState::Finished)
    }
}

/// Routes the mappings a task produces during one step.
pub struct Emitter<'a> {
    task: TaskId,
    coordinator: TaskId,
    parent: Option<&'a ParentTask>,
    variables: &'a [Variable],
    number_of_slaves: u16,
    emitted: &'a mut [u64],
    cache: &'a mut MappingRecycleCache,
    sender: &'a mut MessageSenderBuffer,
}

impl Emitter<'_> {
    pub fn cache(&mut self) -> &mut MappingRecycleCache {
        self.cache
    }

    /// Sends `mapping`, whose layout are the result variables of the task, to its consumers.
    pub fn emit(&mut self, mut mapping: Mapping) -> Result<(), QueryExecutionError> {
        let route = route(
            self.task,
            self.coordinator,
            self.parent,
            &mut mapping,
            self.variables,
            self.number_of_slaves,
        )?;
        match route {
            Route::Send(receiver) => {
                if let Some(count) = self.emitted.get_mut(usize::from(receiver.computer_id())) {
                    *count += 1;
                }
                self.sender
                    .send_query_mapping(mapping, self.task, receiver, self.cache)
            }
            Route::Broadcast(parent) => {
                for count in self.emitted.iter_mut().skip(1) {
                    *count += 1;
                }
                self.sender
                    .send_query_mapping_to_all(mapping, self.task, parent, self.cache)
            }
            Route::Drop => {
                trace!(task_id = %self.task, "Dropping mapping that is sent by another computer");
                self.cache.release(mapping);
                Ok(())
            }
        }
    }
}

/// A replica of a query operator on one slave.
///
/// The task follows the life cycle of [QueryTaskState]. Once its own work is done, it tells all
/// other replicas and waits until every replica has finished, because only then all mappings
/// for its parent have been sent.
#[derive(Debug)]
pub struct QueryOperatorTask {
    inbox: Arc<TaskInbox>,
    coordinator: TaskId,
    number_of_slaves: u16,
    parent: Option<ParentTask>,
    children: Vec<Arc<TaskInbox>>,
    variables: Vec<Variable>,
    operator: Operator,
    emitted_mappings_per_round: usize,
    estimated_load: u64,
    missing_finish_notifications: u32,
    emitted: Vec<u64>,
}

impl QueryOperatorTask {
    /// Creates a new [QueryOperatorTask].
    ///
    /// `children` are the inboxes of the local replicas of the children. `variables` is the
    /// layout of the mappings the task emits.
    #[allow(clippy::too_many_arguments, reason = "Plain constructor")]
    pub fn new(
        inbox: Arc<TaskInbox>,
        coordinator: TaskId,
        number_of_slaves: u16,
        parent: Option<ParentTask>,
        children: Vec<Arc<TaskInbox>>,
        variables: Vec<Variable>,
        operator: Operator,
        emitted_mappings_per_round: usize,
        estimated_load: u64,
    ) -> Self {
        Self {
            inbox,
            coordinator,
            number_of_slaves,
            parent,
            children,
            variables,
            operator,
            emitted_mappings_per_round: emitted_mappings_per_round.max(1),
            estimated_load,
            missing_finish_notifications: u32::from(number_of_slaves),
            emitted: vec![0; usize::from(number_of_slaves) + 1],
        }
    }

    pub fn inbox(&self) -> &Arc<TaskInbox> {
        &self.inbox
    }

    pub fn state(&self) -> QueryTaskState {
        self.inbox.state()
    }

    pub fn result_variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns how many mappings were sent to each computer, indexed by computer id.
    pub fn emitted_mappings(&self) -> &[u64] {
        &self.emitted
    }

    fn inputs(&self) -> TaskInputs<'_> {
        TaskInputs::new(&self.inbox, &self.children)
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn is_finished_locally(&self) -> bool {
        if self.is_leaf() && self.estimated_load == 0 {
            return true;
        }
        self.operator.is_finished_locally(&self.inputs())
    }

    fn is_subtree_finished(&self) -> bool {
        self.children
            .iter()
            .all(|child| child.state() == QueryTaskState::Finished)
            && self.is_finished_locally()
    }

    fn execute_operation_step(
        &mut self,
        context: &mut TaskContext<'_>,
    ) -> Result<(), QueryExecutionError> {
        let inputs = TaskInputs::new(&self.inbox, &self.children);
        let mut emitter = Emitter {
            task: self.inbox.id(),
            coordinator: self.coordinator,
            parent: self.parent.as_ref(),
            variables: &self.variables,
            number_of_slaves: self.number_of_slaves,
            emitted: &mut self.emitted,
            cache: &mut *context.cache,
            sender: &mut *context.sender,
        };
        self.operator
            .execute_step(self.emitted_mappings_per_round, &inputs, &mut emitter)
    }
}

impl WorkerTask for QueryOperatorTask {
    fn id(&self) -> TaskId {
        self.inbox.id()
    }

    fn coordinator(&self) -> TaskId {
        self.coordinator
    }

    fn current_load(&self) -> u64 {
        if self.is_leaf() && self.estimated_load == 0 {
            return 0;
        }
        self.operator
            .current_load(&self.inputs(), self.emitted_mappings_per_round)
    }

    fn estimated_load(&self) -> u64 {
        self.estimated_load
    }

    fn has_input(&self) -> bool {
        if self.state() != QueryTaskState::Started {
            return false;
        }
        if self.is_leaf() {
            return !self.is_finished_locally();
        }
        self.inbox.has_queued_mappings() || self.operator.has_pending_results()
    }

    fn has_to_perform_final_steps(&self) -> bool {
        matches!(
            self.state(),
            QueryTaskState::Started | QueryTaskState::WaitingForOthersToFinish
        )
    }

    fn execute(&mut self, context: &mut TaskContext<'_>) -> Result<(), QueryExecutionError> {
        let notifications = self.inbox.take_finish_notifications();
        self.missing_finish_notifications =
            self.missing_finish_notifications.saturating_sub(notifications);

        if self.state() == QueryTaskState::Started {
            self.execute_operation_step(context)?;
            if self.is_subtree_finished()
                && self.inbox.transition(
                    QueryTaskState::Started,
                    QueryTaskState::WaitingForOthersToFinish,
                )
            {
                self.missing_finish_notifications =
                    self.missing_finish_notifications.saturating_sub(1);
                debug!(
                    task_id = %self.id(),
                    emitted = ?self.emitted,
                    "Task finished locally"
                );
                context.sender.send_query_task_finished(
                    self.id(),
                    self.is_root(),
                    self.coordinator,
                )?;
            }
        }

        if self.missing_finish_notifications == 0
            && self.inbox.transition(
                QueryTaskState::WaitingForOthersToFinish,
                QueryTaskState::Finished,
            )
        {
            debug!(task_id = %self.id(), "Task finished on all slaves");
        }
        Ok(())
    }

    fn is_in_final_state(&self) -> bool {
        self.state().is_final()
    }

    fn close(&mut self, context: &mut TaskContext<'_>) {
        if let Err(error) = self.operator.close(context.cache) {
            debug!(task_id = %self.id(), "Could not release operator resources: {error}");
        }
        if let Err(error) = self.inbox.clear_queues(context.cache) {
            debug!(task_id = %self.id(), "Could not clear input queues: {error}");
        }
    }
}
