use crate::receiver::MessageReceiver;
use crate::sender::MessageSenderBuffer;
use crate::task::{TaskContext, WorkerTask};
use koral_encoding::MappingRecycleCache;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How long a worker sleeps after a round in which no task had input.
pub const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Orders tasks by their load. Ties are broken by the task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTaskComparator {
    CurrentLoad,
    EstimatedLoad,
}

impl WorkerTaskComparator {
    pub fn compare(self, lhs: &dyn WorkerTask, rhs: &dyn WorkerTask) -> Ordering {
        let load = |task: &dyn WorkerTask| match self {
            WorkerTaskComparator::CurrentLoad => task.current_load(),
            WorkerTaskComparator::EstimatedLoad => task.estimated_load(),
        };
        load(lhs)
            .cmp(&load(rhs))
            .then_with(|| lhs.id().cmp(&rhs.id()))
    }
}

/// The state of a worker that other threads may access.
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    /// Tasks handed over by the manager or a neighbouring worker.
    incoming: Mutex<Vec<Box<dyn WorkerTask>>>,
    current_load: AtomicU64,
    estimated_load: AtomicU64,
}

impl WorkerShared {
    pub(crate) fn hand_over(&self, task: Box<dyn WorkerTask>) {
        self.estimated_load
            .fetch_add(task.estimated_load(), AtomicOrdering::Relaxed);
        self.incoming.lock().push(task);
    }

    pub(crate) fn current_load(&self) -> u64 {
        self.current_load.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn estimated_load(&self) -> u64 {
        self.estimated_load.load(AtomicOrdering::Relaxed)
    }

    fn remove_estimated_load(&self, load: u64) {
        let _ = self.estimated_load.fetch_update(
            AtomicOrdering::Relaxed,
            AtomicOrdering::Relaxed,
            |current| Some(current.saturating_sub(load)),
        );
    }
}

/// A worker thread. It executes its tasks round-robin and moves tasks to its neighbour in the
/// ring of workers if it has considerably more work.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    next: Option<Arc<WorkerShared>>,
    tasks: Vec<Box<dyn WorkerTask>>,
    cache: MappingRecycleCache,
    sender: MessageSenderBuffer,
    receiver: Arc<MessageReceiver>,
    unbalance_threshold: f64,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        shared: Arc<WorkerShared>,
        next: Option<Arc<WorkerShared>>,
        cache: MappingRecycleCache,
        sender: MessageSenderBuffer,
        receiver: Arc<MessageReceiver>,
        unbalance_threshold: f64,
    ) -> Self {
        Self {
            id,
            shared,
            next,
            tasks: Vec::new(),
            cache,
            sender,
            receiver,
            unbalance_threshold,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn number_of_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Runs rounds until `shutdown` is set. Remaining tasks are closed afterwards.
    pub fn run(mut self, shutdown: &AtomicBool) {
        debug!(worker = self.id, "Worker started");
        while !shutdown.load(AtomicOrdering::Relaxed) {
            if !self.run_round() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        self.close_all();
        debug!(worker = self.id, "Worker stopped");
    }

    /// Executes every task once. Returns true if any task had input.
    pub fn run_round(&mut self) -> bool {
        self.tasks.append(&mut self.shared.incoming.lock());
        self.remove_final_tasks();

        let mut busy = false;
        let mut index = 0;
        while index < self.tasks.len() {
            let task = &mut self.tasks[index];
            let has_input = task.has_input();
            if !has_input && !task.has_to_perform_final_steps() {
                index += 1;
                continue;
            }
            busy |= has_input;
            let mut context = TaskContext {
                cache: &mut self.cache,
                sender: &mut self.sender,
            };
            match task.execute(&mut context) {
                Ok(()) => index += 1,
                Err(execution_error) => {
                    error!(task_id = %task.id(), "Task failed: {execution_error}");
                    context
                        .sender
                        .send_query_task_failed(task.coordinator(), &execution_error.to_string());
                    let mut task = self.tasks.swap_remove(index);
                    self.discard(task.as_mut());
                }
            }
        }

        if let Err(send_error) = self.sender.send_all_buffered_messages() {
            warn!(worker = self.id, "Flushing buffered messages failed: {send_error}");
        }

        let current_load = self.tasks.iter().map(|task| task.current_load()).sum::<u64>();
        self.shared
            .current_load
            .store(current_load, AtomicOrdering::Relaxed);
        self.rebalance(current_load);
        busy
    }

    fn remove_final_tasks(&mut self) {
        let mut index = 0;
        while index < self.tasks.len() {
            if self.tasks[index].is_in_final_state() {
                let mut task = self.tasks.swap_remove(index);
                debug!(task_id = %task.id(), "Removing task");
                self.discard(task.as_mut());
            } else {
                index += 1;
            }
        }
    }

    fn discard(&mut self, task: &mut dyn WorkerTask) {
        let mut context = TaskContext {
            cache: &mut self.cache,
            sender: &mut self.sender,
        };
        task.close(&mut context);
        self.receiver.unregister(task.id());
        self.shared.remove_estimated_load(task.estimated_load());
    }

    /// Moves tasks to the next worker while the difference of the loads exceeds the
    /// threshold. Only tasks whose load is at most half of the difference are moved, largest
    /// first.
    fn rebalance(&mut self, current_load: u64) {
        let Some(next) = self.next.clone() else {
            return;
        };
        let neighbour_load = next.current_load();
        if current_load <= neighbour_load {
            return;
        }
        let threshold = unbalance_limit(self.unbalance_threshold, current_load);
        let mut own = current_load;
        let mut other = neighbour_load;
        if own - other <= threshold {
            return;
        }

        // Mappings that the moved tasks emitted so far must leave before their next ones.
        if let Err(send_error) = self.sender.send_all_buffered_messages() {
            warn!(worker = self.id, "Flushing before rebalancing failed: {send_error}");
        }
        self.tasks.sort_by(|lhs, rhs| {
            WorkerTaskComparator::CurrentLoad
                .compare(lhs.as_ref(), rhs.as_ref())
                .reverse()
        });

        let mut index = 0;
        while index < self.tasks.len() && own - other > threshold {
            let load = self.tasks[index].current_load();
            if load == 0 || load > (own - other) / 2 || self.tasks[index].is_in_final_state() {
                index += 1;
                continue;
            }
            let task = self.tasks.remove(index);
            debug!(task_id = %task.id(), worker = self.id, load, "Moving task to next worker");
            self.shared.remove_estimated_load(task.estimated_load());
            next.hand_over(task);
            own -= load;
            other += load;
        }
        self.shared.current_load.store(own, AtomicOrdering::Relaxed);
    }

    /// Closes all tasks, e.g., when the worker shuts down.
    pub fn close_all(&mut self) {
        self.tasks.append(&mut self.shared.incoming.lock());
        for mut task in std::mem::take(&mut self.tasks) {
            self.discard(task.as_mut());
        }
        if let Err(send_error) = self.sender.send_all_buffered_messages() {
            warn!(worker = self.id, "Flushing buffered messages failed: {send_error}");
        }
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Loads are estimates"
)]
fn unbalance_limit(threshold: f64, load: u64) -> u64 {
    (threshold * load as f64).ceil() as u64
}
