//! The pool of worker threads that execute the tasks of a computer.

mod thread;

use crate::factory::{QueryTaskFactory, TaskSettings};
use crate::receiver::MessageReceiver;
use crate::sender::MessageSenderBuffer;
use crate::task::WorkerTask;
use crate::tree::QueryExecutionTree;
use crate::QueryExecutionError;
use koral_common::{KoralConfig, Message};
use koral_encoding::MappingRecycleCache;
use koral_model::{QueryId, TaskId};
use koral_network::MessageTransport;
use koral_storage::TripleStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
pub use thread::{Worker, WorkerTaskComparator, IDLE_SLEEP};
use thread::WorkerShared;
use tracing::{debug, info, warn};

/// Creates, starts and aborts queries and distributes their tasks over the worker threads.
///
/// Workers are created with the manager but only run in their own threads after
/// [WorkerManager::start]. Until then, [WorkerManager::run_round] executes them on the calling
/// thread.
#[derive(Debug)]
pub struct WorkerManager {
    transport: Arc<dyn MessageTransport>,
    receiver: Arc<MessageReceiver>,
    factory: QueryTaskFactory,
    store: Option<Arc<dyn TripleStore>>,
    shared: Vec<Arc<WorkerShared>>,
    idle_workers: Mutex<Vec<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerManager {
    /// Creates `config.number_of_worker_threads()` workers that form a ring.
    pub fn new(
        config: &KoralConfig,
        transport: Arc<dyn MessageTransport>,
        receiver: Arc<MessageReceiver>,
        store: Option<Arc<dyn TripleStore>>,
    ) -> Self {
        let number_of_workers = config.number_of_worker_threads().max(1);
        let shared = (0..number_of_workers)
            .map(|_| Arc::new(WorkerShared::default()))
            .collect::<Vec<_>>();
        let workers = (0..number_of_workers)
            .map(|id| {
                let next = (number_of_workers > 1)
                    .then(|| Arc::clone(&shared[(id + 1) % number_of_workers]));
                Worker::new(
                    id,
                    Arc::clone(&shared[id]),
                    next,
                    MappingRecycleCache::new(
                        config.size_of_mapping_recycle_cache,
                        transport.number_of_slaves(),
                    ),
                    MessageSenderBuffer::new(
                        Arc::clone(&transport),
                        Arc::clone(&receiver),
                        config.mapping_bundle_size,
                        config.mapping_send_retries,
                    ),
                    Arc::clone(&receiver),
                    config.unbalance_threshold_for_worker_threads,
                )
            })
            .collect();
        let mut settings = TaskSettings::new(config);
        settings.number_of_slaves = transport.number_of_slaves();
        Self {
            factory: QueryTaskFactory::new(store.clone(), settings),
            transport,
            receiver,
            store,
            shared,
            idle_workers: Mutex::new(workers),
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn receiver(&self) -> &Arc<MessageReceiver> {
        &self.receiver
    }

    pub fn number_of_workers(&self) -> usize {
        self.shared.len()
    }

    /// Returns the estimated load of every worker.
    pub fn estimated_loads(&self) -> Vec<u64> {
        self.shared.iter().map(|shared| shared.estimated_load()).collect()
    }

    /// Moves every worker into its own thread.
    pub fn start(&self) -> Result<(), std::io::Error> {
        let workers = std::mem::take(&mut *self.idle_workers.lock());
        let mut handles = self.handles.lock();
        for worker in workers {
            let shutdown = Arc::clone(&self.shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("koral-worker-{}", worker.id()))
                .spawn(move || worker.run(&shutdown))?;
            handles.push(handle);
        }
        info!(workers = handles.len(), "Worker threads started");
        Ok(())
    }

    /// Runs one round on every worker that has not been moved into a thread. Returns true if
    /// any task had input.
    pub fn run_round(&self) -> bool {
        let mut busy = false;
        for worker in self.idle_workers.lock().iter_mut() {
            busy |= worker.run_round();
        }
        busy
    }

    /// Schedules `task` on the worker with the lowest estimated load.
    pub fn add_task(&self, task: Box<dyn WorkerTask>) {
        let Some(worker) = self
            .shared
            .iter()
            .enumerate()
            .min_by_key(|(index, shared)| (shared.estimated_load(), *index))
            .map(|(_, shared)| shared)
        else {
            return;
        };
        debug!(task_id = %task.id(), estimated_load = task.estimated_load(), "Scheduling task");
        worker.hand_over(task);
    }

    /// Creates the local tasks of a query and confirms the creation to its coordinator.
    ///
    /// If the tasks cannot be created, the coordinator is told that the query failed.
    pub fn create_query(&self, query_id: QueryId, tree: &[u8]) {
        let coordinator = TaskId::coordinator(query_id);
        let current = self.transport.current_id();
        let message = match self.create_tasks(tree) {
            Ok(()) => Message::QueryCreated {
                sender: current,
                coordinator,
            }
            .encode(),
            Err(error) => {
                warn!(query_id, "Creating query failed: {error}");
                Message::QueryTaskFailed {
                    sender: current,
                    coordinator,
                    message: &error.to_string(),
                }
                .encode()
            }
        };
        if !self.transport.send(coordinator.computer_id(), &message) {
            warn!(query_id, "Could not answer the coordinator");
        }
    }

    fn create_tasks(&self, bytes: &[u8]) -> Result<(), QueryExecutionError> {
        let mut tree = QueryExecutionTree::deserialize(bytes, self.transport.current_id())?;
        if let Some(store) = &self.store {
            tree.adjust_estimated_loads(store.as_ref(), self.transport.number_of_slaves());
        }
        let tasks = self.factory.create_tasks(&tree)?;
        for task in &tasks {
            self.receiver.register(Arc::clone(task.inbox()));
        }
        debug!(query_id = tree.query_id(), tasks = tasks.len(), "Created query tasks");
        for task in tasks {
            self.add_task(Box::new(task));
        }
        Ok(())
    }

    pub fn start_query(&self, query_id: QueryId) {
        for inbox in self.receiver.tasks_of_query(query_id) {
            inbox.start();
        }
        debug!(query_id, "Started query");
    }

    /// Aborts all local tasks of a query. Workers remove them in their next round.
    pub fn abort_query(&self, query_id: QueryId) {
        for inbox in self.receiver.tasks_of_query(query_id) {
            inbox.abort();
        }
        self.receiver.unregister_query(query_id);
        debug!(query_id, "Aborted query");
    }

    /// Aborts all running queries.
    pub fn clear(&self) {
        for query_id in self.receiver.query_ids() {
            self.abort_query(query_id);
        }
    }

    /// Stops all worker threads and waits for them.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }
        for worker in self.idle_workers.lock().iter_mut() {
            worker.close_all();
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
