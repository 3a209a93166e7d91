use crate::receiver::MessageReceiver;
use crate::QueryExecutionError;
use koral_common::Message;
use koral_encoding::{Mapping, MappingBatchBuilder, MappingRecycleCache};
use koral_model::{ComputerId, QueryId, TaskId};
use koral_network::MessageTransport;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug)]
struct PendingBatch {
    builder: MappingBatchBuilder,
    queries: FxHashSet<QueryId>,
}

/// Bundles the mappings a worker thread sends to other computers.
///
/// Every worker thread owns one sender, so the mappings of a task leave in the order in which
/// they were emitted. Mappings for tasks on the same computer skip the network and are
/// delivered to the input queue of the receiving task directly.
///
/// A batch that cannot be sent is retried `retries` times. If it still fails, the coordinators
/// of all queries with mappings in the batch are told that the query failed. Control messages
/// that cannot be sent are kept and sent again with the next flush.
#[derive(Debug)]
pub struct MessageSenderBuffer {
    transport: Arc<dyn MessageTransport>,
    receiver: Arc<MessageReceiver>,
    batches: Vec<PendingBatch>,
    retries: usize,
    pending_control: VecDeque<(ComputerId, Vec<u8>)>,
}

impl MessageSenderBuffer {
    /// Creates a new [MessageSenderBuffer] that sends a batch once it holds `bundle_size`
    /// mappings.
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        receiver: Arc<MessageReceiver>,
        bundle_size: usize,
        retries: usize,
    ) -> Self {
        let current = transport.current_id();
        let batches = (0..=transport.number_of_slaves())
            .map(|_| PendingBatch {
                builder: MappingBatchBuilder::new(current, bundle_size),
                queries: FxHashSet::default(),
            })
            .collect();
        Self {
            transport,
            receiver,
            batches,
            retries,
            pending_control: VecDeque::new(),
        }
    }

    pub fn current_id(&self) -> ComputerId {
        self.transport.current_id()
    }

    /// Returns the number of mappings that wait for `receiver`.
    pub fn buffered_mappings(&self, receiver: ComputerId) -> usize {
        self.batches
            .get(usize::from(receiver))
            .map_or(0, |batch| batch.builder.len())
    }

    /// Sends `mapping` from `sender` to `receiver`. The buffer of the mapping is given back to
    /// `cache` once it has been copied into a batch.
    pub fn send_query_mapping(
        &mut self,
        mut mapping: Mapping,
        sender: TaskId,
        receiver: TaskId,
        cache: &mut MappingRecycleCache,
    ) -> Result<(), QueryExecutionError> {
        mapping.set_sender(sender);
        mapping.set_receiver(receiver);
        let destination = receiver.computer_id();
        if destination == self.current_id() {
            return self.receiver.deliver(mapping, cache);
        }

        let Some(batch) = self.batches.get_mut(usize::from(destination)) else {
            cache.release(mapping);
            return Err(QueryExecutionError::UnknownComputer(destination));
        };
        batch.builder.push(&mapping);
        batch.queries.insert(sender.query_id());
        cache.release(mapping);
        trace!(task_id = %sender, receiver = %receiver, "Buffered mapping");
        if batch.builder.is_full() {
            self.flush(destination)?;
        }
        Ok(())
    }

    /// Sends a copy of `mapping` to the replica of `receiver` on every slave.
    pub fn send_query_mapping_to_all(
        &mut self,
        mapping: Mapping,
        sender: TaskId,
        receiver: TaskId,
        cache: &mut MappingRecycleCache,
    ) -> Result<(), QueryExecutionError> {
        let number_of_slaves = self.transport.number_of_slaves();
        if number_of_slaves == 0 {
            cache.release(mapping);
            return Ok(());
        }
        for slave in 1..number_of_slaves {
            let copy = cache.clone_mapping(&mapping);
            self.send_query_mapping(copy, sender, receiver.on_computer(slave), cache)?;
        }
        self.send_query_mapping(
            mapping,
            sender,
            receiver.on_computer(number_of_slaves),
            cache,
        )
    }

    fn flush(&mut self, destination: ComputerId) -> Result<(), QueryExecutionError> {
        let Some(batch) = self.batches.get_mut(usize::from(destination)) else {
            return Err(QueryExecutionError::UnknownComputer(destination));
        };
        if batch.builder.is_empty() {
            return Ok(());
        }
        let message = batch.builder.take();
        let queries = std::mem::take(&mut batch.queries);

        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            if self.transport.send(destination, &message) {
                return Ok(());
            }
            warn!(receiver = destination, attempt, "Sending mappings failed");
        }

        let error = QueryExecutionError::SendFailed {
            receiver: destination,
            attempts,
        };
        for query in queries {
            self.send_query_task_failed(TaskId::coordinator(query), &error.to_string());
        }
        Err(error)
    }

    /// Sends all buffered mappings and control messages.
    ///
    /// All destinations are flushed even if one of them fails. The first failure is returned.
    pub fn send_all_buffered_messages(&mut self) -> Result<(), QueryExecutionError> {
        let mut result = Ok(());
        for destination in 0..=self.transport.number_of_slaves() {
            if let Err(error) = self.flush(destination) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        self.retry_control_messages();
        result
    }

    /// Informs the other replicas, and the coordinator if `is_root`, that `finished_task` has
    /// finished on this computer. All buffered mappings are sent first.
    pub fn send_query_task_finished(
        &mut self,
        finished_task: TaskId,
        is_root: bool,
        coordinator: TaskId,
    ) -> Result<(), QueryExecutionError> {
        self.send_all_buffered_messages()?;
        let current = self.current_id();
        let message = Message::QueryTaskFinished {
            sender: current,
            coordinator: None,
            finished_task,
        }
        .encode();
        for slave in (1..=self.transport.number_of_slaves()).filter(|slave| *slave != current) {
            self.send_control(slave, message.clone());
        }
        if is_root {
            let message = Message::QueryTaskFinished {
                sender: current,
                coordinator: Some(coordinator),
                finished_task,
            }
            .encode();
            self.send_control(coordinator.computer_id(), message);
        }
        Ok(())
    }

    /// Sends the serialized query execution tree of `query_id` to all slaves.
    pub fn send_query_create(&mut self, query_id: QueryId, tree: &[u8]) {
        self.send_control_to_all_slaves(&Message::QueryCreate { query_id, tree }.encode());
    }

    /// Tells all slaves to start the tasks of `query_id`.
    pub fn send_query_start(&mut self, query_id: QueryId) {
        self.send_control_to_all_slaves(&Message::QueryStart { query_id }.encode());
    }

    /// Tells all slaves to abort the tasks of `query_id`.
    pub fn send_query_abortion(&mut self, query_id: QueryId) {
        self.send_control_to_all_slaves(&Message::QueryAbortion { query_id }.encode());
    }

    fn send_control_to_all_slaves(&mut self, message: &[u8]) {
        for slave in 1..=self.transport.number_of_slaves() {
            self.send_control(slave, message.to_vec());
        }
    }

    pub fn send_query_task_failed(&mut self, coordinator: TaskId, message: &str) {
        let message = Message::QueryTaskFailed {
            sender: self.current_id(),
            coordinator,
            message,
        }
        .encode();
        self.send_control(coordinator.computer_id(), message);
    }

    fn send_control(&mut self, receiver: ComputerId, message: Vec<u8>) {
        if self.pending_control.is_empty() && self.transport.send(receiver, &message) {
            return;
        }
        warn!(receiver, "Control message is delayed");
        self.pending_control.push_back((receiver, message));
    }

    fn retry_control_messages(&mut self) {
        while let Some((receiver, message)) = self.pending_control.front() {
            if !self.transport.send(*receiver, message) {
                return;
            }
            self.pending_control.pop_front();
        }
    }

    pub fn has_pending_control_messages(&self) -> bool {
        !self.pending_control.is_empty()
    }
}
