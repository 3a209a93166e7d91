//! The master side of a query.
//!
//! The coordinator sends the query execution tree to all slaves, starts the query once every
//! slave has created its tasks, and streams the mappings of the root tasks to the client.

use crate::inbox::TaskInbox;
use crate::state::QueryTaskState;
use crate::task::{TaskContext, WorkerTask};
use crate::tree::QueryExecutionTree;
use crate::QueryExecutionError;
use koral_common::{KoralConfig, MessageType};
use koral_model::{QueryId, TaskId, Variable};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A message for the client that submitted a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    WorkInProgress,
    QueryResult { rows: Vec<Vec<u64>> },
    Succeeded,
    Failed(String),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::WorkInProgress => MessageType::MasterWorkInProgress,
            ClientMessage::QueryResult { .. } => MessageType::QueryResult,
            ClientMessage::Succeeded => MessageType::ClientCommandSucceeded,
            ClientMessage::Failed(_) => MessageType::ClientCommandFailed,
        }
    }
}

/// Receives the results of a query.
pub trait ResultSink: Send + Debug {
    /// Returns false if the client is gone.
    fn send(&mut self, message: ClientMessage) -> bool;
}

impl ResultSink for mpsc::UnboundedSender<ClientMessage> {
    fn send(&mut self, message: ClientMessage) -> bool {
        mpsc::UnboundedSender::send(self, message).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub number_of_slaves: u16,
    pub mapping_bundle_size: usize,
    pub emitted_mappings_per_round: usize,
    pub receiver_queue_size: usize,
    pub client_keep_alive_interval: Duration,
    pub tmp_dir: PathBuf,
}

impl CoordinatorSettings {
    pub fn new(config: &KoralConfig) -> Self {
        Self {
            number_of_slaves: config.number_of_slaves(),
            mapping_bundle_size: config.mapping_bundle_size,
            emitted_mappings_per_round: config.max_emitted_mappings_per_round,
            receiver_queue_size: config.receiver_queue_size,
            client_keep_alive_interval: config.client_keep_alive_interval(),
            tmp_dir: config.tmp_dir.clone(),
        }
    }
}

/// Runs a query on behalf of a client. It is scheduled like any other task on the workers of
/// the master.
#[derive(Debug)]
pub struct QueryExecutionCoordinator {
    inbox: Arc<TaskInbox>,
    tree: Vec<u8>,
    variables: Vec<Variable>,
    settings: CoordinatorSettings,
    offset: u64,
    limit: Option<u64>,
    sink: Box<dyn ResultSink>,
    create_sent: bool,
    created_slaves: u32,
    finished_slaves: u32,
    skipped: u64,
    sent_rows: u64,
    rows: Vec<Vec<u64>>,
    last_keep_alive: Instant,
    done: bool,
}

impl QueryExecutionCoordinator {
    pub fn new(
        tree: &QueryExecutionTree,
        settings: CoordinatorSettings,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        let (offset, limit) = tree.slice().unwrap_or((None, None));
        let inbox = Arc::new(TaskInbox::new(
            tree.coordinator(),
            &[tree.executed_root().id],
            settings.receiver_queue_size,
            &settings.tmp_dir,
        ));
        Self {
            inbox,
            tree: tree.serialize(),
            variables: tree.root().result_variables(),
            settings,
            offset: offset.unwrap_or(0),
            limit,
            sink,
            create_sent: false,
            created_slaves: 0,
            finished_slaves: 0,
            skipped: 0,
            sent_rows: 0,
            rows: Vec::new(),
            last_keep_alive: Instant::now(),
            done: false,
        }
    }

    pub fn inbox(&self) -> &Arc<TaskInbox> {
        &self.inbox
    }

    pub fn query_id(&self) -> QueryId {
        self.inbox.id().query_id()
    }

    /// The variables of the result rows, in column order.
    pub fn result_variables(&self) -> &[Variable] {
        &self.variables
    }

    fn number_of_slaves(&self) -> u32 {
        u32::from(self.settings.number_of_slaves)
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.sent_rows + self.rows_len() >= limit)
    }

    fn rows_len(&self) -> u64 {
        u64::try_from(self.rows.len()).unwrap_or(u64::MAX)
    }

    fn send_to_client(&mut self, message: ClientMessage) {
        if !self.sink.send(message) {
            debug!(query_id = self.query_id(), "Client is gone");
        }
    }

    fn flush_rows(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        self.sent_rows += self.rows_len();
        let rows = std::mem::take(&mut self.rows);
        self.send_to_client(ClientMessage::QueryResult { rows });
    }

    fn succeed(&mut self, context: &mut TaskContext<'_>, abort_slaves: bool) {
        self.flush_rows();
        if abort_slaves {
            context.sender.send_query_abortion(self.query_id());
        }
        self.inbox.finish_with(QueryTaskState::Finished);
        self.send_to_client(ClientMessage::Succeeded);
        self.done = true;
        info!(query_id = self.query_id(), rows = self.sent_rows, "Query succeeded");
    }

    fn fail(&mut self, context: &mut TaskContext<'_>, message: String) {
        warn!(query_id = self.query_id(), "Query failed: {message}");
        context.sender.send_query_abortion(self.query_id());
        self.inbox.finish_with(QueryTaskState::Failed);
        self.send_to_client(ClientMessage::Failed(message));
        self.done = true;
    }

    fn consume_results(&mut self, context: &mut TaskContext<'_>) -> Result<(), QueryExecutionError> {
        for _ in 0..self.settings.emitted_mappings_per_round.max(1) {
            if self.limit_reached() {
                return Ok(());
            }
            let Some(mapping) = self.inbox.pop(0, context.cache)? else {
                return Ok(());
            };
            if self.skipped < self.offset {
                self.skipped += 1;
            } else {
                self.rows.push(mapping.values());
                if self.rows.len() >= self.settings.mapping_bundle_size {
                    self.flush_rows();
                }
            }
            context.cache.release(mapping);
        }
        Ok(())
    }
}

impl WorkerTask for QueryExecutionCoordinator {
    fn id(&self) -> TaskId {
        self.inbox.id()
    }

    fn coordinator(&self) -> TaskId {
        self.inbox.id()
    }

    fn current_load(&self) -> u64 {
        u64::try_from(self.inbox.queue_len(0)).unwrap_or(u64::MAX)
    }

    fn estimated_load(&self) -> u64 {
        0
    }

    fn has_input(&self) -> bool {
        !self.done && self.inbox.has_queued_mappings()
    }

    fn has_to_perform_final_steps(&self) -> bool {
        !self.done
    }

    fn execute(&mut self, context: &mut TaskContext<'_>) -> Result<(), QueryExecutionError> {
        if self.done {
            return Ok(());
        }
        if self.inbox.state() == QueryTaskState::Aborted {
            self.fail(context, "Query was aborted".to_owned());
            return Ok(());
        }
        if let Some(failure) = self.inbox.take_failures().into_iter().next() {
            self.fail(context, failure);
            return Ok(());
        }
        if self.last_keep_alive.elapsed() >= self.settings.client_keep_alive_interval {
            self.last_keep_alive = Instant::now();
            self.send_to_client(ClientMessage::WorkInProgress);
        }

        if self.inbox.state() == QueryTaskState::Created {
            if !self.create_sent {
                context.sender.send_query_create(self.query_id(), &self.tree);
                self.create_sent = true;
                debug!(query_id = self.query_id(), "Sent query execution tree");
            }
            self.created_slaves += self.inbox.take_created_notifications();
            if self.created_slaves < self.number_of_slaves() {
                return Ok(());
            }
            context.sender.send_query_start(self.query_id());
            self.inbox
                .transition(QueryTaskState::Created, QueryTaskState::Started);
            debug!(query_id = self.query_id(), "Started query");
        }

        self.finished_slaves += self.inbox.take_finish_notifications();
        self.consume_results(context)?;
        if self.limit_reached() {
            self.succeed(context, true);
        } else if self.finished_slaves >= self.number_of_slaves() && !self.inbox.has_queued_mappings() {
            self.succeed(context, false);
        }
        Ok(())
    }

    fn is_in_final_state(&self) -> bool {
        self.done
    }

    fn close(&mut self, context: &mut TaskContext<'_>) {
        if let Err(error) = self.inbox.clear_queues(context.cache) {
            debug!(query_id = self.query_id(), "Could not clear result queue: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{QueryExecutionTreeBuilder, QueryExecutionTreeType, QueryPlan};
    use crate::receiver::MessageReceiver;
    use crate::sender::MessageSenderBuffer;
    use koral_common::Message;
    use koral_encoding::MappingRecycleCache;
    use koral_network::{MemoryCluster, MemoryTransport, MessageTransport};

    struct Fixture {
        slaves: Vec<MemoryTransport>,
        cache: MappingRecycleCache,
        sender: MessageSenderBuffer,
        client: mpsc::UnboundedReceiver<ClientMessage>,
        coordinator: QueryExecutionCoordinator,
    }

    impl Fixture {
        fn new(plan: QueryPlan) -> Self {
            let cluster = MemoryCluster::new(2);
            let transport: Arc<dyn MessageTransport> = Arc::new(cluster.transport(0).unwrap());
            let receiver = Arc::new(MessageReceiver::new(Arc::clone(&transport), 10));
            let sender = MessageSenderBuffer::new(transport, receiver, 10, 0);
            let tree = QueryExecutionTreeBuilder::new(QueryExecutionTreeType::LeftLinear, 10)
                .build(4, &plan)
                .unwrap();
            let settings = CoordinatorSettings {
                number_of_slaves: 2,
                mapping_bundle_size: 10,
                emitted_mappings_per_round: 10,
                receiver_queue_size: 10,
                client_keep_alive_interval: Duration::from_secs(3600),
                tmp_dir: std::env::temp_dir(),
            };
            let (sink, client) = mpsc::unbounded_channel();
            Self {
                slaves: (1..=2).map(|id| cluster.transport(id).unwrap()).collect(),
                cache: MappingRecycleCache::new(10, 2),
                sender,
                client,
                coordinator: QueryExecutionCoordinator::new(&tree, settings, Box::new(sink)),
            }
        }

        fn execute(&mut self) {
            let mut context = TaskContext {
                cache: &mut self.cache,
                sender: &mut self.sender,
            };
            self.coordinator.execute(&mut context).unwrap();
        }

        fn start(&mut self) {
            self.execute();
            self.coordinator.inbox().notify_created();
            self.coordinator.inbox().notify_created();
            self.execute();
        }

        fn slave_messages(&self, slave: usize) -> Vec<Vec<u8>> {
            std::iter::from_fn(|| self.slaves[slave - 1].receive(false)).collect()
        }

        fn slave_message_types(&self, slave: usize) -> Vec<MessageType> {
            self.slave_messages(slave)
                .iter()
                .map(|message| MessageType::of_message(message).unwrap())
                .collect()
        }

        fn client_messages(&mut self) -> Vec<ClientMessage> {
            std::iter::from_fn(|| self.client.try_recv().ok()).collect()
        }

        fn send_result(&mut self, subject: u64, object: u64) {
            let pattern = result_pattern();
            let mut mapping = self
                .cache
                .create_mapping(&pattern, [subject, 42, object], &[0x80])
                .unwrap();
            mapping.set_sender(TaskId::new(1, 4, 1));
            mapping.set_receiver(TaskId::coordinator(4));
            self.coordinator
                .inbox()
                .enqueue(mapping.sender(), mapping)
                .unwrap();
        }
    }

    fn result_pattern() -> koral_model::TriplePattern {
        "?s 42 ?o".parse::<QueryPlan>().unwrap().patterns()[0].clone()
    }

    #[test]
    fn query_starts_after_all_slaves_created_it() {
        let mut fixture = Fixture::new("?s 42 ?o".parse().unwrap());
        fixture.execute();
        assert_eq!(fixture.slave_message_types(1), [MessageType::QueryCreate]);

        fixture.coordinator.inbox().notify_created();
        fixture.execute();
        assert_eq!(fixture.coordinator.inbox().state(), QueryTaskState::Created);

        fixture.coordinator.inbox().notify_created();
        fixture.execute();
        assert_eq!(fixture.coordinator.inbox().state(), QueryTaskState::Started);
        assert_eq!(
            fixture.slave_message_types(2),
            [MessageType::QueryCreate, MessageType::QueryStart]
        );
    }

    #[test]
    fn results_are_sliced_and_query_is_aborted_at_limit() {
        let plan = "?s 42 ?o".parse::<QueryPlan>().unwrap().with_offset(1).with_limit(2);
        let mut fixture = Fixture::new(plan);
        fixture.start();
        for subject in 1..=4 {
            fixture.send_result(subject, subject + 10);
        }
        fixture.execute();

        assert!(fixture.coordinator.is_in_final_state());
        insta::assert_debug_snapshot!(fixture.client_messages(), @r"
        [
            QueryResult {
                rows: [
                    [
                        2,
                        12,
                    ],
                    [
                        3,
                        13,
                    ],
                ],
            },
            Succeeded,
        ]
        ");
        assert_eq!(
            fixture.slave_message_types(1).last(),
            Some(&MessageType::QueryAbortion)
        );
    }

    #[test]
    fn query_succeeds_once_all_roots_finished() {
        let mut fixture = Fixture::new("?s 42 ?o".parse().unwrap());
        fixture.start();
        fixture.send_result(1, 2);
        fixture.coordinator.inbox().notify_finished();
        fixture.execute();
        assert!(!fixture.coordinator.is_in_final_state());

        fixture.coordinator.inbox().notify_finished();
        fixture.execute();
        assert_eq!(
            fixture.client_messages(),
            [
                ClientMessage::QueryResult {
                    rows: vec![vec![1, 2]]
                },
                ClientMessage::Succeeded
            ]
        );
        assert_eq!(fixture.coordinator.inbox().state(), QueryTaskState::Finished);
    }

    #[test]
    fn slave_failure_fails_query() {
        let mut fixture = Fixture::new("?s 42 ?o".parse().unwrap());
        fixture.start();
        fixture.coordinator.inbox().record_failure("Slave 2: disk full");
        fixture.execute();
        assert_eq!(
            fixture.client_messages(),
            [ClientMessage::Failed("Slave 2: disk full".to_owned())]
        );
        assert_eq!(fixture.coordinator.inbox().state(), QueryTaskState::Failed);
        let last = fixture.slave_messages(1).pop().unwrap();
        assert!(matches!(
            Message::decode(&last).unwrap(),
            Message::QueryAbortion { query_id: 4 }
        ));
    }
}
