use koral_common::{KoralConfig, Message, MessageType};
use koral_encoding::{MappingBatchIter, MappingRecycleCache};
use koral_execution::{
    ClientMessage, CoordinatorSettings, MessageReceiver, MessageSenderBuffer,
    QueryExecutionCoordinator, QueryExecutionTreeBuilder, QueryExecutionTreeType, QueryPlan,
    TaskInbox, WorkerManager,
};
use koral_model::{PatternTerm, QueryId, TaskId, TriplePattern, Variable};
use koral_network::{MemoryCluster, MessageTransport};
use koral_storage::{load_triples, MemTripleStore, TripleStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Computer {
    transport: Arc<dyn MessageTransport>,
    manager: WorkerManager,
}

impl Computer {
    /// Handles all received messages the way the control loop does.
    fn dispatch(&self) {
        while let Some(bytes) = self.transport.receive(false) {
            match Message::decode(&bytes).unwrap() {
                Message::QueryCreate { query_id, tree } => self.manager.create_query(query_id, tree),
                Message::QueryStart { query_id } => self.manager.start_query(query_id),
                Message::QueryAbortion { query_id } => self.manager.abort_query(query_id),
                message => self.manager.receiver().receive(&message).unwrap(),
            }
        }
    }
}

struct TestCluster {
    config: KoralConfig,
    computers: Vec<Computer>,
    _tmp_dir: TempDir,
}

impl TestCluster {
    /// Creates a master and one slave per chunk. A slave without chunk has no triple store.
    fn new(chunks: &[Option<&str>]) -> Self {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = config(chunks.len(), tmp_dir.path());
        let number_of_slaves = u16::try_from(chunks.len()).unwrap();
        let cluster = MemoryCluster::new(number_of_slaves);
        let containment_size = koral_encoding::containment_size(number_of_slaves);

        let mut computers = vec![computer(&config, &cluster, 0, None)];
        for (index, chunk) in chunks.iter().enumerate() {
            let id = u16::try_from(index + 1).unwrap();
            let store = chunk.map(|chunk| {
                let store: Arc<dyn TripleStore> = Arc::new(MemTripleStore::new(containment_size));
                load_triples(store.as_ref(), chunk.as_bytes(), id).unwrap();
                store
            });
            computers.push(computer(&config, &cluster, id, store));
        }
        Self {
            config,
            computers,
            _tmp_dir: tmp_dir,
        }
    }

    fn master(&self) -> &Computer {
        &self.computers[0]
    }

    fn submit(
        &self,
        query_id: QueryId,
        plan: &QueryPlan,
        tree_type: QueryExecutionTreeType,
    ) -> mpsc::UnboundedReceiver<ClientMessage> {
        let tree = QueryExecutionTreeBuilder::new(tree_type, 10)
            .build(query_id, plan)
            .unwrap();
        let (sink, client) = mpsc::unbounded_channel();
        let coordinator = QueryExecutionCoordinator::new(
            &tree,
            CoordinatorSettings::new(&self.config),
            Box::new(sink),
        );
        let manager = &self.master().manager;
        manager.receiver().register(Arc::clone(coordinator.inbox()));
        manager.add_task(Box::new(coordinator));
        client
    }

    fn run_round(&self) {
        for computer in &self.computers {
            computer.dispatch();
            computer.manager.run_round();
        }
    }

    fn run_query(&self, client: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        for _ in 0..10_000 {
            self.run_round();
            while let Ok(message) = client.try_recv() {
                let done = matches!(message, ClientMessage::Succeeded | ClientMessage::Failed(_));
                messages.push(message);
                if done {
                    return messages;
                }
            }
        }
        panic!("query did not finish: {messages:?}");
    }
}

fn config(number_of_slaves: usize, tmp_dir: &Path) -> KoralConfig {
    KoralConfig {
        slaves: (1..=number_of_slaves)
            .map(|id| format!("127.0.0.1:{}", 4710 + id))
            .collect(),
        number_of_worker_threads: Some(2),
        mapping_bundle_size: 10,
        max_emitted_mappings_per_round: 10,
        tmp_dir: tmp_dir.to_path_buf(),
        ..KoralConfig::default()
    }
}

fn computer(
    config: &KoralConfig,
    cluster: &MemoryCluster,
    id: u16,
    store: Option<Arc<dyn TripleStore>>,
) -> Computer {
    let transport: Arc<dyn MessageTransport> = Arc::new(cluster.transport(id).unwrap());
    let receiver = Arc::new(MessageReceiver::new(Arc::clone(&transport), 100));
    let manager = WorkerManager::new(config, Arc::clone(&transport), receiver, store);
    Computer { transport, manager }
}

fn rows(messages: &[ClientMessage]) -> Vec<Vec<u64>> {
    messages
        .iter()
        .filter_map(|message| match message {
            ClientMessage::QueryResult { rows } => Some(rows.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn match_returns_triples_in_store_order() {
    let cluster = TestCluster::new(&[Some("1 42 2 .\n3 42 4 .\n5 7 6 ."), Some("")]);
    let plan = "?s 42 ?o".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(1, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert_eq!(rows(&messages), [[1, 2], [3, 4]]);
}

#[test]
fn join_across_slaves() {
    let cluster = TestCluster::new(&[
        Some("1 10 100 .\n2 10 100 .\n2 20 100 .\n3 20 100 ."),
        Some("3 10 100 .\n4 20 100 ."),
    ]);
    let plan = "?x 10 100 . ?x 20 100".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(2, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    let mut rows = rows(&messages);
    rows.sort_unstable();
    assert_eq!(rows, [[2], [3]]);
}

#[test]
fn bushy_join_with_projection() {
    let cluster = TestCluster::new(&[
        Some("1 1 2 .\n2 2 3 .\n3 3 4 .\n9 3 4 ."),
        Some("5 1 6 .\n6 2 3 .\n3 4 8 ."),
    ]);
    let plan = "?a 1 ?b . ?b 2 ?c . ?c 3 ?d"
        .parse::<QueryPlan>()
        .unwrap()
        .with_projection(&["d", "a"])
        .unwrap();
    let mut client = cluster.submit(3, &plan, QueryExecutionTreeType::Bushy);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    let mut rows = rows(&messages);
    rows.sort_unstable();
    assert_eq!(rows, [[4, 1], [4, 5]]);
}

#[test]
fn limit_stops_query() {
    let chunk = (1..=50)
        .map(|subject| format!("{subject} 42 {}", subject + 100))
        .collect::<Vec<_>>()
        .join("\n");
    let cluster = TestCluster::new(&[Some(&chunk), Some("")]);
    let plan = "?s 42 ?o"
        .parse::<QueryPlan>()
        .unwrap()
        .with_offset(5)
        .with_limit(3);
    let mut client = cluster.submit(4, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert_eq!(rows(&messages), [[6, 106], [7, 107], [8, 108]]);

    for _ in 0..3 {
        cluster.run_round();
    }
    for computer in &cluster.computers {
        assert!(computer.manager.receiver().is_empty());
    }
}

#[test]
fn slave_without_store_fails_query() {
    let cluster = TestCluster::new(&[Some("1 42 2 ."), None]);
    let plan = "?s 42 ?o".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(5, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(
        messages.last(),
        Some(&ClientMessage::Failed(
            "Slave 2: Matching triple patterns requires a triple store".to_owned()
        ))
    );
}

#[test]
fn aborted_query_is_removed_within_one_round() {
    let cluster = TestCluster::new(&[Some("1 42 2 .\n3 42 4 ."), Some("5 42 6 .")]);
    let plan = "?s 42 ?o . ?o 42 ?x".parse::<QueryPlan>().unwrap();
    let tree = QueryExecutionTreeBuilder::new(QueryExecutionTreeType::LeftLinear, 10)
        .build(6, &plan)
        .unwrap();
    let slave = &cluster.computers[1].manager;
    slave.create_query(6, &tree.serialize());
    slave.start_query(6);
    assert_eq!(slave.receiver().len(), 3);
    assert!(slave.estimated_loads().iter().sum::<u64>() > 0);

    slave.abort_query(6);
    assert!(slave.receiver().is_empty());
    slave.run_round();
    assert_eq!(slave.estimated_loads().iter().sum::<u64>(), 0);
}

#[test]
fn aborted_query_emits_no_further_mappings() {
    let chunk = |first: u64| {
        (first..first + 200)
            .map(|subject| format!("{subject} 42 {}", subject + 1000))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let (first, second) = (chunk(1), chunk(501));
    let cluster = TestCluster::new(&[Some(&first), Some(&second)]);
    let plan = "?s 42 ?o".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(8, &plan, QueryExecutionTreeType::LeftLinear);

    let mut received_rows = false;
    for _ in 0..100 {
        cluster.run_round();
        while let Ok(message) = client.try_recv() {
            received_rows |= matches!(message, ClientMessage::QueryResult { .. });
        }
        if received_rows {
            break;
        }
    }
    assert!(received_rows);

    let master = &cluster.master().transport;
    while master.receive(false).is_some() {}
    let slaves = &cluster.computers[1..];
    for slave in slaves {
        slave.manager.abort_query(8);
    }
    for _ in 0..3 {
        for slave in slaves {
            slave.dispatch();
            slave.manager.run_round();
        }
    }

    assert!(master.receive(false).is_none());
    for slave in slaves {
        assert!(slave.manager.receiver().is_empty());
        assert_eq!(slave.manager.estimated_loads().iter().sum::<u64>(), 0);
    }
}

#[test]
fn cartesian_product_combines_all_pairs() {
    let cluster = TestCluster::new(&[Some("1 1 2 .\n3 1 4 ."), Some("5 2 6 .\n7 2 8 .")]);
    let plan = "?a 1 ?b . ?c 2 ?d".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(9, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    let mut rows = rows(&messages);
    rows.sort_unstable();
    assert_eq!(
        rows,
        [[1, 2, 5, 6], [1, 2, 7, 8], [3, 4, 5, 6], [3, 4, 7, 8]]
    );
}

#[test]
fn bound_pattern_forwards_other_side_when_it_matches() {
    let cluster = TestCluster::new(&[Some("1 1 2 .\n3 2 4 ."), Some("5 2 6 .")]);
    let plan = "1 1 2 . ?x 2 ?y".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(10, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    let mut rows = rows(&messages);
    rows.sort_unstable();
    assert_eq!(rows, [[3, 4], [5, 6]]);
}

#[test]
fn bound_pattern_without_match_discards_other_side() {
    let cluster = TestCluster::new(&[Some("1 1 2 .\n3 2 4 ."), Some("5 2 6 .")]);
    let plan = "9 9 9 . ?x 2 ?y".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(11, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert!(rows(&messages).is_empty());
}

#[test]
fn replicated_triple_is_reported_by_every_slave_that_stores_it() {
    let cluster = TestCluster::new(&[Some("1 10 100 2 ."), Some("1 10 100 1 .")]);
    let plan = "?s 10 100".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(12, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert_eq!(rows(&messages), [[1], [1]]);
}

#[test]
fn replicated_triple_joins_once() {
    let cluster = TestCluster::new(&[
        Some("1 10 100 2 .\n1 20 100 ."),
        Some("1 10 100 1 ."),
    ]);
    let plan = "?x 10 100 . ?x 20 100".parse::<QueryPlan>().unwrap();
    let mut client = cluster.submit(13, &plan, QueryExecutionTreeType::LeftLinear);

    let messages = cluster.run_query(&mut client);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert_eq!(rows(&messages), [[1]]);
}

#[test]
fn batched_mappings_arrive_in_order() {
    let cluster = MemoryCluster::new(2);
    let sending: Arc<dyn MessageTransport> = Arc::new(cluster.transport(1).unwrap());
    let receiving: Arc<dyn MessageTransport> = Arc::new(cluster.transport(2).unwrap());
    let mut sender = MessageSenderBuffer::new(
        Arc::clone(&sending),
        Arc::new(MessageReceiver::new(Arc::clone(&sending), 10)),
        50,
        0,
    );
    let receiver = MessageReceiver::new(Arc::clone(&receiving), 10);
    let tmp_dir = tempfile::tempdir().unwrap();
    let target = Arc::new(TaskInbox::new(
        TaskId::new(2, 7, 2),
        &[TaskId::new(2, 7, 1)],
        100,
        tmp_dir.path(),
    ));
    receiver.register(Arc::clone(&target));

    let pattern = TriplePattern::new(
        PatternTerm::Variable(Variable::new(0)),
        PatternTerm::Resource(1),
        PatternTerm::Resource(2),
    );
    let mut cache = MappingRecycleCache::new(10, 2);
    for value in 0..1000 {
        let mapping = cache.create_mapping(&pattern, [value, 1, 2], &[0x80]).unwrap();
        sender
            .send_query_mapping(mapping, TaskId::new(1, 7, 1), TaskId::new(2, 7, 2), &mut cache)
            .unwrap();
    }
    sender.send_all_buffered_messages().unwrap();

    let mut messages = 0;
    while let Some(bytes) = receiving.receive(false) {
        messages += 1;
        assert_eq!(
            MessageType::of_message(&bytes).unwrap(),
            MessageType::QueryMappingBatch
        );
        assert_eq!(MappingBatchIter::new(&bytes[3..], 1).count(), 50);
        receiver.receive(&Message::decode(&bytes).unwrap()).unwrap();
    }
    assert_eq!(messages, 20);

    assert_eq!(target.queue_len(0), 1000);
    let values = std::iter::from_fn(|| target.pop(0, &mut cache).unwrap())
        .map(|mapping| mapping.values()[0])
        .collect::<Vec<_>>();
    assert_eq!(values, (0..1000).collect::<Vec<_>>());
}
