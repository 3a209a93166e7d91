#![cfg(test)]

use koral::common::KoralConfig;
use koral::error::KoralError;
use koral::execution::{ClientMessage, QueryExecutionTreeType, QueryPlan};
use koral::network::MemoryCluster;
use koral::{KoralMaster, KoralSlave};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(20);

/// A master and its slaves, each running its control loop and workers in own threads.
struct Cluster {
    master: Arc<KoralMaster>,
    slaves: Vec<Arc<KoralSlave>>,
    loops: Vec<JoinHandle<()>>,
    _tmp_dir: TempDir,
}

impl Cluster {
    fn start(chunks: &[&str]) -> Self {
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = KoralConfig {
            slaves: (1..=chunks.len())
                .map(|id| format!("127.0.0.1:{}", 4710 + id))
                .collect(),
            number_of_worker_threads: Some(2),
            mapping_bundle_size: 10,
            max_emitted_mappings_per_round: 10,
            tmp_dir: tmp_dir.path().to_path_buf(),
            ..KoralConfig::default()
        };
        let cluster = MemoryCluster::new(u16::try_from(chunks.len()).unwrap());

        let master = Arc::new(
            KoralMaster::new(config.clone(), Arc::new(cluster.transport(0).unwrap())).unwrap(),
        );
        let slaves = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let id = u16::try_from(index + 1).unwrap();
                let slave = KoralSlave::new(&config, Arc::new(cluster.transport(id).unwrap()));
                slave.load(chunk.as_bytes()).unwrap();
                Arc::new(slave)
            })
            .collect::<Vec<_>>();

        let mut loops = Vec::new();
        for slave in &slaves {
            slave.start().unwrap();
            let slave = Arc::clone(slave);
            loops.push(thread::spawn(move || slave.run()));
        }
        master.start().unwrap();
        let runner = Arc::clone(&master);
        loops.push(thread::spawn(move || runner.run()));

        Self {
            master,
            slaves,
            loops,
            _tmp_dir: tmp_dir,
        }
    }

    fn query(&self, plan: &str, tree_type: QueryExecutionTreeType) -> Vec<ClientMessage> {
        let plan = plan.parse::<QueryPlan>().unwrap();
        let (sink, mut results) = mpsc::unbounded_channel::<ClientMessage>();
        self.master
            .submit_query(&plan, tree_type, Box::new(sink))
            .unwrap();

        let deadline = Instant::now() + TIMEOUT;
        let mut messages = Vec::new();
        while Instant::now() < deadline {
            match results.try_recv() {
                Ok(message) => {
                    let done =
                        matches!(message, ClientMessage::Succeeded | ClientMessage::Failed(_));
                    messages.push(message);
                    if done {
                        return messages;
                    }
                }
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        panic!("query did not finish in time: {messages:?}");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.master.shutdown();
        for slave in &self.slaves {
            slave.shutdown();
        }
        for handle in self.loops.drain(..) {
            handle.join().unwrap();
        }
    }
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
fn match_over_running_cluster() {
    let cluster = Cluster::start(&["1 42 2 .\n3 42 4 .\n5 7 6 .", ""]);

    let messages = cluster.query("?s 42 ?o", QueryExecutionTreeType::LeftLinear);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert_eq!(rows(&messages), [[1, 2], [3, 4]]);
}

#[test]
fn join_over_running_cluster() {
    let cluster = Cluster::start(&[
        "1 10 100 .\n2 10 100 .\n2 20 100 .\n3 20 100 .",
        "3 10 100 .\n4 20 100 .",
    ]);

    for tree_type in [
        QueryExecutionTreeType::LeftLinear,
        QueryExecutionTreeType::RightLinear,
    ] {
        let messages = cluster.query("?x 10 100 . ?x 20 100", tree_type);
        assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
        let mut rows = rows(&messages);
        rows.sort_unstable();
        assert_eq!(rows, [[2], [3]]);
    }
}

#[test]
fn clear_empties_all_chunks() {
    let cluster = Cluster::start(&["1 2 3 .", "4 5 6 .\n7 8 9 ."]);
    assert_eq!(cluster.slaves[1].store().size(), 2);

    cluster.master.clear();
    let deadline = Instant::now() + TIMEOUT;
    while cluster.slaves.iter().any(|slave| slave.store().size() > 0) {
        assert!(Instant::now() < deadline, "slaves were not cleared");
        thread::sleep(Duration::from_millis(5));
    }

    let messages = cluster.query("?s ?p ?o", QueryExecutionTreeType::LeftLinear);
    assert_eq!(messages.last(), Some(&ClientMessage::Succeeded));
    assert!(rows(&messages).is_empty());
}

#[test]
fn slave_cannot_be_master() {
    let cluster = MemoryCluster::new(1);
    let result = KoralMaster::new(
        KoralConfig::default(),
        Arc::new(cluster.transport(1).unwrap()),
    );
    assert!(matches!(result, Err(KoralError::NotMaster(1))));
}
