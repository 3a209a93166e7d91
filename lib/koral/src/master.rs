use crate::error::KoralError;
use crate::system::worker_manager;
use crate::{KoralSystem, QueryMessageListener};
use koral_common::{KoralConfig, Message};
use koral_execution::{
    CoordinatorSettings, QueryExecutionCoordinator, QueryExecutionTreeBuilder,
    QueryExecutionTreeType, QueryPlan, ResultSink, WorkerManager,
};
use koral_model::QueryId;
use koral_network::{MessageTransport, NetworkContext, NetworkManager};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The master of a Koral cluster.
///
/// The master holds no triples. For every submitted query it builds the execution tree and
/// schedules a [QueryExecutionCoordinator] on its own workers, which distributes the tree to
/// the slaves and forwards the results to a [ResultSink].
///
/// ```no_run
/// # use koral::KoralMaster;
/// # use koral::common::KoralConfig;
/// # use koral::execution::{ClientMessage, QueryExecutionTreeType, QueryPlan};
/// # use koral::network::NetworkContext;
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let master = KoralMaster::bind(NetworkContext::current()?, KoralConfig::default()).await?;
/// master.start()?;
/// let (sink, mut results) = tokio::sync::mpsc::unbounded_channel::<ClientMessage>();
/// let plan = "?s 42 ?o".parse::<QueryPlan>()?;
/// master.submit_query(&plan, QueryExecutionTreeType::LeftLinear, Box::new(sink))?;
/// while let Some(message) = results.recv().await {
///     println!("{message:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KoralMaster {
    config: KoralConfig,
    system: KoralSystem,
    manager: Arc<WorkerManager>,
    next_query_id: AtomicU32,
}

impl KoralMaster {
    /// Creates the master on the computer of `transport`, which must be computer 0.
    pub fn new(
        config: KoralConfig,
        transport: Arc<dyn MessageTransport>,
    ) -> Result<Self, KoralError> {
        if !transport.is_master() {
            return Err(KoralError::NotMaster(transport.current_id()));
        }
        let manager = worker_manager(&config, &transport, None);
        let mut system = KoralSystem::new(transport);
        system.register_listener(Arc::new(QueryMessageListener::new(Arc::clone(&manager))));
        Ok(Self {
            config,
            system,
            manager,
            next_query_id: AtomicU32::new(1),
        })
    }

    /// Connects the master to the cluster described by `config`.
    pub async fn bind(context: NetworkContext, mut config: KoralConfig) -> Result<Self, KoralError> {
        config.current_id = Some(0);
        config.validate()?;
        let network = NetworkManager::bind(context, &config).await?;
        Self::new(config, Arc::new(network))
    }

    pub fn config(&self) -> &KoralConfig {
        &self.config
    }

    pub fn system(&self) -> &KoralSystem {
        &self.system
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    /// Starts the worker threads.
    pub fn start(&self) -> Result<(), KoralError> {
        self.manager.start()?;
        Ok(())
    }

    /// Builds the execution tree of `plan` and schedules its coordinator.
    ///
    /// All progress of the query, including failures, is reported to `sink`.
    pub fn submit_query(
        &self,
        plan: &QueryPlan,
        tree_type: QueryExecutionTreeType,
        sink: Box<dyn ResultSink>,
    ) -> Result<QueryId, KoralError> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let emitted_mappings_per_round =
            u32::try_from(self.config.max_emitted_mappings_per_round).unwrap_or(u32::MAX);
        let tree = QueryExecutionTreeBuilder::new(tree_type, emitted_mappings_per_round)
            .build(query_id, plan)?;
        debug!(query_id, "Built query execution tree\n{tree}");

        let mut settings = CoordinatorSettings::new(&self.config);
        settings.number_of_slaves = self.system.transport().number_of_slaves();
        let coordinator = QueryExecutionCoordinator::new(&tree, settings, sink);
        self.manager.receiver().register(Arc::clone(coordinator.inbox()));
        self.manager.add_task(Box::new(coordinator));
        info!(query_id, %tree_type, "Submitted query");
        Ok(query_id)
    }

    /// Aborts all queries and removes all triples from the slaves.
    ///
    /// Blocks until the request is queued for every slave. On a runtime thread the request is
    /// only queued if the outbound queue of a slave has room.
    pub fn clear(&self) {
        self.manager.clear();
        if !self
            .system
            .transport()
            .send_to_all_slaves(&Message::Clear.encode())
        {
            warn!("Not every slave could be asked to clear its chunk");
        }
    }

    /// Runs the control loop until [KoralMaster::shutdown] is called.
    pub fn run(&self) {
        self.system.run();
    }

    pub fn shutdown(&self) {
        self.system.shutdown();
        self.manager.shutdown();
    }
}
