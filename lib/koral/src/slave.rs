use crate::error::KoralError;
use crate::system::worker_manager;
use crate::{ClearListener, KoralSystem, QueryMessageListener};
use koral_common::KoralConfig;
use koral_execution::WorkerManager;
use koral_network::{MessageTransport, NetworkContext, NetworkManager};
use koral_storage::{load_triples, MemTripleStore, TripleStore};
use std::io::BufRead;
use std::sync::Arc;
use tracing::info;

/// A slave of a Koral cluster that stores one chunk of the graph.
#[derive(Debug)]
pub struct KoralSlave {
    system: KoralSystem,
    manager: Arc<WorkerManager>,
    store: Arc<dyn TripleStore>,
}

impl KoralSlave {
    /// Creates a slave with an empty [MemTripleStore].
    pub fn new(config: &KoralConfig, transport: Arc<dyn MessageTransport>) -> Self {
        let containment_size = koral_encoding::containment_size(transport.number_of_slaves());
        Self::with_store(
            config,
            transport,
            Arc::new(MemTripleStore::new(containment_size)),
        )
    }

    pub fn with_store(
        config: &KoralConfig,
        transport: Arc<dyn MessageTransport>,
        store: Arc<dyn TripleStore>,
    ) -> Self {
        let manager = worker_manager(config, &transport, Some(Arc::clone(&store)));
        let mut system = KoralSystem::new(transport);
        system.register_listener(Arc::new(QueryMessageListener::new(Arc::clone(&manager))));
        system.register_listener(Arc::new(ClearListener::new(
            Arc::clone(&manager),
            Some(Arc::clone(&store)),
        )));
        Self {
            system,
            manager,
            store,
        }
    }

    /// Connects the slave to the cluster described by `config`.
    pub async fn bind(context: NetworkContext, config: &KoralConfig) -> Result<Self, KoralError> {
        config.validate()?;
        let network = NetworkManager::bind(context, config).await?;
        Ok(Self::new(config, Arc::new(network)))
    }

    pub fn system(&self) -> &KoralSystem {
        &self.system
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn TripleStore> {
        &self.store
    }

    /// Adds the triples of `reader` to the local chunk. Returns their number.
    ///
    /// See [load_triples] for the accepted format.
    pub fn load(&self, reader: impl BufRead) -> Result<usize, KoralError> {
        let current = self.system.transport().current_id();
        let loaded = load_triples(self.store.as_ref(), reader, current)?;
        info!(slave_id = current, loaded, size = self.store.size(), "Loaded triples");
        Ok(loaded)
    }

    /// Starts the worker threads.
    pub fn start(&self) -> Result<(), KoralError> {
        self.manager.start()?;
        Ok(())
    }

    /// Runs the control loop until [KoralSlave::shutdown] is called.
    pub fn run(&self) {
        self.system.run();
    }

    pub fn shutdown(&self) {
        self.system.shutdown();
        self.manager.shutdown();
    }
}
