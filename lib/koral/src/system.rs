use koral_common::{KoralConfig, Message, MessageType};
use koral_execution::{MessageReceiver, WorkerManager};
use koral_network::MessageTransport;
use koral_storage::TripleStore;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Handles the received messages of some [MessageType]s.
pub trait MessageListener: Send + Sync + Debug {
    fn supported_types(&self) -> &'static [MessageType];

    fn process(&self, message: &Message<'_>);
}

/// The control loop of a computer.
///
/// Every iteration receives all pending messages without blocking and passes each to the
/// listeners that support its type. Malformed messages are dropped.
#[derive(Debug)]
pub struct KoralSystem {
    transport: Arc<dyn MessageTransport>,
    listeners: Vec<Arc<dyn MessageListener>>,
    shutdown: Arc<AtomicBool>,
}

impl KoralSystem {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            transport,
            listeners: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.listeners.push(listener);
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    /// Handles all messages that have been received so far. Returns their number.
    pub fn run_one_iteration(&self) -> usize {
        let mut processed = 0;
        while let Some(bytes) = self.transport.receive(false) {
            processed += 1;
            self.dispatch(&bytes);
        }
        processed
    }

    fn dispatch(&self, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!("Dropping malformed message: {error}");
                return;
            }
        };
        let message_type = message.message_type();
        trace!(?message_type, "Received message");
        let mut handled = false;
        for listener in &self.listeners {
            if listener.supported_types().contains(&message_type) {
                listener.process(&message);
                handled = true;
            }
        }
        if !handled {
            debug!(?message_type, "No listener for message");
        }
    }

    /// Runs the control loop until [KoralSystem::shutdown] is called.
    ///
    /// The loop sleeps for a growing interval while no messages arrive.
    pub fn run(&self) {
        info!(computer = self.transport.current_id(), "Control loop started");
        let mut backoff = MIN_BACKOFF;
        while !self.is_shut_down() {
            if self.run_one_iteration() > 0 {
                backoff = MIN_BACKOFF;
            } else {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
        info!(computer = self.transport.current_id(), "Control loop stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

pub(crate) fn worker_manager(
    config: &KoralConfig,
    transport: &Arc<dyn MessageTransport>,
    store: Option<Arc<dyn TripleStore>>,
) -> Arc<WorkerManager> {
    let receiver = Arc::new(MessageReceiver::new(
        Arc::clone(transport),
        config.size_of_mapping_recycle_cache,
    ));
    Arc::new(WorkerManager::new(
        config,
        Arc::clone(transport),
        receiver,
        store,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use koral_network::MemoryCluster;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingListener {
        received: Mutex<Vec<MessageType>>,
    }

    impl MessageListener for RecordingListener {
        fn supported_types(&self) -> &'static [MessageType] {
            &[MessageType::Clear, MessageType::QueryStart]
        }

        fn process(&self, message: &Message<'_>) {
            self.received.lock().unwrap().push(message.message_type());
        }
    }

    #[test]
    fn messages_reach_listeners_of_their_type() {
        let cluster = MemoryCluster::new(1);
        let master = cluster.transport(0).unwrap();
        let transport: Arc<dyn MessageTransport> = Arc::new(cluster.transport(1).unwrap());
        let listener = Arc::new(RecordingListener::default());
        let mut system = KoralSystem::new(transport);
        system.register_listener(listener.clone());

        assert!(master.send(1, &Message::QueryStart { query_id: 3 }.encode()));
        assert!(master.send(1, &Message::QueryAbortion { query_id: 3 }.encode()));
        assert!(master.send(1, &[]));
        assert!(master.send(1, &Message::Clear.encode()));

        assert_eq!(system.run_one_iteration(), 4);
        assert_eq!(
            *listener.received.lock().unwrap(),
            [MessageType::QueryStart, MessageType::Clear]
        );
        assert_eq!(system.run_one_iteration(), 0);
    }

    #[test]
    fn shutdown_stops_loop() {
        let cluster = MemoryCluster::new(1);
        let system = KoralSystem::new(Arc::new(cluster.transport(1).unwrap()));
        system.shutdown();
        system.run();
        assert!(system.is_shut_down());
    }
}
