use crate::MessageTransport;
use koral_model::ComputerId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An in-process cluster whose members exchange messages through channels.
///
/// Used to run a master and its slaves within one process, e.g., in tests.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inboxes: Arc<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    receivers: Arc<Mutex<Vec<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>>,
    reachable: Arc<Vec<AtomicBool>>,
}

impl MemoryCluster {
    /// Creates a new cluster with a master and `number_of_slaves` slaves.
    pub fn new(number_of_slaves: u16) -> Self {
        let (inboxes, receivers) = (0..=number_of_slaves)
            .map(|_| {
                let (sender, receiver) = mpsc::unbounded_channel();
                (sender, Some(receiver))
            })
            .unzip::<_, _, Vec<_>, Vec<_>>();
        Self {
            inboxes: Arc::new(inboxes),
            receivers: Arc::new(Mutex::new(receivers)),
            reachable: Arc::new((0..=number_of_slaves).map(|_| AtomicBool::new(true)).collect()),
        }
    }

    pub fn number_of_slaves(&self) -> u16 {
        u16::try_from(self.inboxes.len().saturating_sub(1)).unwrap_or(u16::MAX)
    }

    /// Returns the transport of `id`. Each transport can be taken once.
    pub fn transport(&self, id: ComputerId) -> Option<MemoryTransport> {
        let inbound = self.receivers.lock().get_mut(usize::from(id))?.take()?;
        Some(MemoryTransport {
            current_id: id,
            cluster: self.clone(),
            inbound: Mutex::new(inbound),
        })
    }

    /// Makes sends to `id` fail, simulating a lost connection.
    pub fn set_reachable(&self, id: ComputerId, reachable: bool) {
        if let Some(flag) = self.reachable.get(usize::from(id)) {
            flag.store(reachable, Ordering::Release);
        }
    }
}

/// The [MessageTransport] of one member of a [MemoryCluster].
#[derive(Debug)]
pub struct MemoryTransport {
    current_id: ComputerId,
    cluster: MemoryCluster,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MessageTransport for MemoryTransport {
    fn current_id(&self) -> ComputerId {
        self.current_id
    }

    fn number_of_slaves(&self) -> u16 {
        self.cluster.number_of_slaves()
    }

    fn send(&self, receiver: ComputerId, message: &[u8]) -> bool {
        let index = usize::from(receiver);
        let reachable = self
            .cluster
            .reachable
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire));
        reachable
            && self
                .cluster
                .inboxes
                .get(index)
                .is_some_and(|inbox| inbox.send(message.to_vec()).is_ok())
    }

    fn receive(&self, blocking: bool) -> Option<Vec<u8>> {
        let mut inbound = self.inbound.lock();
        if blocking {
            inbound.blocking_recv()
        } else {
            inbound.try_recv().ok()
        }
    }
}
