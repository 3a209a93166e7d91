use crate::framing::{read_frame, write_frame};
use crate::{MessageTransport, NetworkContext, NetworkError};
use koral_common::{ClusterAddresses, KoralConfig};
use koral_model::ComputerId;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// The number of messages per destination that may wait for their connection.
const OUTBOUND_QUEUE_SIZE: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Sends and receives messages over TCP.
///
/// Each destination has its own writer task that owns the connection, so messages to one
/// destination are written in order. Received messages of all connections are collected in a
/// single inbound queue. Messages to the current computer bypass the network.
#[derive(Debug)]
pub struct NetworkManager {
    context: NetworkContext,
    current_id: ComputerId,
    number_of_slaves: u16,
    local_address: SocketAddr,
    outbound: Vec<Option<mpsc::Sender<Vec<u8>>>>,
    loopback: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    send_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkManager {
    /// Binds the address of the current computer as configured in `config`.
    pub async fn bind(context: NetworkContext, config: &KoralConfig) -> Result<Self, NetworkError> {
        let current_id = config.current_id()?;
        let addresses = config.cluster_addresses()?;
        let address = addresses
            .member(current_id)
            .ok_or(NetworkError::UnknownComputer(current_id))?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| NetworkError::Bind { address, source })?;
        Self::with_listener(
            context,
            current_id,
            &addresses,
            listener,
            config.send_timeout(),
        )
    }

    /// Creates a new [NetworkManager] that accepts connections on an already bound `listener`.
    pub fn with_listener(
        context: NetworkContext,
        current_id: ComputerId,
        addresses: &ClusterAddresses,
        listener: TcpListener,
        send_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        if addresses.member(current_id).is_none() {
            return Err(NetworkError::UnknownComputer(current_id));
        }
        let local_address = listener.local_addr()?;
        let (loopback, inbound) = mpsc::unbounded_channel();

        let mut tasks = vec![context.spawn(accept_loop(listener, loopback.clone()))];
        let mut outbound = Vec::new();
        for (id, address) in addresses.iter() {
            if id == current_id {
                outbound.push(None);
                continue;
            }
            let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
            tasks.push(context.spawn(write_loop(id, address, receiver)));
            outbound.push(Some(sender));
        }

        info!(current_id, %local_address, "Network started");
        Ok(Self {
            context,
            current_id,
            number_of_slaves: addresses.number_of_slaves(),
            local_address,
            outbound,
            loopback,
            inbound: Mutex::new(inbound),
            send_timeout,
            tasks,
        })
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Stops accepting connections and drops all pending outbound messages.
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl MessageTransport for NetworkManager {
    fn current_id(&self) -> ComputerId {
        self.current_id
    }

    fn number_of_slaves(&self) -> u16 {
        self.number_of_slaves
    }

    fn send(&self, receiver: ComputerId, message: &[u8]) -> bool {
        if receiver == self.current_id {
            return self.loopback.send(message.to_vec()).is_ok();
        }
        let Some(Some(sender)) = self.outbound.get(usize::from(receiver)) else {
            warn!(receiver, "Cannot send to unknown computer");
            return false;
        };
        if Handle::try_current().is_ok() {
            // Blocking is not allowed on a runtime thread, so only a free queue slot is used.
            return match sender.try_send(message.to_vec()) {
                Ok(()) => true,
                Err(error) => {
                    debug!(receiver, %error, "Send from runtime thread failed");
                    false
                }
            };
        }
        match self
            .context
            .block_on(sender.send_timeout(message.to_vec(), self.send_timeout))
        {
            Ok(()) => true,
            Err(error) => {
                debug!(receiver, %error, "Send failed");
                false
            }
        }
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

async fn accept_loop(listener: TcpListener, inbound: mpsc::UnboundedSender<Vec<u8>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                trace!(%peer, "Accepted connection");
                tokio::spawn(read_loop(stream, peer, inbound.clone()));
            }
            Err(error) => warn!(%error, "Failed to accept connection"),
        }
    }
}

async fn read_loop(
    mut stream: TcpStream,
    peer: SocketAddr,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(message)) => {
                if inbound.send(message).is_err() {
                    return;
                }
            }
            Ok(None) => {
                trace!(%peer, "Connection closed");
                return;
            }
            Err(error) => {
                warn!(%peer, %error, "Dropping connection");
                return;
            }
        }
    }
}

/// Writes the messages for one destination. A message is retried on a new connection until it
/// is written, so later messages never overtake it.
async fn write_loop(
    receiver: ComputerId,
    address: SocketAddr,
    mut messages: mpsc::Receiver<Vec<u8>>,
) {
    let mut stream: Option<TcpStream> = None;
    while let Some(message) = messages.recv().await {
        loop {
            if stream.is_none() {
                match TcpStream::connect(address).await {
                    Ok(connection) => {
                        if let Err(error) = connection.set_nodelay(true) {
                            debug!(receiver, %error, "Could not disable Nagle's algorithm");
                        }
                        stream = Some(connection);
                    }
                    Err(error) => {
                        debug!(receiver, %address, %error, "Could not connect");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
            let Some(connection) = stream.as_mut() else {
                continue;
            };
            match write_frame(connection, &message).await {
                Ok(()) => break,
                Err(error) => {
                    warn!(receiver, %error, "Connection lost, reconnecting");
                    stream = None;
                }
            }
        }
    }
}
