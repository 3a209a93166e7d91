use crate::NetworkError;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// The runtime on which all network I/O of a process runs.
///
/// The context is created once by the process and handed to every [crate::NetworkManager].
/// Synchronous code, such as worker threads, uses it to wait for network operations.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    handle: Handle,
}

impl NetworkContext {
    /// Creates a new [NetworkContext] that runs on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a new [NetworkContext] on the runtime of the caller.
    pub fn current() -> Result<Self, NetworkError> {
        Ok(Self::new(Handle::try_current()?))
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` to completion on the network runtime.
    ///
    /// Must not be called from within an asynchronous context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
