use koral_model::{ComputerId, MASTER_ID};
use std::fmt::Debug;

/// Point-to-point messaging between the members of the cluster.
///
/// The master has the id 0, slaves are numbered from 1. Messages between two members are
/// delivered in the order in which they were sent.
pub trait MessageTransport: Send + Sync + Debug {
    fn current_id(&self) -> ComputerId;

    fn number_of_slaves(&self) -> u16;

    /// Sends `message` to `receiver`. Returns false if the message could not be handed over
    /// within the send timeout. The caller decides whether to retry.
    fn send(&self, receiver: ComputerId, message: &[u8]) -> bool;

    /// Returns the next received message. If `blocking` is false, returns immediately.
    fn receive(&self, blocking: bool) -> Option<Vec<u8>>;

    /// Sends `message` to all slaves. Returns false if any send failed.
    fn send_to_all_slaves(&self, message: &[u8]) -> bool {
        let mut success = true;
        for slave in 1..=self.number_of_slaves() {
            success &= self.send(slave, message);
        }
        success
    }

    /// Sends `message` to all slaves except the current computer.
    fn send_to_all_other_slaves(&self, message: &[u8]) -> bool {
        let current = self.current_id();
        let mut success = true;
        for slave in (1..=self.number_of_slaves()).filter(|slave| *slave != current) {
            success &= self.send(slave, message);
        }
        success
    }

    fn is_master(&self) -> bool {
        self.current_id() == MASTER_ID
    }
}
