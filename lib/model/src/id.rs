use std::fmt::{Display, Formatter};

/// Identifies a member of the cluster. The master has the id 0, slaves are numbered from 1.
pub type ComputerId = u16;

/// Identifies a query within the cluster.
pub type QueryId = u32;

/// A dictionary-encoded RDF term.
///
/// The upper 16 bits encode the owner of the resource, see [owner_of].
pub type ResourceId = u64;

/// The id of the master.
pub const MASTER_ID: ComputerId = 0;

const COMPUTER_SHIFT: u32 = 48;
const QUERY_SHIFT: u32 = 16;
const BASE_ID_MASK: u64 = 0x0000_ffff_ffff_ffff;
const QUERY_MASK: u64 = 0x0000_ffff_ffff_0000;
const LOCAL_TASK_MASK: u64 = 0x0000_0000_0000_ffff;

/// Returns the slave that owns `resource`.
///
/// The owner is stored in the upper 16 bits of a resource id, counting slaves from zero.
pub fn owner_of(resource: ResourceId) -> ComputerId {
    let owner = u16::try_from(resource >> COMPUTER_SHIFT).unwrap_or(u16::MAX);
    owner.saturating_add(1)
}

/// Identifies a single replica of a query task.
///
/// The layout is `(computer:16)(query:32)(task:16)`. The lower 48 bits are called the *base id*
/// and are identical for all replicas of a task. The task with the local id 0 on the master is
/// the coordinator of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a new [TaskId].
    pub const fn new(computer: ComputerId, query: QueryId, task: u16) -> Self {
        Self(
            ((computer as u64) << COMPUTER_SHIFT)
                | ((query as u64) << QUERY_SHIFT)
                | task as u64,
        )
    }

    /// Creates the id of the coordinator of `query`.
    pub const fn coordinator(query: QueryId) -> Self {
        Self::new(MASTER_ID, query, 0)
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the computer that runs this replica.
    #[allow(clippy::cast_possible_truncation, reason = "Shift leaves 16 bits")]
    pub const fn computer_id(self) -> ComputerId {
        (self.0 >> COMPUTER_SHIFT) as ComputerId
    }

    #[allow(clippy::cast_possible_truncation, reason = "Mask leaves 32 bits")]
    pub const fn query_id(self) -> QueryId {
        ((self.0 & QUERY_MASK) >> QUERY_SHIFT) as QueryId
    }

    /// Returns the id of the task within its query.
    #[allow(clippy::cast_possible_truncation, reason = "Mask leaves 16 bits")]
    pub const fn local_task_id(self) -> u16 {
        (self.0 & LOCAL_TASK_MASK) as u16
    }

    /// Returns the id without the computer part.
    pub const fn base_id(self) -> u64 {
        self.0 & BASE_ID_MASK
    }

    /// Returns the replica of this task on `computer`.
    #[must_use]
    pub const fn on_computer(self, computer: ComputerId) -> Self {
        Self(self.base_id() | ((computer as u64) << COMPUTER_SHIFT))
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.computer_id(),
            self.query_id(),
            self.local_task_id()
        )
    }
}
