use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

/// The life cycle of a query task.
///
/// ```text
/// Created -> Started -> WaitingForOthersToFinish -> Finished
///    |          |                 |
///    +----------+-----------------+--> Aborted | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueryTaskState {
    Created = 0,
    Started = 1,
    /// The local replica is done and waits for the finish notifications of the other replicas.
    WaitingForOthersToFinish = 2,
    Finished = 3,
    Aborted = 4,
    Failed = 5,
}

impl QueryTaskState {
    /// Returns true if the task will not do any more work.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            QueryTaskState::Finished | QueryTaskState::Aborted | QueryTaskState::Failed
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => QueryTaskState::Created,
            1 => QueryTaskState::Started,
            2 => QueryTaskState::WaitingForOthersToFinish,
            3 => QueryTaskState::Finished,
            4 => QueryTaskState::Aborted,
            _ => QueryTaskState::Failed,
        }
    }
}

impl Display for QueryTaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryTaskState::Created => "CREATED",
            QueryTaskState::Started => "STARTED",
            QueryTaskState::WaitingForOthersToFinish => "WAITING_FOR_OTHERS_TO_FINISH",
            QueryTaskState::Finished => "FINISHED",
            QueryTaskState::Aborted => "ABORTED",
            QueryTaskState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A [QueryTaskState] that can be changed from other threads, e.g., by the control loop that
/// starts or aborts a query.
#[derive(Debug)]
pub struct AtomicTaskState(AtomicU8);

impl AtomicTaskState {
    pub fn new(state: QueryTaskState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> QueryTaskState {
        QueryTaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Changes the state from `current` to `new`. Returns false if the state was not `current`.
    pub fn transition(&self, current: QueryTaskState, new: QueryTaskState) -> bool {
        self.0
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves the state to `new` unless the state is already final.
    pub fn finish_with(&self, new: QueryTaskState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (!QueryTaskState::from_u8(state).is_final()).then_some(new as u8)
            })
            .is_ok()
    }
}
