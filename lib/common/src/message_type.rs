use crate::ProtocolError;
use std::fmt::{Display, Formatter};

/// The type of a message. The discriminant is the first byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ConnectionClosed = 0,
    ClientConnectionCreation = 1,
    ClientConnectionConfirmation = 2,
    ClientClosesConnection = 3,
    ClientIsAlive = 4,
    ClientCommand = 5,
    MasterSendFiles = 6,
    ClientFilesSent = 7,
    MasterWorkInProgress = 8,
    QueryResult = 9,
    ClientCommandAborted = 10,
    ClientCommandSucceeded = 11,
    ClientCommandFailed = 12,
    StartFileTransfer = 13,
    GraphLoadingFailed = 14,
    GraphLoadingComplete = 15,
    QueryCreate = 16,
    QueryCreated = 17,
    QueryStart = 18,
    QueryAbortion = 19,
    QueryMappingBatch = 20,
    QueryTaskFinished = 21,
    QueryTaskFailed = 22,
    Clear = 23,
}

impl MessageType {
    const ALL: [MessageType; 24] = [
        MessageType::ConnectionClosed,
        MessageType::ClientConnectionCreation,
        MessageType::ClientConnectionConfirmation,
        MessageType::ClientClosesConnection,
        MessageType::ClientIsAlive,
        MessageType::ClientCommand,
        MessageType::MasterSendFiles,
        MessageType::ClientFilesSent,
        MessageType::MasterWorkInProgress,
        MessageType::QueryResult,
        MessageType::ClientCommandAborted,
        MessageType::ClientCommandSucceeded,
        MessageType::ClientCommandFailed,
        MessageType::StartFileTransfer,
        MessageType::GraphLoadingFailed,
        MessageType::GraphLoadingComplete,
        MessageType::QueryCreate,
        MessageType::QueryCreated,
        MessageType::QueryStart,
        MessageType::QueryAbortion,
        MessageType::QueryMappingBatch,
        MessageType::QueryTaskFinished,
        MessageType::QueryTaskFailed,
        MessageType::Clear,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Reads the type of `message` from its first byte.
    pub fn of_message(message: &[u8]) -> Result<Self, ProtocolError> {
        let first = message.first().ok_or(ProtocolError::EmptyMessage)?;
        Self::try_from(*first)
    }

    /// Returns true if messages of this type are exchanged between master and slaves while
    /// executing queries.
    pub fn is_query_message(self) -> bool {
        matches!(
            self,
            MessageType::QueryCreate
                | MessageType::QueryCreated
                | MessageType::QueryStart
                | MessageType::QueryAbortion
                | MessageType::QueryMappingBatch
                | MessageType::QueryTaskFinished
                | MessageType::QueryTaskFailed
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ProtocolError::UnknownMessageType(value))
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
