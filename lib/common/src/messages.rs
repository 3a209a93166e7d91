//! Codecs for the messages exchanged between master and slaves.
//!
//! All numbers are encoded in big-endian byte order. The first byte of every message is its
//! [MessageType]. The computer that sent a message is encoded as a 16-bit number directly
//! after the type for all messages that are answered or routed to a task.

use crate::bytes::ByteReader;
use crate::{MessageType, ProtocolError};
use koral_model::{ComputerId, QueryId, TaskId};

/// Size of the `[type][sender]` prefix of a mapping batch.
pub const MAPPING_BATCH_HEADER_SIZE: usize = 3;

/// A decoded message. Payloads borrow from the received byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// `[type][u32 query][tree]`
    QueryCreate { query_id: QueryId, tree: &'a [u8] },
    /// `[type][u16 sender][u64 coordinator]`
    QueryCreated {
        sender: ComputerId,
        coordinator: TaskId,
    },
    /// `[type][u32 query]`
    QueryStart { query_id: QueryId },
    /// `[type][u32 query]`
    QueryAbortion { query_id: QueryId },
    /// `[type][u16 sender][mapping]*`
    QueryMappingBatch {
        sender: ComputerId,
        mappings: &'a [u8],
    },
    /// `[type][u16 sender][u64 finished task]` if sent to the other replicas and
    /// `[type][u16 sender][u64 coordinator][u64 finished task]` if sent to the coordinator.
    QueryTaskFinished {
        sender: ComputerId,
        coordinator: Option<TaskId>,
        finished_task: TaskId,
    },
    /// `[type][u16 sender][u64 coordinator][utf-8 message]`
    QueryTaskFailed {
        sender: ComputerId,
        coordinator: TaskId,
        message: &'a str,
    },
    /// `[type]`
    Clear,
    /// A message that is not part of the query protocol (client connections, file transfer).
    Other {
        message_type: MessageType,
        payload: &'a [u8],
    },
}

impl<'a> Message<'a> {
    /// Decodes a message.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, ProtocolError> {
        let message_type = MessageType::of_message(bytes)?;
        let mut reader = ByteReader::new(bytes);
        reader.read_u8()?;
        let message = match message_type {
            MessageType::QueryCreate => Message::QueryCreate {
                query_id: reader.read_u32()?,
                tree: reader.read_remaining(),
            },
            MessageType::QueryCreated => Message::QueryCreated {
                sender: reader.read_u16()?,
                coordinator: TaskId::from_u64(reader.read_u64()?),
            },
            MessageType::QueryStart => Message::QueryStart {
                query_id: reader.read_u32()?,
            },
            MessageType::QueryAbortion => Message::QueryAbortion {
                query_id: reader.read_u32()?,
            },
            MessageType::QueryMappingBatch => Message::QueryMappingBatch {
                sender: reader.read_u16()?,
                mappings: reader.read_remaining(),
            },
            MessageType::QueryTaskFinished => {
                let sender = reader.read_u16()?;
                let first = TaskId::from_u64(reader.read_u64()?);
                if reader.is_empty() {
                    Message::QueryTaskFinished {
                        sender,
                        coordinator: None,
                        finished_task: first,
                    }
                } else {
                    Message::QueryTaskFinished {
                        sender,
                        coordinator: Some(first),
                        finished_task: TaskId::from_u64(reader.read_u64()?),
                    }
                }
            }
            MessageType::QueryTaskFailed => Message::QueryTaskFailed {
                sender: reader.read_u16()?,
                coordinator: TaskId::from_u64(reader.read_u64()?),
                message: std::str::from_utf8(reader.read_remaining())
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?,
            },
            MessageType::Clear => Message::Clear,
            message_type => Message::Other {
                message_type,
                payload: reader.read_remaining(),
            },
        };

        if !reader.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes in {message_type} message",
                reader.remaining()
            )));
        }
        Ok(message)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::QueryCreate { .. } => MessageType::QueryCreate,
            Message::QueryCreated { .. } => MessageType::QueryCreated,
            Message::QueryStart { .. } => MessageType::QueryStart,
            Message::QueryAbortion { .. } => MessageType::QueryAbortion,
            Message::QueryMappingBatch { .. } => MessageType::QueryMappingBatch,
            Message::QueryTaskFinished { .. } => MessageType::QueryTaskFinished,
            Message::QueryTaskFailed { .. } => MessageType::QueryTaskFailed,
            Message::Clear => MessageType::Clear,
            Message::Other { message_type, .. } => *message_type,
        }
    }

    /// Returns the task a control message is addressed to.
    ///
    /// Only the base id of the returned task is meaningful for routing, as every computer
    /// delivers control messages to its local replica.
    pub fn receiving_task(&self) -> Option<TaskId> {
        match self {
            Message::QueryCreated { coordinator, .. }
            | Message::QueryTaskFailed { coordinator, .. } => Some(*coordinator),
            Message::QueryTaskFinished {
                coordinator,
                finished_task,
                ..
            } => Some(coordinator.unwrap_or(*finished_task)),
            _ => None,
        }
    }

    /// Encodes this message.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = vec![self.message_type().value()];
        match self {
            Message::QueryCreate { query_id, tree } => {
                result.extend_from_slice(&query_id.to_be_bytes());
                result.extend_from_slice(tree);
            }
            Message::QueryCreated {
                sender,
                coordinator,
            } => {
                result.extend_from_slice(&sender.to_be_bytes());
                result.extend_from_slice(&coordinator.as_u64().to_be_bytes());
            }
            Message::QueryStart { query_id } | Message::QueryAbortion { query_id } => {
                result.extend_from_slice(&query_id.to_be_bytes());
            }
            Message::QueryMappingBatch { sender, mappings } => {
                result.extend_from_slice(&sender.to_be_bytes());
                result.extend_from_slice(mappings);
            }
            Message::QueryTaskFinished {
                sender,
                coordinator,
                finished_task,
            } => {
                result.extend_from_slice(&sender.to_be_bytes());
                if let Some(coordinator) = coordinator {
                    result.extend_from_slice(&coordinator.as_u64().to_be_bytes());
                }
                result.extend_from_slice(&finished_task.as_u64().to_be_bytes());
            }
            Message::QueryTaskFailed {
                sender,
                coordinator,
                message,
            } => {
                result.extend_from_slice(&sender.to_be_bytes());
                result.extend_from_slice(&coordinator.as_u64().to_be_bytes());
                result.extend_from_slice(message.as_bytes());
            }
            Message::Clear => {}
            Message::Other { payload, .. } => result.extend_from_slice(payload),
        }
        result
    }
}
