pub mod bytes;
mod config;
mod error;
mod message_type;
mod messages;

pub use config::*;
pub use error::*;
pub use message_type::MessageType;
pub use messages::*;
