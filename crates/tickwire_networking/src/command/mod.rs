//! # Command Channel
//!
//! Small application messages delivered over the unreliable packet stream,
//! each ending in exactly one disposition:
//!
//! ```text
//! sender                                   receiver
//!   send() ──► [outgoing ring] ── packet ──► [incoming ring] ──► Received
//!                  │    ▲                          │
//!                  │    └──── ack(last received) ◄─┘
//!                  ├──► Acked    (ack covers the id)
//!                  └──► Dropped  (evicted by a newer send before any ack)
//! ```
//!
//! Commands are resent in every packet until acknowledged. The receiver
//! keeps only ids above the highest it has seen, so a command is
//! delivered at most once.

mod channel;
mod payloads;
mod registry;

pub use channel::{CommandChannel, CommandHeader, CommandSink, CommandStats};
pub use payloads::{
    Association, ControllerCommand, ControllerCommandHeader, EmptyMessage, EntityCommand,
    EntityCommandHeader, EntityMessage,
};
pub use registry::{CommandHandler, CommandRegistry, Dispatcher};

use tickwire_shared::CommandId;

/// Built-in command types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CommandType {
    /// Server tells a client which entity its controller drives.
    AssociateEntityWithController = 0,
    /// Client asks the server to spawn its player entity.
    SpawnPlayer = 1,
    /// Controller-level message forwarded to the predictor.
    ControllerCommand = 2,
    /// Message addressed to one entity.
    EntityCommand = 3,
}

impl TryFrom<u8> for CommandType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AssociateEntityWithController),
            1 => Ok(Self::SpawnPlayer),
            2 => Ok(Self::ControllerCommand),
            3 => Ok(Self::EntityCommand),
            other => Err(other),
        }
    }
}

/// Terminal state of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandDisposition {
    /// Delivered from the remote end.
    Received,
    /// Remote end confirmed delivery of a sent command.
    Acked,
    /// Sent command evicted from the queue before it was acknowledged.
    Dropped,
}

/// A buffered command with its serialized payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// Per-direction sequence number.
    pub id: CommandId,
    /// Command type.
    pub command_type: CommandType,
    /// Serialized payload.
    pub payload: Vec<u8>,
}
