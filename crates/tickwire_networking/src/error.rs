//! # Error Types
//!
//! Overflow is the only recoverable stream condition; callers rewind to the
//! last complete boundary and carry on. Every other variant is a protocol or
//! programming error that aborts the packet being built or read.

use thiserror::Error;
use tickwire_core::PoolError;
use tickwire_shared::{EntityId, PrefabId, StateId};

/// Bit stream errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Operation needs more bits than remain in the buffer.
    #[error("Stream overflow: {requested} bits at bit {position}, capacity {capacity} bytes")]
    Overflow {
        /// Bit cursor at the time of the call.
        position: usize,
        /// Bits requested.
        requested: usize,
        /// Buffer capacity in bytes.
        capacity: usize,
    },

    /// Value outside the declared range of a ranged exchange.
    #[error("Value {value} outside range [{min}, {max}]")]
    ValueOutOfRange {
        /// Offending value.
        value: i64,
        /// Range minimum.
        min: i64,
        /// Range maximum.
        max: i64,
    },

    /// String longer than the wire format allows.
    #[error("String length {length} exceeds {max}")]
    StringTooLong {
        /// Offending length.
        length: usize,
        /// Maximum length.
        max: usize,
    },

    /// String contains characters outside ASCII.
    #[error("String contains non-ASCII characters")]
    NonAsciiString,

    /// Bit count above 64.
    #[error("Invalid bit count {0}, expected 0..=64")]
    InvalidBitCount(u32),
}

impl StreamError {
    /// Returns true for the recoverable overflow condition.
    #[must_use]
    pub const fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }
}

/// Command channel errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The 32-bit command id space is used up.
    #[error("Command id space exhausted")]
    IdSpaceExhausted,

    /// Serialized command doesn't fit the configured maximum size.
    #[error("Command of type {command_type} exceeds {max} bytes")]
    CommandTooLarge {
        /// Command type.
        command_type: u8,
        /// Configured maximum size.
        max: usize,
    },

    /// Command type not known to the decoder.
    #[error("Unknown command type {0}")]
    UnknownType(u8),

    /// Payload failed to encode or decode.
    #[error("Command stream error: {0}")]
    Stream(#[from] StreamError),

    /// A disposition handler reported a failure.
    #[error("Command handler failed: {0}")]
    Handler(String),
}

/// Snapshot and entity state errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// State id has no registered shape.
    #[error("Unknown state id {0:?}")]
    UnknownState(StateId),

    /// Prefab has no state shape mapped to it.
    #[error("Unknown prefab {0:?}")]
    UnknownPrefab(PrefabId),

    /// Entity referenced by a delta isn't in the baseline.
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Entity added twice to the same frame.
    #[error("Duplicate entity {0}")]
    DuplicateEntity(EntityId),

    /// Registry can't hand out more state ids.
    #[error("State registry full")]
    RegistryFull,

    /// Every entity id is in use.
    #[error("No free entity id")]
    EntitiesExhausted,

    /// Delta failed to encode or decode.
    #[error("Snapshot stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Connection-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Packet failed to encode or decode.
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Command channel failure.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Snapshot failure.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Packet buffer pool failure.
    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),

    /// Transport rejected a send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed handshake message.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Connection limit reached.
    #[error("Connection limit of {0} reached")]
    Full(usize),

    /// Operation needs the game phase.
    #[error("Connection is not in the game phase")]
    NotInGame,
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Result type for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
