//! # Tickwire Networking
//!
//! Tick-based state replication between one authoritative server and its
//! clients, over an unreliable packet transport.
//!
//! ## Architecture
//!
//! - **Codec**: bit-level streams with ranged, quantized and compressed
//!   integer encodings, driven through one symmetric [`codec::Stream`] trait
//! - **Commands**: small messages resent until acknowledged, each ending in
//!   exactly one of Received, Acked or Dropped
//! - **Snapshots**: per-tick frames of entity state, sent as prioritized
//!   deltas against the newest frame the client confirmed
//! - **Sync**: a de-jittered estimate of the remote tick
//! - **Prediction**: client inputs simulated ahead and replayed on mismatch
//! - **Connection**: handshake, the two game phases and the host loop
//!
//! ## Packet Flow
//!
//! ```text
//! CLIENT                                    SERVER
//!   |                                          |
//!   |--- tick, commands, snapshot ack, inputs ->|
//!   |                                          | <- simulate inputs
//!   |<- tick, commands, result, snapshot delta-|
//!   |                                          |
//! ```
//!
//! Every packet fits a fixed budget. Whatever doesn't fit is sent next time,
//! in priority order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tickwire_networking::connection::{ConnectionManager, EntityWorld, LoopbackTransport, Role};
//!
//! let world = EntityWorld::new(registry).into_shared();
//! let mut server = ConnectionManager::new(
//!     Role::Server,
//!     LoopbackTransport::new(),
//!     HostSettings::default(),
//!     world,
//!     |role| make_controller(role),
//! );
//!
//! loop {
//!     server.update(frame_time);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod codec;
pub mod command;
pub mod connection;
pub mod error;
pub mod prediction;
pub mod snapshot;
pub mod sync;

pub use codec::{pack, unpack, BitReader, BitWriter, Message, Stream, TextMessage};
pub use command::{CommandChannel, CommandDisposition, CommandRegistry, CommandType};
pub use connection::{
    Connection, ConnectionManager, Delivery, EntityWorld, LoopbackTransport, PeerId, Role, SharedWorld,
    SyncMode, Transport, World,
};
pub use error::{
    CommandError, CommandResult, ConnectionError, ConnectionResult, SnapshotError, SnapshotResult,
    StreamError, StreamResult,
};
pub use prediction::{Controller, ControllerInput, ControllerResult, DynController, Predictor};
pub use snapshot::{DeltaFrame, EntityState, Frame, StateRegistry, StateShape};
pub use sync::{TickClock, TickSync};
