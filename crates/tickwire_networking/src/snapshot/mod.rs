//! # Snapshot Replication
//!
//! The server captures a [`Frame`] of every entity's state each send tick
//! and ships each client the difference against the newest frame that
//! client has acknowledged:
//!
//! ```text
//! server                                         client
//!   capture(tick) ─► frame cache                   frame buffer
//!                      │                               ▲
//!   src = acked frame ─┤                               │
//!   dst = new frame  ──┴─► DeltaFrame ─► write_delta ──┴─ read_delta(src copy)
//! ```
//!
//! Created, destroyed and changed entities are sorted by priority and sent
//! until the packet is full. Anything left over goes out next time, because
//! the baseline only advances when the client acknowledges a frame.
//!
//! State shapes are plain Rust types implementing [`StateShape`], registered
//! once in a [`StateRegistry`] that also pools their instances.

mod delta;
mod frame;
mod message;
mod registry;
mod state;

pub use delta::DeltaFrame;
pub use frame::Frame;
pub use message::{read_delta, revert_unsent, write_delta, DeltaHeader, SnapshotTickHeader};
pub use registry::StateRegistry;
pub use state::{DynShape, EntityState, StateShape};

#[cfg(test)]
pub(crate) use state::tests::Marker;
