//! # Client-Side Prediction
//!
//! The client simulates its own inputs immediately instead of waiting a
//! round trip for the server.
//!
//! ## How It Works
//!
//! 1. Client samples an input every tick and simulates it locally
//! 2. Client sends every unconfirmed input, delta packed
//! 3. Server simulates the input for each tick, repeating the last one when
//!    nothing arrived in time
//! 4. Server reports the last result; the client compares it with its own
//!
//! ```text
//! Input:      [1] [2] [3] [4] [5]
//!              │   │   │   │   │
//! Prediction: [P1][P2][P3][P4][P5]
//!                  │
//! Server:         [S2]
//!                  │
//! Reconcile:  S2 != P2 → reset to S2, replay [3,4,5]
//! ```

mod controller;

pub use controller::{
    Controller, ControllerInput, ControllerResult, ControllerStats, DynController, InputHeader,
    Predictor, ResultHeader,
};

#[cfg(test)]
pub(crate) use controller::tests::{Mover, Position, Velocity};
