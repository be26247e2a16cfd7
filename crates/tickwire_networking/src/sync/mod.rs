//! # Tick Synchronization
//!
//! Every connection runs its own fixed-step clock and keeps an estimate of
//! the peer's tick, trailing the peer's reported tick by two packets so that
//! late packets still arrive before they are needed.

mod clock;
mod tick;

pub use clock::{TickClock, TickStats, TickStep};
pub use tick::{TickAdjustment, TickSync};
