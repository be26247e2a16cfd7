//! # Wire Constants
//!
//! Limits baked into both ends of a connection.
//! Changing any of these breaks wire compatibility.

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Default listen address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Default game port.
pub const DEFAULT_PORT: u16 = 9992;

/// Largest unreliable packet a host sends, in bytes.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Largest reliable (handshake) packet a host sends, in bytes.
pub const MAX_RELIABLE_PACKET_SIZE: usize = 1024;

// =============================================================================
// CODEC LIMITS
// =============================================================================

/// Longest string the codec accepts. The length field is 16 bits wide on
/// the wire but values above this bound are rejected.
pub const MAX_STRING_LENGTH: usize = 255;

/// Default quantization steps per unit for float exchanges.
pub const DEFAULT_FLOAT_PRECISION: f32 = 1000.0;

/// Upper bound on entries per delta list and per controller input batch;
/// counts are written as a single byte.
pub const MAX_ENTRIES_PER_LIST: usize = 255;

// =============================================================================
// TICK SYNCHRONIZATION
// =============================================================================

/// Remote tick sentinel before the first valid packet.
pub const UNSET_TICK: i32 = -1;

/// Packets of de-jitter delay kept behind the remote clock.
pub const DEJITTER_PACKETS: i32 = 2;

/// Ticks the server lags the remote estimate when consuming client input.
pub const SERVER_INPUT_DELAY: i32 = 2;
