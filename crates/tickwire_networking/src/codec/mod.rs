//! # Stream Codec
//!
//! Bit-level serialization shared by every other layer.
//!
//! - [`bitstream`]: raw bit writer and reader, ranged and quantized values
//! - [`compression`]: static bucketed code for small integers
//! - [`stream`]: direction-agnostic exchange trait with delta helpers
//! - [`message`]: single-packet messages

pub mod bitstream;
pub mod compression;
pub mod message;
pub mod stream;

pub use bitstream::{BitReader, BitWriter};
pub use compression::{CompressionModel, MODEL};
pub use message::{pack, unpack, Message, TextMessage};
pub use stream::Stream;
