//! # Tickwire Core
//!
//! Allocation-conscious building blocks shared by the replication layers:
//! - Byte-array pools bucketed by power-of-two size, with leak accounting
//! - A bounded ring buffer whose evictions are always handed back to the caller
//! - A stable, linear-time radix sort ordering items by descending priority
//!
//! ## Example
//!
//! ```rust,ignore
//! use tickwire_core::{BufferPool, CircularBuffer};
//!
//! let pool = BufferPool::new(12, 4);
//! let mut block = pool.alloc(1200)?;
//! block[0] = 0xFF;
//! pool.free(block)?;
//!
//! let mut ring = CircularBuffer::new(2);
//! ring.push_back(1);
//! ring.push_back(2);
//! assert_eq!(ring.push_back(3), Some(1));
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod collections;
pub mod error;
pub mod memory;
pub mod sort;

pub use collections::CircularBuffer;
pub use error::{PoolError, PoolResult};
pub use memory::{ArrayPool, BufferPool, PooledBlock};
pub use sort::{radix_sort_descending, Prioritized};
