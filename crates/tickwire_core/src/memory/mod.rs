//! # Memory Management
//!
//! Reusable byte blocks for packet serialization.
//!
//! ## Design
//!
//! - Allocation never blocks: a pool miss falls back to a fresh block
//! - Every block remembers the pool that produced it
//! - Outstanding blocks are counted; disposing a pool with a non-zero
//!   count is reported as a leak

mod array_pool;
mod buffer_pool;

pub use array_pool::{ArrayPool, PooledBlock};
pub use buffer_pool::BufferPool;
