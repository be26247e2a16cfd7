//! Error types for the memory pools.

use thiserror::Error;

/// Errors raised by [`ArrayPool`](crate::ArrayPool) and [`BufferPool`](crate::BufferPool).
///
/// Every variant indicates a programming error: a block handed to the wrong
/// pool, or blocks still outstanding when the pool is torn down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Block size doesn't match the pool's block size.
    #[error("Block size mismatch: pool holds {expected} byte blocks, got {actual}")]
    SizeMismatch {
        /// Pool block size.
        expected: usize,
        /// Size of the returned block.
        actual: usize,
    },

    /// Block was not handed out by this pool.
    #[error("Block was allocated by pool {owner}, not pool {pool}")]
    ForeignBlock {
        /// Pool the block was returned to.
        pool: u32,
        /// Pool that allocated the block.
        owner: u32,
    },

    /// Requested size exceeds the largest bucket.
    #[error("Requested {requested} bytes, largest bucket is {max} bytes")]
    TooLarge {
        /// Requested size.
        requested: usize,
        /// Largest block size available.
        max: usize,
    },

    /// Pool disposed with blocks still outstanding.
    #[error("Pool leaked {outstanding} block(s) of {block_size} bytes")]
    Leaked {
        /// Block size of the leaking pool.
        block_size: usize,
        /// Blocks never returned.
        outstanding: usize,
    },
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
