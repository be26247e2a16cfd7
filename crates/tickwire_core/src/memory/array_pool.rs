//! # Array Pool
//!
//! Fixed-size byte block pool for buffers that are allocated and returned every tick.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{PoolError, PoolResult};

/// Source of unique pool identifiers.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// A byte block owned by the caller until it is returned to its pool.
///
/// Dereferences to the underlying byte slice.
#[derive(Debug)]
pub struct PooledBlock {
    /// Block contents.
    data: Box<[u8]>,
    /// Identifier of the pool that allocated the block.
    origin: u32,
}

impl PooledBlock {
    /// Identifier of the pool that allocated this block.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> u32 {
        self.origin
    }
}

impl Deref for PooledBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A pool of equally sized byte blocks.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. [`BufferPool`](crate::BufferPool) wraps
/// one pool per size class in a mutex.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = ArrayPool::new(1024, 8);
///
/// let block = pool.alloc();
/// assert_eq!(block.len(), 1024);
///
/// pool.free(block)?;
/// pool.dispose()?; // Err(Leaked) if anything is still out
/// ```
#[derive(Debug)]
pub struct ArrayPool {
    /// Unique identifier stamped on every block.
    id: u32,
    /// Size of every block in bytes.
    block_size: usize,
    /// Blocks ready for reuse.
    free: Vec<Box<[u8]>>,
    /// Blocks handed out and not yet returned.
    outstanding: usize,
}

impl ArrayPool {
    /// Creates a pool pre-filled with `capacity` blocks of `block_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `block_size` - Size of every block
    /// * `capacity` - Number of blocks allocated up front
    #[must_use]
    pub fn new(block_size: usize, capacity: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            block_size,
            free,
            outstanding: 0,
        }
    }

    /// Pool identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Size of every block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks handed out and not yet returned.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of blocks ready for reuse.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Takes a block from the pool, allocating a fresh one on a miss.
    ///
    /// Reused blocks keep their previous contents.
    pub fn alloc(&mut self) -> PooledBlock {
        let data = self.free.pop().unwrap_or_else(|| {
            tracing::trace!("Array pool {} miss, allocating {} bytes", self.id, self.block_size);
            vec![0u8; self.block_size].into_boxed_slice()
        });
        self.outstanding += 1;

        PooledBlock {
            data,
            origin: self.id,
        }
    }

    /// Returns a block to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ForeignBlock`] if another pool allocated the block
    /// and [`PoolError::SizeMismatch`] if its size differs from the pool's.
    pub fn free(&mut self, block: PooledBlock) -> PoolResult<()> {
        if block.origin != self.id {
            return Err(PoolError::ForeignBlock {
                pool: self.id,
                owner: block.origin,
            });
        }
        if block.data.len() != self.block_size {
            return Err(PoolError::SizeMismatch {
                expected: self.block_size,
                actual: block.data.len(),
            });
        }

        self.outstanding = self.outstanding.saturating_sub(1);
        self.free.push(block.data);
        Ok(())
    }

    /// Tears the pool down, verifying every block came back.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Leaked`] if blocks are still outstanding.
    pub fn dispose(self) -> PoolResult<()> {
        if self.outstanding != 0 {
            return Err(PoolError::Leaked {
                block_size: self.block_size,
                outstanding: self.outstanding,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free() {
        let mut pool = ArrayPool::new(16, 2);
        assert_eq!(pool.available(), 2);

        let block = pool.alloc();
        assert_eq!(block.len(), 16);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.available(), 1);

        pool.free(block).unwrap();
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 2);
        pool.dispose().unwrap();
    }

    #[test]
    fn test_pool_miss_allocates_fresh() {
        let mut pool = ArrayPool::new(8, 0);
        let a = pool.alloc();
        let b = pool.alloc();
        assert_eq!(pool.outstanding(), 2);

        pool.free(a).unwrap();
        pool.free(b).unwrap();
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_rejects_foreign_block() {
        let mut first = ArrayPool::new(8, 1);
        let mut second = ArrayPool::new(8, 1);

        let block = first.alloc();
        let err = second.free(block).unwrap_err();
        assert!(matches!(err, PoolError::ForeignBlock { .. }));
        assert_eq!(second.outstanding(), 0);
    }

    #[test]
    fn test_pool_reports_leak() {
        let mut pool = ArrayPool::new(4, 1);
        let _block = pool.alloc();

        let err = pool.dispose().unwrap_err();
        assert_eq!(
            err,
            PoolError::Leaked {
                block_size: 4,
                outstanding: 1
            }
        );
    }
}
