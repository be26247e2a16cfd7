//! # Buffer Pool
//!
//! Power-of-two bucketed set of [`ArrayPool`]s shared across connections.

use parking_lot::Mutex;

use super::array_pool::{ArrayPool, PooledBlock};
use crate::error::{PoolError, PoolResult};

/// Thread-safe pool handing out blocks of at least the requested size.
///
/// Holds one [`ArrayPool`] per size class `2^0 ..= 2^max_pow2`; a request for
/// `n` bytes is served from the class `2^ceil(log2(n))`.
///
/// # Thread Safety
///
/// Each size class sits behind its own mutex, so connections ticking on
/// different threads only contend when they need the same size.
pub struct BufferPool {
    /// One pool per power of two.
    cells: Vec<Mutex<ArrayPool>>,
}

impl BufferPool {
    /// Creates a pool with size classes up to `2^max_pow2` bytes, each
    /// pre-filled with `capacity` blocks.
    #[must_use]
    pub fn new(max_pow2: u32, capacity: usize) -> Self {
        let cells = (0..=max_pow2)
            .map(|pow| Mutex::new(ArrayPool::new(1usize << pow, capacity)))
            .collect();

        Self { cells }
    }

    /// Size class index serving `size` bytes.
    #[inline]
    fn cell_index(size: usize) -> usize {
        size.max(1).next_power_of_two().trailing_zeros() as usize
    }

    /// Largest block size this pool can serve.
    #[must_use]
    pub fn max_block_size(&self) -> usize {
        1usize << self.cells.len().saturating_sub(1)
    }

    /// Allocates a block of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::TooLarge`] if `size` exceeds the largest class.
    pub fn alloc(&self, size: usize) -> PoolResult<PooledBlock> {
        let index = Self::cell_index(size);
        let cell = self.cells.get(index).ok_or(PoolError::TooLarge {
            requested: size,
            max: self.max_block_size(),
        })?;

        Ok(cell.lock().alloc())
    }

    /// Returns a block to the size class it came from.
    ///
    /// # Errors
    ///
    /// Propagates [`ArrayPool::free`] errors; a block whose length is not a
    /// served power of two is reported as a size mismatch.
    pub fn free(&self, block: PooledBlock) -> PoolResult<()> {
        let len = block.len();
        let index = Self::cell_index(len);
        match self.cells.get(index) {
            Some(cell) => cell.lock().free(block),
            None => Err(PoolError::SizeMismatch {
                expected: self.max_block_size(),
                actual: len,
            }),
        }
    }

    /// Blocks outstanding across every size class.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.cells.iter().map(|cell| cell.lock().outstanding()).sum()
    }

    /// Tears every size class down.
    ///
    /// # Errors
    ///
    /// Returns the first [`PoolError::Leaked`] found.
    pub fn dispose(self) -> PoolResult<()> {
        for cell in self.cells {
            cell.into_inner().dispose()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &self.cells.len())
            .field("allocations", &self.allocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_rounds_up() {
        let pool = BufferPool::new(12, 1);

        let block = pool.alloc(1000).unwrap();
        assert_eq!(block.len(), 1024);

        let one = pool.alloc(1).unwrap();
        assert_eq!(one.len(), 1);

        let exact = pool.alloc(4096).unwrap();
        assert_eq!(exact.len(), 4096);

        assert_eq!(pool.allocations(), 3);
        pool.free(block).unwrap();
        pool.free(one).unwrap();
        pool.free(exact).unwrap();
        assert_eq!(pool.allocations(), 0);
        pool.dispose().unwrap();
    }

    #[test]
    fn test_buffer_pool_too_large() {
        let pool = BufferPool::new(4, 0);
        assert_eq!(pool.max_block_size(), 16);
        assert!(matches!(pool.alloc(17), Err(PoolError::TooLarge { .. })));
    }

    #[test]
    fn test_buffer_pool_leak_detected() {
        let pool = BufferPool::new(4, 0);
        let _held = pool.alloc(8).unwrap();
        assert!(matches!(pool.dispose(), Err(PoolError::Leaked { .. })));
    }
}
