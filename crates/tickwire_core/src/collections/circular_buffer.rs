//! # Circular Buffer
//!
//! Fixed-capacity FIFO ring. Pushing into a full ring evicts the oldest
//! element and hands it back, so every eviction is observable.

use std::collections::VecDeque;

/// Fixed-capacity ring buffer.
///
/// # Example
///
/// ```rust,ignore
/// let mut ring = CircularBuffer::new(2);
/// assert_eq!(ring.push_back('a'), None);
/// assert_eq!(ring.push_back('b'), None);
/// assert_eq!(ring.push_back('c'), Some('a')); // evicted
/// ```
#[derive(Clone, Debug)]
pub struct CircularBuffer<T> {
    /// Storage, allocated once with `capacity` slots.
    items: VecDeque<T>,
    /// Maximum number of elements.
    capacity: usize,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty ring holding at most `capacity` elements.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of elements.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if the next push evicts.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Appends an element, returning the evicted oldest element if the ring was full.
    #[must_use = "evicted elements must be handled"]
    pub fn push_back(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(value);
        evicted
    }

    /// Removes and returns the oldest element.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Oldest element.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest element.
    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Element at `index`, counting from the oldest.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Mutable element at `index`, counting from the oldest.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// Removes the oldest `count` elements, yielding them oldest first.
    pub fn drain_front(&mut self, count: usize) -> impl Iterator<Item = T> + '_ {
        let count = count.min(self.items.len());
        self.items.drain(..count)
    }

    /// Removes every element, yielding them oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Iterates mutably oldest to newest.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> + ExactSizeIterator {
        self.items.iter_mut()
    }

    /// Drops every element.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
