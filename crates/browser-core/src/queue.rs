//! Unbounded FIFO queue.
//!
//! The queue is deliberately unbounded: it absorbs bursts so producers never
//! block, leaving the dispatcher to bound parallelism instead. It is not
//! synchronised; the owning task is expected to be its only user.

use std::collections::VecDeque;

/// An unbounded first-in, first-out queue of `T`.
///
/// All operations are O(1) (push is amortised O(1)).
///
/// # Examples
///
/// ```
/// use browser_core::queue::Queue;
///
/// let mut queue = Queue::new();
/// queue.push(1);
/// queue.push(2);
///
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Queue<T> {
    elements: VecDeque<T>,
}

impl<T> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            elements: VecDeque::new(),
        }
    }

    /// Append an item to the tail of the queue.
    pub fn push(&mut self, item: T) {
        self.elements.push_back(item);
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self) -> Option<T> {
        let head = self.elements.pop_front();

        // Release the backing storage once a burst has fully drained.
        if self.elements.is_empty() && self.elements.capacity() > 1024 {
            self.elements = VecDeque::new();
        }

        head
    }

    /// Borrow the head of the queue without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.elements.front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
