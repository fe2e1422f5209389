//! Bounded FIFO of requests submitted before the connection is open.
//!
//! Requests wait here and are released, in submission order, when the link
//! reports open.

use std::collections::VecDeque;

use crate::protocol::RoomId;

/// A room action waiting for an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRequest {
    CreateRoom,
    Join(RoomId),
}

/// Bounded send queue.
#[derive(Debug)]
pub struct SendQueue<T> {
    queue: VecDeque<T>,
    max_size: usize,
}

impl<T> SendQueue<T> {
    /// Create a queue holding at most `max_size` items.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(64)),
            max_size,
        }
    }

    /// Queue an item. Returns `false` when full.
    pub fn enqueue(&mut self, item: T) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
