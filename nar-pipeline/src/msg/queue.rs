//! Small FIFO used by elements that hold back or split messages

use super::Msg;
use std::collections::VecDeque;

/// Ordered message holding area with support for re-inserting at the head
#[derive(Debug, Default)]
pub struct MsgQueue {
    queue: VecDeque<Msg>,
}

impl MsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, msg: Msg) {
        self.queue.push_back(msg);
    }

    /// Insert ahead of everything already queued
    pub fn enqueue_at_head(&mut self, msg: Msg) {
        self.queue.push_front(msg);
    }

    pub fn dequeue(&mut self) -> Option<Msg> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued message, returning them to the pool
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
