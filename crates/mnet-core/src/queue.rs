//! Bounded receive-completion queue.
//!
//! Transmit hands frames to the deferred receive poll through this queue. It is a FIFO of `depth`
//! frames; depth 1 is the classic single completion slot.
//! A push onto a full queue never overwrites: the frame is handed back to the producer, which must
//! drop it with accounting.

use std::collections::VecDeque;

use mnet_backend::Frame;

/// Default depth: one in-flight frame per device.
pub const DEFAULT_QUEUE_DEPTH: usize = 1;

/// Returned by [`CompletionQueue::try_push`] when the queue is occupied. Carries the rejected frame.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull(pub Frame);

#[derive(Debug)]
pub struct CompletionQueue {
    frames: VecDeque<Frame>,
    depth: usize,
}

impl CompletionQueue {
    /// A zero depth is treated as 1: a device always has at least its single slot.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.depth
    }

    pub fn try_push(&mut self, frame: Frame) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull(frame));
        }
        self.frames.push_back(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Release every queued frame without delivering it. Returns how many were released.
    pub fn discard_all(&mut self) -> usize {
        let released = self.frames.len();
        self.frames.clear();
        released
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}
