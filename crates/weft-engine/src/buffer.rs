//! Channel buffers with overflow policy

use crate::matcher::Pattern;
use crate::value::Event;
use std::collections::VecDeque;

/// Buffering strategy backing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// No buffering: an item with no taker is dropped
    None,
    /// Holds up to `n` items; overflowing raises [`BufferOverflow`]
    Fixed(usize),
    /// Holds up to `n` items; overflowing items are silently discarded
    Dropping(usize),
    /// Holds up to `n` items; overflow evicts the oldest buffered item
    Sliding(usize),
    /// Starts at `n` items and grows to accommodate
    Expanding(usize),
}

/// Raised by a [`BufferKind::Fixed`] buffer when a put exceeds capacity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("channel buffer overflow: capacity {capacity} exceeded")]
pub struct BufferOverflow {
    /// The fixed capacity that was exceeded
    pub capacity: usize,
}

/// A queue of events with a [`BufferKind`] overflow policy.
#[derive(Debug)]
pub struct Buffer {
    kind: BufferKind,
    queue: VecDeque<Event>,
}

impl Buffer {
    /// Create an empty buffer with the given policy
    pub fn new(kind: BufferKind) -> Self {
        let initial = match kind {
            BufferKind::None => 0,
            BufferKind::Fixed(n)
            | BufferKind::Dropping(n)
            | BufferKind::Sliding(n)
            | BufferKind::Expanding(n) => n,
        };
        Self {
            kind,
            queue: VecDeque::with_capacity(initial),
        }
    }

    /// The policy this buffer was created with
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the buffer holds no items
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Store an item per the overflow policy.
    ///
    /// Only `Fixed` buffers can fail; every other policy absorbs the put.
    pub fn put(&mut self, item: Event) -> Result<(), BufferOverflow> {
        match self.kind {
            BufferKind::None => Ok(()),
            BufferKind::Fixed(capacity) => {
                if self.queue.len() >= capacity {
                    Err(BufferOverflow { capacity })
                } else {
                    self.queue.push_back(item);
                    Ok(())
                }
            }
            BufferKind::Dropping(capacity) => {
                if self.queue.len() < capacity {
                    self.queue.push_back(item);
                }
                Ok(())
            }
            BufferKind::Sliding(capacity) => {
                if self.queue.len() >= capacity {
                    self.queue.pop_front();
                }
                self.queue.push_back(item);
                Ok(())
            }
            BufferKind::Expanding(_) => {
                self.queue.push_back(item);
                Ok(())
            }
        }
    }

    /// Remove and return the oldest buffered item
    pub fn take(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Remove and return the oldest buffered item matching `pattern`
    pub fn take_matching(&mut self, pattern: &Pattern) -> Option<Event> {
        let idx = self.queue.iter().position(|ev| pattern.matches(ev))?;
        self.queue.remove(idx)
    }

    /// Drain every buffered item in FIFO order
    pub fn flush(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }
}
