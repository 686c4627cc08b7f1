//! Channels decoupling event producers from consuming coroutines

use crate::buffer::{Buffer, BufferKind, BufferOverflow};
use crate::matcher::Pattern;
use crate::value::Event;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Channel operation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed before the put
    #[error("channel closed")]
    Closed,

    /// The put overflowed a fixed-capacity buffer
    #[error(transparent)]
    Overflow(#[from] BufferOverflow),
}

/// What a taker receives: an item, or the end-of-channel marker.
#[derive(Debug, Clone, PartialEq)]
pub enum TakeOutcome {
    /// A matching event
    Item(Event),
    /// The channel closed and no matching item remains buffered
    End,
}

type TakeCb = Box<dyn FnOnce(TakeOutcome)>;

struct Taker {
    id: u64,
    pattern: Pattern,
    cb: TakeCb,
}

struct ChannelInner {
    buffer: Buffer,
    takers: Vec<Taker>,
    closed: bool,
    next_taker_id: u64,
}

/// A take/put/flush/close primitive.
///
/// A pending taker is a callback plus the pattern it is waiting for. A put
/// resolves the earliest-registered taker whose pattern matches, or stores
/// the event per the buffer policy when no taker matches. Each event resolves
/// at most one taker.
///
/// Cloning a `Channel` clones the handle, not the channel.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<RefCell<ChannelInner>>,
}

/// Cancels a pending take, removing the registration.
pub struct TakeHandle {
    channel: Weak<RefCell<ChannelInner>>,
    id: Option<u64>,
}

impl TakeHandle {
    fn settled() -> Self {
        Self {
            channel: Weak::new(),
            id: None,
        }
    }

    /// Remove the taker registration, if it is still pending
    pub fn cancel(&self) {
        let (Some(inner), Some(id)) = (self.channel.upgrade(), self.id) else {
            return;
        };
        inner.borrow_mut().takers.retain(|t| t.id != id);
    }
}

impl Channel {
    /// Create an open channel backed by the given buffer policy
    pub fn new(kind: BufferKind) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelInner {
                buffer: Buffer::new(kind),
                takers: Vec::new(),
                closed: false,
                next_taker_id: 1,
            })),
        }
    }

    /// Whether two handles refer to the same channel
    pub fn same_channel(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Number of pending takers
    pub fn taker_count(&self) -> usize {
        self.inner.borrow().takers.len()
    }

    /// Number of buffered events
    pub fn buffered_len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    /// Deliver an event.
    ///
    /// Resolves the earliest-registered matching taker, or buffers per the
    /// channel's policy. Rejected once the channel is closed.
    pub fn put(&self, event: Event) -> Result<(), ChannelError> {
        let cb = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(ChannelError::Closed);
            }
            match inner.takers.iter().position(|t| t.pattern.matches(&event)) {
                Some(idx) => inner.takers.remove(idx).cb,
                None => return inner.buffer.put(event).map_err(ChannelError::from),
            }
        };
        // Borrow released: the taker may re-enter this channel.
        cb(TakeOutcome::Item(event));
        Ok(())
    }

    /// Register a taker.
    ///
    /// Resolves immediately against a matching buffered item, or against the
    /// end marker when the channel is closed and drained. Otherwise the
    /// callback is parked until a matching put, a close, or cancellation via
    /// the returned handle.
    pub fn take(&self, pattern: Pattern, cb: impl FnOnce(TakeOutcome) + 'static) -> TakeHandle {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            if let Some(item) = inner.buffer.take_matching(&pattern) {
                TakeOutcome::Item(item)
            } else if inner.closed {
                TakeOutcome::End
            } else {
                let id = inner.next_taker_id;
                inner.next_taker_id += 1;
                inner.takers.push(Taker {
                    id,
                    pattern,
                    cb: Box::new(cb),
                });
                return TakeHandle {
                    channel: Rc::downgrade(&self.inner),
                    id: Some(id),
                };
            }
        };
        cb(outcome);
        TakeHandle::settled()
    }

    /// Drain and return everything currently buffered.
    ///
    /// Future events are not consumed; pending takers are untouched.
    pub fn flush(&self) -> Vec<Event> {
        self.inner.borrow_mut().buffer.flush()
    }

    /// Close the channel.
    ///
    /// Every pending taker resolves with the end marker; buffered items are
    /// kept and still drain to takers arriving after the close.
    pub fn close(&self) {
        let takers = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.takers)
        };
        for taker in takers {
            (taker.cb)(TakeOutcome::End);
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Channel")
            .field("buffer", &inner.buffer.kind())
            .field("buffered", &inner.buffer.len())
            .field("takers", &inner.takers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
