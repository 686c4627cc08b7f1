//! Reentrant dispatch scheduler serializing nested event emission
//!
//! Emits triggered synchronously from inside another emit's listener chain
//! must run *after* the outer emit completes, never interleaved with it.
//! The scheduler is a counting lock over a FIFO thunk queue: while the lock
//! is held, scheduled thunks are queued; when the last hold is released the
//! queue is drained in order, including thunks enqueued by draining thunks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

struct SchedulerInner {
    lock: u32,
    queue: VecDeque<Box<dyn FnOnce()>>,
}

/// The counting-lock thunk queue. Cloning shares the queue.
#[derive(Clone)]
pub struct DispatchScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl DispatchScheduler {
    /// Create an idle scheduler
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                lock: 0,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Queue `thunk`; if no drain is in progress, drain the queue now.
    pub fn asap(&self, thunk: impl FnOnce() + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.queue.push_back(Box::new(thunk));
            if inner.lock > 0 {
                return;
            }
            inner.lock += 1;
        }
        self.flush();
    }

    /// Run `f` under the lock, then drain everything it scheduled.
    ///
    /// Used when a task must start synchronously (root runs, forks) while its
    /// emits stay queued until the start completes.
    pub fn immediately<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.borrow_mut().lock += 1;
        let out = f();
        self.flush();
        out
    }

    /// Release one hold and drain the queue while the lock stays free.
    fn flush(&self) {
        self.inner.borrow_mut().lock -= 1;
        loop {
            let thunk = {
                let mut inner = self.inner.borrow_mut();
                if inner.lock > 0 {
                    return;
                }
                match inner.queue.pop_front() {
                    // Hold the lock while the thunk runs so nested
                    // schedules queue behind it.
                    Some(thunk) => {
                        inner.lock += 1;
                        thunk
                    }
                    None => return,
                }
            };
            thunk();
            self.inner.borrow_mut().lock -= 1;
        }
    }
}

impl Default for DispatchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("DispatchScheduler")
            .field("lock", &inner.lock)
            .field("queued", &inner.queue.len())
            .finish()
    }
}
