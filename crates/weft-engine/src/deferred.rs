//! Settle-once asynchronous results for INVOKE and host integrations
//!
//! The interpreter never blocks: a callable that cannot answer synchronously
//! returns a [`Deferred`] and settles it later (a timer firing, a socket
//! completing). Cancellation of the waiting effect reaches the underlying
//! operation through the deferred's cancel hook.

use crate::error::SagaError;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

enum DeferredState {
    Pending,
    Settled(Result<Value, SagaError>),
    Cancelled,
}

struct DeferredInner {
    state: DeferredState,
    subscribers: Vec<Box<dyn FnOnce(Result<Value, SagaError>)>>,
    cancel_hook: Option<Box<dyn FnOnce()>>,
}

/// A promise-like value that settles exactly once.
///
/// Cloning shares the underlying cell: the producer keeps one handle to
/// settle, the interpreter keeps another to subscribe.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<DeferredInner>>,
}

impl Deferred {
    /// Create a pending deferred
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                state: DeferredState::Pending,
                subscribers: Vec::new(),
                cancel_hook: None,
            })),
        }
    }

    /// Whether the deferred has settled or been cancelled
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.borrow().state, DeferredState::Pending)
    }

    /// Settle successfully. A no-op after the first settle or a cancel.
    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    /// Settle with an error. A no-op after the first settle or a cancel.
    pub fn reject(&self, error: SagaError) {
        self.settle(Err(error));
    }

    /// Register interest in the settlement.
    ///
    /// Runs immediately if already settled; never runs after cancellation.
    pub fn subscribe(&self, cb: impl FnOnce(Result<Value, SagaError>) + 'static) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            match &inner.state {
                DeferredState::Pending => {
                    inner.subscribers.push(Box::new(cb));
                    return;
                }
                DeferredState::Settled(result) => result.clone(),
                DeferredState::Cancelled => return,
            }
        };
        cb(settled);
    }

    /// Attach the hook run when the waiting effect is cancelled, so the
    /// producer can release the underlying operation.
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) {
        self.inner.borrow_mut().cancel_hook = Some(Box::new(hook));
    }

    /// Cancel: run the hook and drop all subscribers. Later settles no-op.
    pub fn cancel(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, DeferredState::Pending) {
                return;
            }
            inner.state = DeferredState::Cancelled;
            inner.subscribers.clear();
            inner.cancel_hook.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    fn settle(&self, result: Result<Value, SagaError>) {
        let subscribers = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, DeferredState::Pending) {
                return;
            }
            inner.state = DeferredState::Settled(result.clone());
            inner.cancel_hook = None;
            std::mem::take(&mut inner.subscribers)
        };
        for cb in subscribers {
            cb(result.clone());
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.borrow().state {
            DeferredState::Pending => "pending",
            DeferredState::Settled(_) => "settled",
            DeferredState::Cancelled => "cancelled",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}
