//! Settle-once completion callbacks for effect runners

use crate::error::SagaError;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The outcome an effect runner delivers to its completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectResult {
    /// The effect produced a value
    Value(Value),
    /// The effect failed; delivered into the body as a thrown error
    Err(SagaError),
    /// The effect (or the task it waited on) was cancelled
    Cancelled,
    /// End-of-channel reached a non-tolerant wait; terminates the body
    Ended,
}

struct CbInner {
    settled: bool,
    complete: Option<Box<dyn FnOnce(EffectResult)>>,
    cancel: Option<Box<dyn FnOnce()>>,
}

/// A completion callback that fires exactly once.
///
/// A runner may attach a cancel hook before resolving; cancelling a pending
/// callback runs the hook (releasing the underlying operation) and mutes any
/// later resolution. Clones share the settle-once state.
#[derive(Clone)]
pub(crate) struct EffectCb {
    inner: Rc<RefCell<CbInner>>,
}

impl EffectCb {
    pub(crate) fn new(complete: impl FnOnce(EffectResult) + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CbInner {
                settled: false,
                complete: Some(Box::new(complete)),
                cancel: None,
            })),
        }
    }

    /// A callback that ignores its result (detached continuations)
    pub(crate) fn noop() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.inner.borrow().settled
    }

    /// Attach the hook run if this effect is cancelled while pending
    pub(crate) fn set_cancel(&self, hook: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if !inner.settled {
            inner.cancel = Some(Box::new(hook));
        }
    }

    /// Deliver the result. No-op after the first settle or a cancel.
    pub(crate) fn resolve(&self, result: EffectResult) {
        let complete = {
            let mut inner = self.inner.borrow_mut();
            if inner.settled {
                return;
            }
            inner.settled = true;
            inner.cancel = None;
            inner.complete.take()
        };
        if let Some(complete) = complete {
            complete(result);
        }
    }

    /// Cancel the pending effect: run the attached hook and mute the
    /// completion. The canceller is responsible for resuming the body.
    pub(crate) fn cancel(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if inner.settled {
                return;
            }
            inner.settled = true;
            inner.complete = None;
            inner.cancel.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for EffectCb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCb")
            .field("settled", &self.inner.borrow().settled)
            .finish()
    }
}

/// The error-first completion handle passed to CALLBACK_INVOKE callables.
pub struct CpsHandle {
    cb: EffectCb,
}

impl CpsHandle {
    pub(crate) fn new(cb: EffectCb) -> Self {
        Self { cb }
    }

    /// Complete the invocation. Only the first call has any effect.
    pub fn done(&self, result: Result<Value, SagaError>) {
        match result {
            Ok(value) => self.cb.resolve(EffectResult::Value(value)),
            Err(err) => self.cb.resolve(EffectResult::Err(err)),
        }
    }

    /// Attach a hook invoked if the waiting coroutine is cancelled, so the
    /// callee can abandon the underlying operation.
    pub fn set_cancel(&self, hook: impl FnOnce() + 'static) {
        self.cb.set_cancel(hook);
    }
}

impl fmt::Debug for CpsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpsHandle").finish_non_exhaustive()
    }
}
