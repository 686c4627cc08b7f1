//! Task handles: the public face of a running or finished coroutine

use crate::driver::cb::{EffectCb, EffectResult};
use crate::error::SagaError;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Unique identifier for a task within one interpreter instance.
///
/// Ids are allocated by a per-runtime counter, never process-wide state, so
/// independent interpreters can run in parallel tests without interference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    /// The numeric id value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a task. The three non-running states are terminal
/// and permanent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The coroutine (or its fork queue) is still making progress
    Running,
    /// Finished normally with a result
    Completed,
    /// Aborted by an uncaught error
    Errored,
    /// Terminated by cancellation
    Cancelled,
}

/// Terminal result of a task. Result and error are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The body and every forked child finished normally
    Completed(Value),
    /// The subtree was aborted by this uncaught error
    Errored(SagaError),
    /// The task was cancelled
    Cancelled,
}

impl TaskOutcome {
    /// The status this outcome corresponds to
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Errored(_) => TaskStatus::Errored,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub(crate) fn to_effect_result(&self) -> EffectResult {
        match self {
            TaskOutcome::Completed(value) => EffectResult::Value(value.clone()),
            TaskOutcome::Errored(err) => EffectResult::Err(err.clone()),
            TaskOutcome::Cancelled => EffectResult::Cancelled,
        }
    }
}

struct TaskInner {
    id: TaskId,
    name: String,
    cancelled: Cell<bool>,
    outcome: RefCell<Option<TaskOutcome>>,
    joiners: RefCell<Vec<(u64, EffectCb)>>,
    next_joiner_id: Cell<u64>,
    context: RefCell<FxHashMap<String, Value>>,
    // Installed by the driver while the task runs; routes external cancel()
    // calls into the owning process loop.
    cancel_hook: RefCell<Option<Rc<dyn Fn()>>>,
}

/// The public handle for one coroutine. Cloning shares the handle.
#[derive(Clone)]
pub struct Task {
    inner: Rc<TaskInner>,
}

impl Task {
    pub(crate) fn new(id: TaskId, name: String, context: FxHashMap<String, Value>) -> Self {
        Self {
            inner: Rc::new(TaskInner {
                id,
                name,
                cancelled: Cell::new(false),
                outcome: RefCell::new(None),
                joiners: RefCell::new(Vec::new()),
                next_joiner_id: Cell::new(1),
                context: RefCell::new(context),
                cancel_hook: RefCell::new(None),
            }),
        }
    }

    /// Unique id within the owning runtime
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state
    pub fn status(&self) -> TaskStatus {
        match &*self.inner.outcome.borrow() {
            None => TaskStatus::Running,
            Some(outcome) => outcome.status(),
        }
    }

    /// Whether the task has not yet reached a terminal state
    pub fn is_running(&self) -> bool {
        self.inner.outcome.borrow().is_none()
    }

    /// Whether cancellation has been requested or completed.
    ///
    /// True while cancellation finalizers run, which is what coroutines
    /// observe through the INTROSPECT_CANCEL effect.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// The terminal result, if the task completed normally
    pub fn result(&self) -> Option<Value> {
        match &*self.inner.outcome.borrow() {
            Some(TaskOutcome::Completed(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The terminal error, if the task aborted
    pub fn error(&self) -> Option<SagaError> {
        match &*self.inner.outcome.borrow() {
            Some(TaskOutcome::Errored(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// The full terminal outcome, if any
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Request cancellation. A no-op on terminal tasks.
    pub fn cancel(&self) {
        let hook = self.inner.cancel_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Read one entry of the task's scoped context
    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.inner.context.borrow().get(key).cloned()
    }

    /// Number of joiners currently blocked on this task (diagnostics)
    pub fn joiner_count(&self) -> usize {
        self.inner.joiners.borrow().len()
    }

    pub(crate) fn context_merge(&self, entries: FxHashMap<String, Value>) {
        self.inner.context.borrow_mut().extend(entries);
    }

    /// Shallow copy handed to children at fork time
    pub(crate) fn context_snapshot(&self) -> FxHashMap<String, Value> {
        self.inner.context.borrow().clone()
    }

    pub(crate) fn set_cancelled_flag(&self) {
        self.inner.cancelled.set(true);
    }

    pub(crate) fn set_cancel_hook(&self, hook: Rc<dyn Fn()>) {
        *self.inner.cancel_hook.borrow_mut() = Some(hook);
    }

    /// Record the terminal outcome. Returns false if already terminal.
    pub(crate) fn finish(&self, outcome: TaskOutcome) -> bool {
        let mut slot = self.inner.outcome.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        drop(slot);
        // The driver is done with this task; drop the back-reference.
        *self.inner.cancel_hook.borrow_mut() = None;
        true
    }

    /// Register a joiner, returning its registration id
    pub(crate) fn add_joiner(&self, cb: EffectCb) -> u64 {
        let id = self.inner.next_joiner_id.get();
        self.inner.next_joiner_id.set(id + 1);
        self.inner.joiners.borrow_mut().push((id, cb));
        id
    }

    pub(crate) fn remove_joiner(&self, id: u64) {
        self.inner.joiners.borrow_mut().retain(|(jid, _)| *jid != id);
    }

    /// Drain all joiners for the exactly-once terminal notification
    pub(crate) fn take_joiners(&self) -> Vec<EffectCb> {
        self.inner
            .joiners
            .borrow_mut()
            .drain(..)
            .map(|(_, cb)| cb)
            .collect()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}
