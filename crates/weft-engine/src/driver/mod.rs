//! The process driver: steps coroutine bodies and routes effect outcomes
//!
//! Each task is driven by a [`Proc`]: feed the body the outcome of its last
//! effect, hand the yielded descriptor to a runner, park until the runner's
//! callback settles. Outcomes delivered while a step is already on the stack
//! are queued in a mailbox and drained iteratively, so chains of effects that
//! resolve synchronously never grow the call stack.

pub(crate) mod cb;
mod runner;

use crate::channel::Channel;
use crate::dispatch::DispatchScheduler;
use crate::error::SagaError;
use crate::monitor::{EffectRef, Monitor};
use crate::saga::{Saga, Signal, Step};
use crate::task::{Task, TaskId, TaskOutcome};
use crate::value::{Event, Value};
use cb::{EffectCb, EffectResult};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, trace};

struct EnvInner {
    channel: Channel,
    scheduler: DispatchScheduler,
    emit: Box<dyn Fn(&Event)>,
    query: Box<dyn Fn() -> Value>,
    on_uncaught: Box<dyn Fn(&SagaError, &str)>,
    monitor: Option<Monitor>,
    next_task_id: Cell<u64>,
    next_effect_id: Cell<u64>,
}

/// Shared interpreter environment threaded through every proc.
///
/// Holds the root event channel, the dispatch scheduler, the host hooks, and
/// the per-runtime id counters. Cloning shares the environment.
#[derive(Clone)]
pub(crate) struct Env {
    inner: Rc<EnvInner>,
}

impl Env {
    pub(crate) fn new(
        channel: Channel,
        scheduler: DispatchScheduler,
        emit: Box<dyn Fn(&Event)>,
        query: Box<dyn Fn() -> Value>,
        on_uncaught: Box<dyn Fn(&SagaError, &str)>,
        monitor: Option<Monitor>,
    ) -> Self {
        Self {
            inner: Rc::new(EnvInner {
                channel,
                scheduler,
                emit,
                query,
                on_uncaught,
                monitor,
                next_task_id: Cell::new(1),
                next_effect_id: Cell::new(1),
            }),
        }
    }

    pub(crate) fn channel(&self) -> Channel {
        self.inner.channel.clone()
    }

    pub(crate) fn scheduler(&self) -> DispatchScheduler {
        self.inner.scheduler.clone()
    }

    pub(crate) fn emit(&self, event: &Event) {
        (self.inner.emit)(event);
    }

    pub(crate) fn query(&self) -> Value {
        (self.inner.query)()
    }

    pub(crate) fn report_uncaught(&self, err: &SagaError, task: &str) {
        error!(task, %err, "uncaught error");
        (self.inner.on_uncaught)(err, task);
    }

    fn next_task_id(&self) -> TaskId {
        let raw = self.inner.next_task_id.get();
        self.inner.next_task_id.set(raw + 1);
        TaskId::from_raw(raw)
    }

    fn next_effect_id(&self) -> u64 {
        let raw = self.inner.next_effect_id.get();
        self.inner.next_effect_id.set(raw + 1);
        raw
    }

    pub(crate) fn notify_triggered(&self, effect: &EffectRef) {
        if let Some(monitor) = &self.inner.monitor {
            monitor.notify_triggered(effect);
        }
    }

    pub(crate) fn notify_settled(&self, effect_id: u64, result: &EffectResult) {
        let Some(monitor) = &self.inner.monitor else {
            return;
        };
        match result {
            EffectResult::Value(value) => monitor.notify_resolved(effect_id, value),
            EffectResult::Ended => monitor.notify_resolved(effect_id, &Value::End),
            EffectResult::Err(err) => monitor.notify_rejected(effect_id, err),
            EffectResult::Cancelled => monitor.notify_cancelled(effect_id),
        }
    }

    pub(crate) fn notify_emitted(&self, event: &Event) {
        if let Some(monitor) = &self.inner.monitor {
            monitor.notify_emitted(event);
        }
    }
}

/// What an effect runner delivered back to the driving loop.
enum Msg {
    Resume(Value),
    Fail(SagaError),
    /// The pending effect observed cancellation (e.g. JOIN on a task that
    /// was cancelled): the waiting task is cancelled in turn
    Cancelled,
    /// End-of-channel reached a non-tolerant wait: force-return the body
    Ended,
}

struct ProcInner {
    env: Env,
    task: Task,
    body: RefCell<Box<dyn Saga>>,
    /// Roots (top-level runs and detached spawns) report their own uncaught
    /// errors; attached children propagate them to the parent instead.
    root: bool,
    children: RefCell<Vec<Task>>,
    body_done: Cell<bool>,
    body_value: RefCell<Value>,
    /// Set when an attached child aborts us; overrides the terminal outcome
    abort_error: RefCell<Option<SagaError>>,
    current_effect: RefCell<Option<EffectCb>>,
    stepping: Cell<bool>,
    mailbox: RefCell<VecDeque<Msg>>,
}

/// The driving loop of one task. Cloning shares the proc.
#[derive(Clone)]
pub(crate) struct Proc {
    inner: Rc<ProcInner>,
}

impl Proc {
    /// Create a task for `body` and synchronously drive its first step.
    ///
    /// The caller is responsible for running this inside
    /// `scheduler.immediately` so emits from the first steps stay queued
    /// until the start completes.
    pub(crate) fn spawn(
        env: Env,
        name: String,
        body: Box<dyn Saga>,
        context: FxHashMap<String, Value>,
        root: bool,
    ) -> Task {
        let task = Task::new(env.next_task_id(), name, context);
        let proc = Proc {
            inner: Rc::new(ProcInner {
                env,
                task: task.clone(),
                body: RefCell::new(body),
                root,
                children: RefCell::new(Vec::new()),
                body_done: Cell::new(false),
                body_value: RefCell::new(Value::Null),
                abort_error: RefCell::new(None),
                current_effect: RefCell::new(None),
                stepping: Cell::new(false),
                mailbox: RefCell::new(VecDeque::new()),
            }),
        };
        // Route external Task::cancel calls into this loop. The hook is
        // cleared on the terminal transition, breaking the cycle.
        {
            let proc = proc.clone();
            task.set_cancel_hook(Rc::new(move || proc.cancel()));
        }
        debug!(task = %task.name(), id = task.id().as_u64(), "task started");
        proc.deliver(Msg::Resume(Value::Null));
        task
    }

    pub(crate) fn env(&self) -> &Env {
        &self.inner.env
    }

    pub(crate) fn task(&self) -> &Task {
        &self.inner.task
    }

    /// Deliver an outcome to the body, queueing if a step is already running.
    fn deliver(&self, msg: Msg) {
        self.inner.mailbox.borrow_mut().push_back(msg);
        if self.inner.stepping.get() {
            return;
        }
        self.inner.stepping.set(true);
        loop {
            let msg = self.inner.mailbox.borrow_mut().pop_front();
            match msg {
                Some(msg) => self.step_once(msg),
                None => break,
            }
        }
        self.inner.stepping.set(false);
    }

    fn step_once(&self, msg: Msg) {
        if !self.inner.task.is_running() || self.inner.body_done.get() {
            return;
        }
        let signal = match msg {
            Msg::Resume(value) => Signal::Resume(value),
            Msg::Fail(err) => Signal::Fail(err),
            Msg::Cancelled | Msg::Ended => Signal::Return,
        };
        *self.inner.current_effect.borrow_mut() = None;
        let stepped = self.inner.body.borrow_mut().step(signal);
        match stepped {
            Ok(Step::Effect(effect)) => self.digest(effect),
            Ok(Step::Done(value)) => self.on_body_done(value),
            Err(err) => self.on_body_error(err),
        }
    }

    /// Instrument a yielded effect and hand it to its runner.
    fn digest(&self, effect: crate::effect::Effect) {
        let effect_id = self.inner.env.next_effect_id();
        let tag = effect.tag();
        trace!(
            task = %self.inner.task.name(),
            effect = ?tag,
            id = effect_id,
            "effect triggered"
        );
        self.inner.env.notify_triggered(&EffectRef {
            effect_id,
            task: self.inner.task.name().to_string(),
            tag,
        });

        let this = self.clone();
        let cb = EffectCb::new(move |result| {
            this.inner.env.notify_settled(effect_id, &result);
            match result {
                EffectResult::Value(value) => this.deliver(Msg::Resume(value)),
                EffectResult::Err(err) => this.deliver(Msg::Fail(err)),
                EffectResult::Cancelled => this.cancel(),
                EffectResult::Ended => this.deliver(Msg::Ended),
            }
        });
        *self.inner.current_effect.borrow_mut() = Some(cb.clone());
        runner::run_effect(self, effect, cb);
    }

    fn on_body_done(&self, value: Value) {
        self.inner.body_done.set(true);
        if let Some(err) = self.inner.abort_error.borrow_mut().take() {
            self.end(TaskOutcome::Errored(err));
            return;
        }
        if self.inner.task.is_cancelled() {
            self.end(TaskOutcome::Cancelled);
            return;
        }
        *self.inner.body_value.borrow_mut() = value;
        self.check_end();
    }

    fn on_body_error(&self, err: SagaError) {
        if !self.inner.task.is_running() {
            return;
        }
        self.inner.body_done.set(true);
        // Stash the error first: cancelling children re-enters check_end,
        // which must not complete the task out from under us.
        *self.inner.abort_error.borrow_mut() = Some(err);
        self.cancel_children();
        if let Some(err) = self.inner.abort_error.borrow_mut().take() {
            self.end(TaskOutcome::Errored(err));
        }
    }

    /// Normal completion waits for every attached child to finish.
    fn check_end(&self) {
        if !self.inner.body_done.get()
            || !self.inner.children.borrow().is_empty()
            || !self.inner.task.is_running()
            || self.inner.abort_error.borrow().is_some()
        {
            return;
        }
        if self.inner.task.is_cancelled() {
            self.end(TaskOutcome::Cancelled);
        } else {
            let value = std::mem::take(&mut *self.inner.body_value.borrow_mut());
            self.end(TaskOutcome::Completed(value));
        }
    }

    fn end(&self, outcome: TaskOutcome) {
        if !self.inner.task.finish(outcome.clone()) {
            return;
        }
        debug!(
            task = %self.inner.task.name(),
            id = self.inner.task.id().as_u64(),
            status = ?self.inner.task.status(),
            "task ended"
        );
        // Stragglers still finalizing keep running detached from us.
        self.inner.children.borrow_mut().clear();
        if let TaskOutcome::Errored(err) = &outcome {
            if self.inner.root {
                self.inner.env.report_uncaught(err, self.inner.task.name());
            }
        }
        let result = outcome.to_effect_result();
        for joiner in self.inner.task.take_joiners() {
            joiner.resolve(result.clone());
        }
    }

    /// Cancel this task: children first, then the pending effect, then the
    /// body is force-returned so its finalization effects run.
    pub(crate) fn cancel(&self) {
        if !self.inner.task.is_running() || self.inner.task.is_cancelled() {
            return;
        }
        self.inner.task.set_cancelled_flag();
        debug!(task = %self.inner.task.name(), "task cancelling");
        self.cancel_children();
        if self.inner.body_done.get() {
            // Body already returned; it was only waiting on children.
            self.end(TaskOutcome::Cancelled);
            return;
        }
        self.cancel_current_effect();
        self.deliver(Msg::Cancelled);
    }

    /// An attached child aborted: cancel the rest of the subtree, run our
    /// own finalizers, and end with the child's error.
    pub(crate) fn abort(&self, err: SagaError) {
        if !self.inner.task.is_running() {
            return;
        }
        // First error wins when several children fail in one cascade
        {
            let mut slot = self.inner.abort_error.borrow_mut();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.inner.task.set_cancelled_flag();
        self.cancel_children();
        if self.inner.body_done.get() {
            if let Some(err) = self.inner.abort_error.borrow_mut().take() {
                self.end(TaskOutcome::Errored(err));
            }
        } else {
            self.cancel_current_effect();
            self.deliver(Msg::Cancelled);
        }
    }

    pub(crate) fn add_child(&self, child: Task) {
        self.inner.children.borrow_mut().push(child);
    }

    /// Terminal notification from an attached child.
    pub(crate) fn child_ended(&self, child: &Task, result: EffectResult) {
        if !self.inner.task.is_running() {
            return;
        }
        self.inner
            .children
            .borrow_mut()
            .retain(|t| t.id() != child.id());
        match result {
            // A failed child takes the whole subtree down with it
            EffectResult::Err(err) => self.abort(err),
            // Completed and cancelled children just leave the queue
            _ => self.check_end(),
        }
    }

    fn cancel_children(&self) {
        let children: Vec<Task> = self.inner.children.borrow().clone();
        for child in children {
            child.cancel();
        }
    }

    fn cancel_current_effect(&self) {
        let pending = self.inner.current_effect.borrow_mut().take();
        if let Some(cb) = pending {
            cb.cancel();
        }
    }
}
