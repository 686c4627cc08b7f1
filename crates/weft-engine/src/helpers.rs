//! Worker patterns built from the primitive effects
//!
//! Each helper returns a watcher saga that runs until the event source ends,
//! forking a worker per matched event with a different concurrency policy:
//! every / latest-wins / leading-wins / throttled.

use crate::buffer::BufferKind;
use crate::channel::Channel;
use crate::effect::{self, CallFn, SagaFactory};
use crate::matcher::Pattern;
use crate::saga::{saga_fn, Saga, Signal, Step};
use crate::task::Task;
use crate::value::Value;

/// Fork a worker for every matching event, with no concurrency limit.
pub fn take_every(pattern: Pattern, name: impl Into<String>, worker: SagaFactory) -> Box<dyn Saga> {
    let name = name.into();
    let watcher_name = format!("take_every({})", name);
    let mut awaiting_event = false;
    saga_fn(watcher_name, move |signal| {
        let resumed = match signal {
            Signal::Return => return Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => return Err(err),
            Signal::Resume(value) => value,
        };
        if awaiting_event {
            awaiting_event = false;
            if resumed.is_end() {
                return Ok(Step::Done(Value::Null));
            }
            Ok(Step::Effect(effect::fork(name.clone(), worker.clone(), resumed)))
        } else {
            awaiting_event = true;
            Ok(Step::Effect(effect::wait_maybe(pattern.clone())?))
        }
    })
}

enum LatestState {
    Start,
    Waiting,
    /// Cancelling the previous worker; the new event rides along
    Cancelling(Value),
    Forking,
}

/// Fork a worker per matching event, cancelling the previous worker first:
/// only the handler for the latest event survives.
pub fn take_latest(pattern: Pattern, name: impl Into<String>, worker: SagaFactory) -> Box<dyn Saga> {
    let name = name.into();
    let watcher_name = format!("take_latest({})", name);
    let mut state = LatestState::Start;
    let mut previous: Option<Task> = None;
    saga_fn(watcher_name, move |signal| {
        let resumed = match signal {
            Signal::Return => return Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => return Err(err),
            Signal::Resume(value) => value,
        };
        loop {
            match std::mem::replace(&mut state, LatestState::Start) {
                LatestState::Start => {
                    state = LatestState::Waiting;
                    return Ok(Step::Effect(effect::wait_maybe(pattern.clone())?));
                }
                LatestState::Waiting => {
                    if resumed.is_end() {
                        return Ok(Step::Done(Value::Null));
                    }
                    match previous.take().filter(Task::is_running) {
                        Some(prev) => {
                            state = LatestState::Cancelling(resumed);
                            return Ok(Step::Effect(effect::cancel(vec![prev])));
                        }
                        None => {
                            state = LatestState::Forking;
                            return Ok(Step::Effect(effect::fork(
                                name.clone(),
                                worker.clone(),
                                resumed,
                            )));
                        }
                    }
                }
                LatestState::Cancelling(event) => {
                    state = LatestState::Forking;
                    return Ok(Step::Effect(effect::fork(
                        name.clone(),
                        worker.clone(),
                        event,
                    )));
                }
                LatestState::Forking => {
                    if let Some(task) = resumed.as_task() {
                        previous = Some(task.clone());
                    }
                    // Loop back to issue the next wait
                    continue;
                }
            }
        }
    })
}

enum LeadingState {
    Start,
    Waiting,
    Forking,
    Joining,
}

/// Fork a worker for a matching event, then ignore further matches until it
/// finishes: only the handler for the leading event runs.
pub fn take_leading(
    pattern: Pattern,
    name: impl Into<String>,
    worker: SagaFactory,
) -> Box<dyn Saga> {
    let name = name.into();
    let watcher_name = format!("take_leading({})", name);
    let mut state = LeadingState::Start;
    saga_fn(watcher_name, move |signal| {
        let resumed = match signal {
            Signal::Return => return Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => return Err(err),
            Signal::Resume(value) => value,
        };
        loop {
            match std::mem::replace(&mut state, LeadingState::Start) {
                LeadingState::Start | LeadingState::Joining => {
                    state = LeadingState::Waiting;
                    return Ok(Step::Effect(effect::wait_maybe(pattern.clone())?));
                }
                LeadingState::Waiting => {
                    if resumed.is_end() {
                        return Ok(Step::Done(Value::Null));
                    }
                    state = LeadingState::Forking;
                    return Ok(Step::Effect(effect::fork(
                        name.clone(),
                        worker.clone(),
                        resumed,
                    )));
                }
                LeadingState::Forking => {
                    if let Some(task) = resumed.as_task() {
                        state = LeadingState::Joining;
                        return Ok(Step::Effect(effect::join(task.clone())));
                    }
                    continue;
                }
            }
        }
    })
}

enum ThrottleState {
    Start,
    Deriving,
    Waiting,
    Forking,
    Delaying,
}

/// Fork a worker per matching event, then ignore further matches until
/// `delay` settles. Events arriving during the delay are not lost: the
/// trailing one is buffered (sliding buffer of one) and handled next.
///
/// The interpreter carries no clock; `delay` is an INVOKE target, usually
/// returning a deferred the host settles from its timer.
pub fn throttle(
    pattern: Pattern,
    name: impl Into<String>,
    worker: SagaFactory,
    delay: CallFn,
) -> Box<dyn Saga> {
    let name = name.into();
    let watcher_name = format!("throttle({})", name);
    let mut state = ThrottleState::Start;
    let mut source: Option<Channel> = None;
    saga_fn(watcher_name, move |signal| {
        let resumed = match signal {
            Signal::Return => return Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => return Err(err),
            Signal::Resume(value) => value,
        };
        loop {
            match std::mem::replace(&mut state, ThrottleState::Start) {
                ThrottleState::Start => {
                    state = ThrottleState::Deriving;
                    return Ok(Step::Effect(effect::derive_channel(
                        pattern.clone(),
                        BufferKind::Sliding(1),
                    )?));
                }
                ThrottleState::Deriving => {
                    if let Some(chan) = resumed.as_channel() {
                        source = Some(chan.clone());
                    }
                    state = ThrottleState::Waiting;
                    let chan = source.clone().ok_or_else(|| {
                        crate::error::SagaError::failure("throttle lost its derived channel")
                    })?;
                    return Ok(Step::Effect(effect::wait_from_maybe(chan, Pattern::Any)?));
                }
                ThrottleState::Waiting => {
                    if resumed.is_end() {
                        return Ok(Step::Done(Value::Null));
                    }
                    state = ThrottleState::Forking;
                    return Ok(Step::Effect(effect::fork(
                        name.clone(),
                        worker.clone(),
                        resumed,
                    )));
                }
                ThrottleState::Forking => {
                    state = ThrottleState::Delaying;
                    return Ok(Step::Effect(effect::invoke(
                        "throttle-delay",
                        delay.clone(),
                        Vec::new(),
                    )));
                }
                ThrottleState::Delaying => {
                    let chan = source.clone().ok_or_else(|| {
                        crate::error::SagaError::failure("throttle lost its derived channel")
                    })?;
                    state = ThrottleState::Waiting;
                    return Ok(Step::Effect(effect::wait_from_maybe(chan, Pattern::Any)?));
                }
            }
        }
    })
}
