//! Effect runners: one executor per effect tag
//!
//! A runner receives an owned descriptor and a settle-once callback. It must
//! eventually settle the callback, and if it parks, it must attach a cancel
//! hook that releases whatever it registered (channel takers, joiners,
//! deferred producers).

use super::cb::{CpsHandle, EffectCb, EffectResult};
use super::Proc;
use crate::channel::{Channel, ChannelError, TakeOutcome};
use crate::deferred::Deferred;
use crate::effect::{Branches, CallFn, CallOutcome, CpsFn, Effect, SagaFactory, Selector};
use crate::error::SagaError;
use crate::matcher::Pattern;
use crate::task::{Task, TaskOutcome};
use crate::value::{Event, Value};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

pub(super) fn run_effect(proc: &Proc, effect: Effect, cb: EffectCb) {
    match effect {
        Effect::Wait {
            channel,
            pattern,
            tolerate_end,
        } => run_wait(proc, channel, pattern, tolerate_end, cb),
        Effect::Emit { channel, event } => run_emit(proc, channel, event, cb),
        Effect::Invoke { name, call, args } => run_invoke(proc, name, call, args, cb),
        Effect::CallbackInvoke { call, args, .. } => run_callback_invoke(call, args, cb),
        Effect::Fork {
            name,
            factory,
            arg,
            detached,
        } => run_fork(proc, name, factory, arg, detached, cb),
        Effect::Join { task } => run_join(proc, task, cb),
        Effect::Cancel { tasks } => run_cancel(proc, tasks, cb),
        Effect::Query {
            selector, args, ..
        } => run_query(proc, selector, args, cb),
        Effect::All { branches } => run_all(proc, branches, cb),
        Effect::Race { branches } => run_race(proc, branches, cb),
        Effect::DeriveChannel { pattern, buffer } => {
            let chan = Channel::new(buffer);
            pump(proc.env().channel(), pattern, chan.clone());
            cb.resolve(EffectResult::Value(Value::Channel(chan)));
        }
        Effect::IntrospectCancel => {
            cb.resolve(EffectResult::Value(Value::Bool(proc.task().is_cancelled())));
        }
        Effect::Flush { channel } => {
            let events = channel.flush().into_iter().map(Value::event).collect();
            cb.resolve(EffectResult::Value(Value::List(events)));
        }
        Effect::GetContext { key } => {
            let value = proc.task().context_get(&key).unwrap_or(Value::Null);
            cb.resolve(EffectResult::Value(value));
        }
        Effect::SetContext { entries } => {
            proc.task().context_merge(entries);
            cb.resolve(EffectResult::Value(Value::Null));
        }
    }
}

fn run_wait(
    proc: &Proc,
    channel: Option<Channel>,
    pattern: Pattern,
    tolerate_end: bool,
    cb: EffectCb,
) {
    let source = channel.unwrap_or_else(|| proc.env().channel());
    let take_cb = {
        let cb = cb.clone();
        move |outcome| match outcome {
            TakeOutcome::Item(event) => cb.resolve(EffectResult::Value(Value::event(event))),
            TakeOutcome::End if tolerate_end => cb.resolve(EffectResult::Value(Value::End)),
            TakeOutcome::End => cb.resolve(EffectResult::Ended),
        }
    };
    let handle = source.take(pattern, take_cb);
    cb.set_cancel(move || handle.cancel());
}

/// EMIT runs through the dispatch scheduler: an emit from inside another
/// emit's delivery chain is queued until the outer delivery completes.
fn run_emit(proc: &Proc, channel: Option<Channel>, event: Event, cb: EffectCb) {
    let env = proc.env().clone();
    let scheduler = env.scheduler();
    scheduler.asap(move || {
        let result = match &channel {
            Some(chan) => chan.put(event.clone()),
            None => {
                env.notify_emitted(&event);
                env.emit(&event);
                env.channel().put(event.clone())
            }
        };
        match result {
            Ok(()) => cb.resolve(EffectResult::Value(Value::event(event))),
            Err(err) => cb.resolve(EffectResult::Err(err.into())),
        }
    });
}

fn run_invoke(proc: &Proc, name: String, call: CallFn, args: Vec<Value>, cb: EffectCb) {
    match call(&args) {
        Err(err) => cb.resolve(EffectResult::Err(err)),
        Ok(CallOutcome::Value(value)) => cb.resolve(EffectResult::Value(value)),
        Ok(CallOutcome::Deferred(deferred)) => resolve_deferred(deferred, cb),
        Ok(CallOutcome::Saga(body)) => {
            // A nested coroutine runs as its own task with this effect as
            // its continuation; cancelling the caller cancels it.
            let env = proc.env().clone();
            let context = proc.task().context_snapshot();
            let child = env
                .scheduler()
                .immediately(|| Proc::spawn(env.clone(), name, body, context, false));
            {
                let child = child.clone();
                cb.set_cancel(move || child.cancel());
            }
            match child.outcome() {
                Some(outcome) => cb.resolve(outcome.to_effect_result()),
                None => {
                    child.add_joiner(cb);
                }
            }
        }
    }
}

fn run_callback_invoke(call: CpsFn, args: Vec<Value>, cb: EffectCb) {
    call(&args, CpsHandle::new(cb));
}

/// Settle the effect when the deferred settles; cancelling the effect
/// cancels the deferred so its producer can release the operation.
fn resolve_deferred(deferred: Deferred, cb: EffectCb) {
    {
        let deferred = deferred.clone();
        cb.set_cancel(move || deferred.cancel());
    }
    deferred.subscribe(move |result| match result {
        Ok(value) => cb.resolve(EffectResult::Value(value)),
        Err(err) => cb.resolve(EffectResult::Err(err)),
    });
}

fn run_fork(
    proc: &Proc,
    name: String,
    factory: SagaFactory,
    arg: Value,
    detached: bool,
    cb: EffectCb,
) {
    let env = proc.env().clone();
    let context = proc.task().context_snapshot();
    let parent = proc.clone();
    let scheduler = env.scheduler();
    scheduler.immediately(move || {
        let body = factory(arg);
        let child = Proc::spawn(env, name, body, context, detached);
        if !detached {
            match child.outcome() {
                None => {
                    parent.add_child(child.clone());
                    let notify = {
                        let parent = parent.clone();
                        let child = child.clone();
                        EffectCb::new(move |result| parent.child_ended(&child, result))
                    };
                    child.add_joiner(notify);
                }
                // A child that failed during its synchronous start takes
                // the parent down before the fork even resolves
                Some(TaskOutcome::Errored(err)) => parent.abort(err),
                Some(_) => {}
            }
        }
        cb.resolve(EffectResult::Value(Value::Task(child)));
    });
}

fn run_join(proc: &Proc, task: Task, cb: EffectCb) {
    if task.id() == proc.task().id() {
        cb.resolve(EffectResult::Err(SagaError::failure(
            "a task cannot join itself",
        )));
        return;
    }
    match task.outcome() {
        // Joining a cancelled task cancels the joiner
        Some(outcome) => cb.resolve(outcome.to_effect_result()),
        None => {
            let id = task.add_joiner(cb.clone());
            cb.set_cancel(move || task.remove_joiner(id));
        }
    }
}

fn run_cancel(proc: &Proc, tasks: Vec<Task>, cb: EffectCb) {
    if tasks.is_empty() {
        // Self-cancellation: the proc mutes this callback and force-returns
        // the body, so the resolve below is a no-op.
        proc.cancel();
    } else {
        for task in &tasks {
            task.cancel();
        }
    }
    cb.resolve(EffectResult::Value(Value::Null));
}

fn run_query(proc: &Proc, selector: Selector, args: Vec<Value>, cb: EffectCb) {
    let state = proc.env().query();
    match selector(&state, &args) {
        Ok(value) => cb.resolve(EffectResult::Value(value)),
        Err(err) => cb.resolve(EffectResult::Err(err)),
    }
}

fn split_branches(branches: Branches) -> (Option<Vec<String>>, Vec<Effect>) {
    match branches {
        Branches::List(effects) => (None, effects),
        Branches::Keyed(entries) => {
            let (keys, effects) = entries.into_iter().unzip();
            (Some(keys), effects)
        }
    }
}

fn cancel_all(cbs: &RefCell<Vec<EffectCb>>) {
    for cb in cbs.borrow().iter() {
        cb.cancel();
    }
}

/// ALL: resolve once every branch resolves, keeping the caller's shape.
/// The first rejection (or cancellation, or end-of-channel) wins instead
/// and releases every other pending branch.
fn run_all(proc: &Proc, branches: Branches, cb: EffectCb) {
    let (keys, effects) = split_branches(branches);
    let total = effects.len();
    let slots: Rc<RefCell<Vec<Option<Value>>>> = Rc::new(RefCell::new(vec![None; total]));
    let remaining = Rc::new(Cell::new(total));
    let child_cbs: Rc<RefCell<Vec<EffectCb>>> = Rc::new(RefCell::new(Vec::with_capacity(total)));
    let keys = Rc::new(keys);

    for idx in 0..total {
        let child = {
            let cb = cb.clone();
            let slots = slots.clone();
            let remaining = remaining.clone();
            let child_cbs = child_cbs.clone();
            let keys = keys.clone();
            EffectCb::new(move |result| match result {
                EffectResult::Value(value) => {
                    slots.borrow_mut()[idx] = Some(value);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values: Vec<Value> =
                            slots.borrow_mut().drain(..).flatten().collect();
                        cb.resolve(EffectResult::Value(aggregate(&keys, values)));
                    }
                }
                other => {
                    cancel_all(&child_cbs);
                    cb.resolve(other);
                }
            })
        };
        child_cbs.borrow_mut().push(child);
    }

    {
        let child_cbs = child_cbs.clone();
        cb.set_cancel(move || cancel_all(&child_cbs));
    }
    let cbs: Vec<EffectCb> = child_cbs.borrow().clone();
    for (effect, child) in effects.into_iter().zip(cbs) {
        // A branch settling synchronously settles the aggregate; later
        // branches must not run, or they would register takers nothing
        // can ever release.
        if child.is_settled() {
            continue;
        }
        run_effect(proc, effect, child);
    }
}

/// RACE: the first branch to resolve wins and every loser is cancelled.
/// The winner keeps its position (or key) in the aggregate so the caller
/// can tell which branch it was.
fn run_race(proc: &Proc, branches: Branches, cb: EffectCb) {
    let (keys, effects) = split_branches(branches);
    let total = effects.len();
    let child_cbs: Rc<RefCell<Vec<EffectCb>>> = Rc::new(RefCell::new(Vec::with_capacity(total)));
    let keys = Rc::new(keys);

    for idx in 0..total {
        let child = {
            let cb = cb.clone();
            let child_cbs = child_cbs.clone();
            let keys = keys.clone();
            EffectCb::new(move |result| {
                cancel_all(&child_cbs);
                match result {
                    EffectResult::Value(value) => {
                        let mut slots = vec![Value::Null; total];
                        slots[idx] = value;
                        cb.resolve(EffectResult::Value(winner(&keys, idx, slots)));
                    }
                    other => cb.resolve(other),
                }
            })
        };
        child_cbs.borrow_mut().push(child);
    }

    {
        let child_cbs = child_cbs.clone();
        cb.set_cancel(move || cancel_all(&child_cbs));
    }
    let cbs: Vec<EffectCb> = child_cbs.borrow().clone();
    for (effect, child) in effects.into_iter().zip(cbs) {
        // A branch settling synchronously settles the aggregate; later
        // branches must not run, or they would register takers nothing
        // can ever release.
        if child.is_settled() {
            continue;
        }
        run_effect(proc, effect, child);
    }
}

fn aggregate(keys: &Option<Vec<String>>, values: Vec<Value>) -> Value {
    match keys {
        None => Value::List(values),
        Some(keys) => {
            let map: FxHashMap<String, Value> =
                keys.iter().cloned().zip(values).collect();
            Value::Map(map)
        }
    }
}

fn winner(keys: &Option<Vec<String>>, idx: usize, slots: Vec<Value>) -> Value {
    match keys {
        None => Value::List(slots),
        Some(keys) => {
            let mut map = FxHashMap::default();
            map.insert(keys[idx].clone(), slots.into_iter().nth(idx).unwrap_or(Value::Null));
            Value::Map(map)
        }
    }
}

/// Forward every event matching `pattern` from `source` into `sink`,
/// re-registering after each delivery. Stops when either side closes.
fn pump(source: Channel, pattern: Pattern, sink: Channel) {
    let src = source.clone();
    let pat = pattern.clone();
    source.take(pattern, move |outcome| match outcome {
        TakeOutcome::Item(event) => {
            if sink.is_closed() {
                return;
            }
            match sink.put(event) {
                Ok(()) => pump(src, pat, sink),
                Err(ChannelError::Overflow(err)) => {
                    debug!(%err, "derived channel dropped an event");
                    pump(src, pat, sink);
                }
                Err(ChannelError::Closed) => {}
            }
        }
        TakeOutcome::End => sink.close(),
    });
}
