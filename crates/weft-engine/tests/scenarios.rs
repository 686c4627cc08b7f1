//! End-to-end interpreter scenarios through the public API

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use weft_engine::{
    effect, saga_fn, BufferKind, CallOutcome, Deferred, Event, Monitor, Pattern, Runtime,
    RuntimeOptions, SagaError, SagaFactory, Signal, Step, Task, TaskStatus, Value,
};

fn event_tag(value: &Value) -> Option<&str> {
    value.as_event().map(|ev| ev.tag.as_str())
}

#[test]
fn test_ping_pong_between_two_sagas() {
    let rt = Runtime::new(RuntimeOptions::new());

    // Responder: wait for PING, answer with PONG
    let mut responded = false;
    rt.run(saga_fn("responder", move |signal| match signal {
        Signal::Return => Ok(Step::Done(Value::Null)),
        Signal::Fail(err) => Err(err),
        Signal::Resume(_) => {
            if !responded {
                responded = true;
                return Ok(Step::Effect(effect::wait(Pattern::tag("PING"))?));
            }
            Ok(Step::Effect(effect::emit(Event::with_payload(
                "PONG",
                Value::Int(42),
            ))))
        }
    }));

    let answer: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let a = answer.clone();
    let mut step = 0;
    let pinger = rt.run(saga_fn("pinger", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::emit(Event::new("PING")))),
            (2, _) => Ok(Step::Effect(effect::wait(Pattern::tag("PONG"))?)),
            (_, Signal::Resume(value)) => {
                *a.borrow_mut() = Some(value.clone());
                Ok(Step::Done(value))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(pinger.status(), TaskStatus::Completed);
    let answer = answer.borrow();
    assert_eq!(event_tag(answer.as_ref().unwrap()), Some("PONG"));
    assert_eq!(
        answer.as_ref().unwrap().as_event().unwrap().payload,
        Value::Int(42)
    );
}

#[test]
fn test_race_between_wait_and_timer() {
    let rt = Runtime::new(RuntimeOptions::new());
    let timer_cancelled = Rc::new(RefCell::new(false));

    let tc = timer_cancelled.clone();
    let timeout = move |_args: &[Value]| {
        let deferred = Deferred::new();
        let tc = tc.clone();
        deferred.on_cancel(move || *tc.borrow_mut() = true);
        Ok(CallOutcome::Deferred(deferred))
    };

    let outcome: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let o = outcome.clone();
    let mut step = 0;
    let task = rt.run(saga_fn("racer", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::race(vec![
                effect::wait(Pattern::tag("DATA"))?,
                effect::invoke_fn("timeout", timeout.clone(), vec![]),
            ])?)),
            (_, Signal::Resume(value)) => {
                *o.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Running);
    rt.dispatch(Event::new("DATA"));
    assert_eq!(task.status(), TaskStatus::Completed);

    // The winner keeps its position; the losing timer was released
    let outcome = outcome.borrow();
    match outcome.as_ref().unwrap() {
        Value::List(slots) => {
            assert_eq!(event_tag(&slots[0]), Some("DATA"));
            assert_eq!(slots[1], Value::Null);
        }
        other => panic!("unexpected race outcome: {:?}", other),
    }
    assert!(*timer_cancelled.borrow());
    // No dangling taker registrations survive the race
    assert_eq!(rt.channel().taker_count(), 0);
}

#[test]
fn test_parent_completes_only_after_attached_children() {
    let rt = Runtime::new(RuntimeOptions::new());

    let worker: SagaFactory = Rc::new(|_arg| {
        let mut waited = false;
        saga_fn("worker", move |signal| match signal {
            Signal::Return => Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => Err(err),
            Signal::Resume(_) => {
                if !waited {
                    waited = true;
                    return Ok(Step::Effect(effect::wait(Pattern::tag("GO"))?));
                }
                Ok(Step::Done(Value::Int(5)))
            }
        })
    });

    let child: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
    let c = child.clone();
    let mut step = 0;
    let parent = rt.run(saga_fn("parent", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::fork("worker", worker.clone(), Value::Null))),
            (_, Signal::Resume(value)) => {
                if let Some(task) = value.as_task() {
                    *c.borrow_mut() = Some(task.clone());
                }
                Ok(Step::Done(Value::str("parent-done")))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    // Body returned but the attached child is still running
    assert_eq!(parent.status(), TaskStatus::Running);

    rt.dispatch(Event::new("GO"));
    assert_eq!(parent.status(), TaskStatus::Completed);
    assert_eq!(parent.result(), Some(Value::str("parent-done")));
    let child = child.borrow();
    assert_eq!(child.as_ref().unwrap().result(), Some(Value::Int(5)));
}

#[test]
fn test_cancellation_cascades_and_runs_finalizers() {
    let rt = Runtime::new(RuntimeOptions::new());
    let finalized: Rc<RefCell<Vec<(&'static str, bool)>>> = Rc::new(RefCell::new(Vec::new()));

    let f = finalized.clone();
    let grandchild: SagaFactory = Rc::new(move |_arg| {
        let f = f.clone();
        let mut returning = false;
        saga_fn("grandchild", move |signal| match signal {
            Signal::Return => {
                returning = true;
                Ok(Step::Effect(effect::cancelled()))
            }
            Signal::Fail(err) => Err(err),
            Signal::Resume(value) => {
                if returning {
                    f.borrow_mut()
                        .push(("grandchild", matches!(value, Value::Bool(true))));
                    return Ok(Step::Done(Value::Null));
                }
                Ok(Step::Effect(effect::wait(Pattern::tag("NEVER"))?))
            }
        })
    });

    let f = finalized.clone();
    let worker: SagaFactory = Rc::new(move |_arg| {
        let f = f.clone();
        let grandchild = grandchild.clone();
        let mut forked = false;
        let mut returning = false;
        saga_fn("worker", move |signal| match signal {
            Signal::Return => {
                returning = true;
                // Finalizer: observe the cancellation flag before finishing
                Ok(Step::Effect(effect::cancelled()))
            }
            Signal::Fail(err) => Err(err),
            Signal::Resume(value) => {
                if returning {
                    f.borrow_mut()
                        .push(("worker", matches!(value, Value::Bool(true))));
                    return Ok(Step::Done(Value::Null));
                }
                if !forked {
                    forked = true;
                    return Ok(Step::Effect(effect::fork(
                        "grandchild",
                        grandchild.clone(),
                        Value::Null,
                    )));
                }
                Ok(Step::Effect(effect::wait(Pattern::tag("NEVER"))?))
            }
        })
    });

    let child: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
    let c = child.clone();
    let mut step = 0;
    let parent = rt.run(saga_fn("parent", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::fork("worker", worker.clone(), Value::Null))),
            (2, Signal::Resume(value)) => {
                if let Some(task) = value.as_task() {
                    *c.borrow_mut() = Some(task.clone());
                }
                Ok(Step::Effect(effect::wait(Pattern::tag("ALSO_NEVER"))?))
            }
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Resume(_)) => Ok(Step::Done(Value::Null)),
        }
    }));

    // Parent, worker, and grandchild are each parked on a wait
    assert_eq!(rt.channel().taker_count(), 3);
    parent.cancel();

    assert_eq!(parent.status(), TaskStatus::Cancelled);
    let child = child.borrow();
    assert_eq!(child.as_ref().unwrap().status(), TaskStatus::Cancelled);
    // Cancellation reached every level exactly once, deepest first, and
    // each finalizer saw the cancellation flag set
    assert_eq!(
        finalized.borrow().as_slice(),
        &[("grandchild", true), ("worker", true)]
    );
    // Every pending wait was deregistered
    assert_eq!(rt.channel().taker_count(), 0);
}

#[test]
fn test_all_fails_fast_and_releases_pending_branches() {
    let rt = Runtime::new(RuntimeOptions::new());

    let mut step = 0;
    let task = rt.run(saga_fn("all-runner", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::all(vec![
                effect::wait(Pattern::tag("SLOW"))?,
                effect::invoke_fn(
                    "failing",
                    |_args| Err(SagaError::failure("no good")),
                    vec![],
                ),
            ])?)),
            (_, Signal::Fail(err)) => Err(err),
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Errored);
    assert_eq!(task.error(), Some(SagaError::failure("no good")));
    // The pending WAIT branch was cancelled along with the aggregate
    assert_eq!(rt.channel().taker_count(), 0);
}

#[test]
fn test_all_failure_before_wait_branch_registers_no_taker() {
    let rt = Runtime::new(RuntimeOptions::new());

    // The failing branch comes first: the WAIT branch after it must never
    // register on the root channel at all
    let mut step = 0;
    let task = rt.run(saga_fn("all-runner", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::all(vec![
                effect::invoke_fn(
                    "failing",
                    |_args| Err(SagaError::failure("no good")),
                    vec![],
                ),
                effect::wait(Pattern::tag("SLOW"))?,
            ])?)),
            (_, Signal::Fail(err)) => Err(err),
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Errored);
    assert_eq!(rt.channel().taker_count(), 0);
}

#[test]
fn test_race_sync_winner_does_not_starve_later_waiters() {
    let rt = Runtime::new(RuntimeOptions::new());

    let mut step = 0;
    let racer = rt.run(saga_fn("racer", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::race(vec![
                effect::invoke_fn(
                    "instant",
                    |_args| Ok(CallOutcome::Value(Value::Int(1))),
                    vec![],
                ),
                effect::wait(Pattern::tag("DATA"))?,
            ])?)),
            (_, Signal::Fail(err)) => Err(err),
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(racer.status(), TaskStatus::Completed);
    // The losing WAIT branch never registered, so nothing is left behind
    // to swallow the next matching event
    assert_eq!(rt.channel().taker_count(), 0);

    let mut waited = false;
    let waiter = rt.run(saga_fn("late-waiter", move |signal| match signal {
        Signal::Return => Ok(Step::Done(Value::Null)),
        Signal::Fail(err) => Err(err),
        Signal::Resume(_) => {
            if !waited {
                waited = true;
                return Ok(Step::Effect(effect::wait(Pattern::tag("DATA"))?));
            }
            Ok(Step::Done(Value::Null))
        }
    }));

    rt.dispatch(Event::new("DATA"));
    assert_eq!(waiter.status(), TaskStatus::Completed);
}

#[test]
fn test_all_keyed_aggregates_by_key() {
    let rt = Runtime::new(RuntimeOptions::new());
    let outcome: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

    let o = outcome.clone();
    let mut step = 0;
    let task = rt.run(saga_fn("gatherer", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::all_keyed(vec![
                ("first".to_string(), effect::wait(Pattern::tag("A"))?),
                ("second".to_string(), effect::wait(Pattern::tag("B"))?),
            ])?)),
            (_, Signal::Resume(value)) => {
                *o.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    rt.dispatch(Event::new("B"));
    assert_eq!(task.status(), TaskStatus::Running);
    rt.dispatch(Event::new("A"));
    assert_eq!(task.status(), TaskStatus::Completed);

    let outcome = outcome.borrow();
    match outcome.as_ref().unwrap() {
        Value::Map(map) => {
            assert_eq!(event_tag(&map["first"]), Some("A"));
            assert_eq!(event_tag(&map["second"]), Some("B"));
        }
        other => panic!("unexpected aggregate: {:?}", other),
    }
}

#[test]
fn test_detached_spawn_failure_is_isolated() {
    let uncaught: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let u = uncaught.clone();
    let rt = Runtime::new(
        RuntimeOptions::new().on_uncaught(move |err, task| {
            u.borrow_mut().push(format!("{task}: {err}"));
        }),
    );

    let brittle: SagaFactory = Rc::new(|_arg| {
        let mut waited = false;
        saga_fn("brittle", move |signal| match signal {
            Signal::Return => Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => Err(err),
            Signal::Resume(_) => {
                if !waited {
                    waited = true;
                    return Ok(Step::Effect(effect::wait(Pattern::tag("TRIGGER"))?));
                }
                Err(SagaError::failure("late failure"))
            }
        })
    });

    let spawned: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
    let s = spawned.clone();
    let mut step = 0;
    let parent = rt.run(saga_fn("parent", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::spawn("brittle", brittle.clone(), Value::Null))),
            (_, Signal::Resume(value)) => {
                if let Some(task) = value.as_task() {
                    *s.borrow_mut() = Some(task.clone());
                }
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    // Detached children do not keep the parent alive
    assert_eq!(parent.status(), TaskStatus::Completed);

    rt.dispatch(Event::new("TRIGGER"));
    let spawned = spawned.borrow();
    assert_eq!(spawned.as_ref().unwrap().status(), TaskStatus::Errored);
    // The parent's outcome is untouched; the error went to the sink
    assert_eq!(parent.status(), TaskStatus::Completed);
    assert_eq!(
        uncaught.borrow().as_slice(),
        &["brittle: late failure".to_string()]
    );
}

#[test]
fn test_context_is_copied_on_fork_not_shared() {
    let rt = Runtime::new(RuntimeOptions::new());
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

    let s = seen.clone();
    let child_body: SagaFactory = Rc::new(move |_arg| {
        let s = s.clone();
        let mut step = 0;
        saga_fn("child", move |signal| {
            step += 1;
            match (step, signal) {
                // Inherited from the parent at fork time
                (1, _) => Ok(Step::Effect(effect::get_context("tenant"))),
                (2, Signal::Resume(value)) => {
                    s.borrow_mut().push(value);
                    // Child-local write; must not leak to the parent
                    Ok(Step::Effect(effect::set_context_entry(
                        "child-only",
                        Value::Bool(true),
                    )))
                }
                (_, Signal::Fail(err)) => Err(err),
                (_, _) => Ok(Step::Done(Value::Null)),
            }
        })
    });

    let s = seen.clone();
    let mut step = 0;
    let parent = rt.run(saga_fn("parent", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::set_context_entry(
                "tenant",
                Value::str("acme"),
            ))),
            (2, _) => Ok(Step::Effect(effect::fork(
                "child",
                child_body.clone(),
                Value::Null,
            ))),
            (3, _) => Ok(Step::Effect(effect::get_context("child-only"))),
            (_, Signal::Resume(value)) => {
                s.borrow_mut().push(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(parent.status(), TaskStatus::Completed);
    // Child saw the inherited entry; parent never saw the child's write
    assert_eq!(
        seen.borrow().as_slice(),
        &[Value::str("acme"), Value::Null]
    );
}

#[test]
fn test_callback_invoke_resumes_when_host_calls_back() {
    let rt = Runtime::new(RuntimeOptions::new());
    let pending: Rc<RefCell<Vec<weft_engine::CpsHandle>>> = Rc::new(RefCell::new(Vec::new()));

    let p = pending.clone();
    let begin_io: weft_engine::CpsFn = Rc::new(move |_args, handle| {
        p.borrow_mut().push(handle);
    });

    let got: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let g = got.clone();
    let mut step = 0;
    let task = rt.run(saga_fn("io-saga", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::invoke_cb(
                "begin-io",
                begin_io.clone(),
                vec![],
            ))),
            (_, Signal::Resume(value)) => {
                *g.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Running);
    pending.borrow()[0].done(Ok(Value::str("payload")));
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(*got.borrow(), Some(Value::str("payload")));

    // Late second completion is a no-op
    pending.borrow()[0].done(Err(SagaError::failure("too late")));
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[test]
fn test_cancelling_callback_invoke_runs_release_hook() {
    let rt = Runtime::new(RuntimeOptions::new());
    let released = Rc::new(RefCell::new(false));

    let r = released.clone();
    let begin_io: weft_engine::CpsFn = Rc::new(move |_args, handle| {
        let r = r.clone();
        handle.set_cancel(move || *r.borrow_mut() = true);
    });

    let mut step = 0;
    let task = rt.run(saga_fn("io-saga", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::invoke_cb(
                "begin-io",
                begin_io.clone(),
                vec![],
            ))),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
            (_, Signal::Fail(err)) => Err(err),
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    task.cancel();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(*released.borrow());
}

#[test]
fn test_query_reads_host_state_through_selector() {
    let state = Rc::new(RefCell::new(Value::Int(10)));
    let s = state.clone();
    let rt = Runtime::new(RuntimeOptions::new().query_state(move || s.borrow().clone()));

    let got: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let g = got.clone();
    let mut step = 0;
    let task = rt.run(saga_fn("reader", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::query(
                "double",
                Rc::new(|state, _args| match state {
                    Value::Int(n) => Ok(Value::Int(n * 2)),
                    _ => Err(SagaError::failure("unexpected state shape")),
                }),
                vec![],
            ))),
            (_, Signal::Resume(value)) => {
                *g.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(*got.borrow(), Some(Value::Int(20)));
}

#[test]
fn test_derive_channel_buffers_and_flushes() {
    let rt = Runtime::new(RuntimeOptions::new());
    let flushed: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));

    let f = flushed.clone();
    let mut step = 0;
    let mut derived: Option<weft_engine::Channel> = None;
    let task = rt.run(saga_fn("collector", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::derive_channel(
                Pattern::tag("TICK"),
                BufferKind::Expanding(4),
            )?)),
            (2, Signal::Resume(value)) => {
                derived = value.as_channel().cloned();
                Ok(Step::Effect(effect::wait(Pattern::tag("COLLECT"))?))
            }
            (3, Signal::Resume(_)) => {
                let chan = derived.clone().expect("derived channel");
                Ok(Step::Effect(effect::flush(chan)))
            }
            (_, Signal::Resume(value)) => {
                *f.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    // Buffered by the derived channel while the saga waits elsewhere
    rt.dispatch(Event::new("TICK"));
    rt.dispatch(Event::new("TICK"));
    rt.dispatch(Event::new("OTHER"));
    rt.dispatch(Event::new("COLLECT"));

    assert_eq!(task.status(), TaskStatus::Completed);
    let flushed = flushed.borrow();
    match flushed.as_ref().unwrap() {
        Value::List(items) => assert_eq!(items.len(), 2),
        other => panic!("unexpected flush result: {:?}", other),
    }
}

#[test]
fn test_join_delivers_child_result() {
    let rt = Runtime::new(RuntimeOptions::new());

    let worker: SagaFactory = Rc::new(|_arg| {
        let mut waited = false;
        saga_fn("worker", move |signal| match signal {
            Signal::Return => Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => Err(err),
            Signal::Resume(_) => {
                if !waited {
                    waited = true;
                    return Ok(Step::Effect(effect::wait(Pattern::tag("GO"))?));
                }
                Ok(Step::Done(Value::Int(99)))
            }
        })
    });

    let got: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let g = got.clone();
    let mut step = 0;
    let parent = rt.run(saga_fn("parent", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::fork("worker", worker.clone(), Value::Null))),
            (2, Signal::Resume(value)) => {
                let task = value.as_task().expect("fork resolves with a task").clone();
                Ok(Step::Effect(effect::join(task)))
            }
            (_, Signal::Resume(value)) => {
                *g.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, Signal::Fail(err)) => Err(err),
            (_, Signal::Return) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(parent.status(), TaskStatus::Running);
    rt.dispatch(Event::new("GO"));
    assert_eq!(parent.status(), TaskStatus::Completed);
    assert_eq!(*got.borrow(), Some(Value::Int(99)));
}

#[test]
fn test_emit_to_closed_channel_is_catchable() {
    let rt = Runtime::new(RuntimeOptions::new());
    let target = weft_engine::Channel::new(BufferKind::Expanding(1));
    target.close();

    let mut step = 0;
    let task = rt.run(saga_fn("emitter", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::emit_to(
                target.clone(),
                Event::new("LATE"),
            ))),
            // The failure arrives as a signal; absorbing it continues the body
            (_, Signal::Fail(_)) => Ok(Step::Done(Value::str("caught"))),
            (_, _) => Ok(Step::Done(Value::str("not-raised"))),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.result(), Some(Value::str("caught")));
}

#[test]
fn test_monitor_observes_effect_lifecycle() {
    let triggered: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let resolved = Rc::new(RefCell::new(0u32));
    let emitted: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let (t, r, e) = (triggered.clone(), resolved.clone(), emitted.clone());
    let monitor = Monitor::new()
        .on_effect_triggered(move |eff| t.borrow_mut().push(format!("{:?}", eff.tag)))
        .on_effect_resolved(move |_id, _value| *r.borrow_mut() += 1)
        .on_event_emitted(move |event| e.borrow_mut().push(event.tag.clone()));

    let rt = Runtime::new(RuntimeOptions::new().with_monitor(monitor));

    let mut step = 0;
    let task = rt.run(saga_fn("observed", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::emit(Event::new("SEEN")))),
            (2, _) => Ok(Step::Effect(effect::cancelled())),
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(
        triggered.borrow().as_slice(),
        &["Emit".to_string(), "IntrospectCancel".to_string()]
    );
    assert_eq!(*resolved.borrow(), 2);
    assert_eq!(emitted.borrow().as_slice(), &["SEEN".to_string()]);
}

#[test]
fn test_runtimes_are_independent() {
    let rt_a = Runtime::new(RuntimeOptions::new());
    let rt_b = Runtime::new(RuntimeOptions::new());

    let make_waiter = || {
        let mut waited = false;
        saga_fn("waiter", move |signal| match signal {
            Signal::Return => Ok(Step::Done(Value::Null)),
            Signal::Fail(err) => Err(err),
            Signal::Resume(_) => {
                if !waited {
                    waited = true;
                    return Ok(Step::Effect(effect::wait(Pattern::tag("X"))?));
                }
                Ok(Step::Done(Value::Null))
            }
        })
    };

    let task_a = rt_a.run(make_waiter());
    let task_b = rt_b.run(make_waiter());

    // Events never cross runtime boundaries
    rt_a.dispatch(Event::new("X"));
    assert_eq!(task_a.status(), TaskStatus::Completed);
    assert_eq!(task_b.status(), TaskStatus::Running);
}

#[test]
fn test_root_context_seeds_every_run() {
    let mut context = FxHashMap::default();
    context.insert("region".to_string(), Value::str("eu-west"));
    let rt = Runtime::new(RuntimeOptions::new().with_context(context));

    let got: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let g = got.clone();
    let mut step = 0;
    let task = rt.run(saga_fn("reader", move |signal| {
        step += 1;
        match (step, signal) {
            (1, _) => Ok(Step::Effect(effect::get_context("region"))),
            (_, Signal::Resume(value)) => {
                *g.borrow_mut() = Some(value);
                Ok(Step::Done(Value::Null))
            }
            (_, _) => Ok(Step::Done(Value::Null)),
        }
    }));

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(*got.borrow(), Some(Value::str("eu-west")));
}
