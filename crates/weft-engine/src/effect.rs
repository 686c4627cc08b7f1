//! The effect algebra: descriptor constructors and tag accessors
//!
//! Effects are immutable data describing a side effect to perform; they carry
//! no behavior and are consumed exactly once by the process driver. Most
//! invalid states are unrepresentable by construction (CANCEL takes real
//! [`Task`] handles, WAIT takes a real [`Pattern`]); the remaining
//! representable-but-invalid inputs are rejected eagerly with
//! [`InvalidEffectArgument`], never silently.

use crate::buffer::BufferKind;
use crate::channel::Channel;
use crate::deferred::Deferred;
use crate::driver::cb::CpsHandle;
use crate::error::SagaError;
use crate::matcher::Pattern;
use crate::saga::Saga;
use crate::task::Task;
use crate::value::{Event, Value};
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

/// Raised synchronously by an effect constructor on invalid arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid effect argument: {message}")]
pub struct InvalidEffectArgument {
    /// What was wrong with the arguments
    pub message: String,
}

impl InvalidEffectArgument {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What an INVOKE target may return.
pub enum CallOutcome {
    /// A plain value; the effect resolves synchronously
    Value(Value),
    /// A nested coroutine; driven to completion with this step as its
    /// continuation
    Saga(Box<dyn Saga>),
    /// An awaitable; the effect resolves when it settles
    Deferred(Deferred),
}

/// An INVOKE target.
pub type CallFn = Rc<dyn Fn(&[Value]) -> Result<CallOutcome, SagaError>>;

/// A CALLBACK_INVOKE target: completes through the error-first handle.
pub type CpsFn = Rc<dyn Fn(&[Value], CpsHandle)>;

/// A QUERY selector over the host state.
pub type Selector = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, SagaError>>;

/// Builds a saga body from the forked argument (usually the matched event).
pub type SagaFactory = Rc<dyn Fn(Value) -> Box<dyn Saga>>;

/// Sub-effects of ALL/RACE, keeping the caller's shape for the aggregate.
pub enum Branches {
    /// Positional sub-effects; aggregate is a list
    List(Vec<Effect>),
    /// Named sub-effects; aggregate is a keyed map
    Keyed(Vec<(String, Effect)>),
}

impl Branches {
    /// Number of sub-effects
    pub fn len(&self) -> usize {
        match self {
            Branches::List(effects) => effects.len(),
            Branches::Keyed(entries) => entries.len(),
        }
    }

    /// Whether there are no sub-effects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The effect-tag vocabulary; stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectTag {
    /// Wait for a matching event
    Wait,
    /// Emit an event
    Emit,
    /// Invoke a callable
    Invoke,
    /// Invoke a callback-style callable
    CallbackInvoke,
    /// Start a child coroutine
    Fork,
    /// Wait for a task to become terminal
    Join,
    /// Cancel tasks (or self)
    Cancel,
    /// Query host state through a selector
    Query,
    /// Run sub-effects, resolving when all settle
    All,
    /// Run sub-effects, resolving with the first winner
    Race,
    /// Create a buffered channel fed from matching events
    DeriveChannel,
    /// Read the current task's cancellation flag
    IntrospectCancel,
    /// Drain a channel's buffer
    Flush,
    /// Read a context entry
    GetContext,
    /// Write context entries
    SetContext,
}

/// An effect descriptor.
pub enum Effect {
    /// WAIT: resolve with the first event matching `pattern` on `channel`
    /// (the process-wide event channel when `None`). A tolerant wait
    /// resolves with the end marker instead of terminating the body.
    Wait {
        /// Source channel; the root event channel when absent
        channel: Option<Channel>,
        /// Pattern events must match
        pattern: Pattern,
        /// Resolve with [`Value::End`] instead of terminating on close
        tolerate_end: bool,
    },
    /// EMIT: deliver an event through the dispatch scheduler
    Emit {
        /// Target channel; the host bus + root channel when absent
        channel: Option<Channel>,
        /// The event to deliver
        event: Event,
    },
    /// INVOKE: call the target, recursing into returned sagas/deferreds
    Invoke {
        /// Display name for diagnostics
        name: String,
        /// The callable
        call: CallFn,
        /// Arguments handed to the callable
        args: Vec<Value>,
    },
    /// CALLBACK_INVOKE: callback-style invocation
    CallbackInvoke {
        /// Display name for diagnostics
        name: String,
        /// The callable
        call: CpsFn,
        /// Arguments handed to the callable
        args: Vec<Value>,
    },
    /// FORK: start a child coroutine, resolving with its [`Task`]
    Fork {
        /// Child task display name
        name: String,
        /// Builds the child body from `arg`
        factory: SagaFactory,
        /// Argument handed to the factory
        arg: Value,
        /// Detached children are not linked to the parent's fork queue
        detached: bool,
    },
    /// JOIN: resolve when the target task is terminal
    Join {
        /// The task to wait for
        task: Task,
    },
    /// CANCEL: cancel the targets, or the current task when empty
    Cancel {
        /// Targets; empty means self-cancellation
        tasks: Vec<Task>,
    },
    /// QUERY: apply a selector to the host state
    Query {
        /// Display name for diagnostics
        name: String,
        /// The selector
        selector: Selector,
        /// Extra selector arguments
        args: Vec<Value>,
    },
    /// ALL: fan-out, resolving once every branch settles (fail-fast)
    All {
        /// The sub-effects
        branches: Branches,
    },
    /// RACE: fan-out, resolving with the first branch to settle
    Race {
        /// The sub-effects
        branches: Branches,
    },
    /// DERIVE_CHANNEL: buffered channel fed by matching root events
    DeriveChannel {
        /// Events to forward
        pattern: Pattern,
        /// Buffer policy of the derived channel
        buffer: BufferKind,
    },
    /// INTROSPECT_CANCEL: the current task's cancellation flag
    IntrospectCancel,
    /// FLUSH: drain a channel's buffer without consuming future events
    Flush {
        /// The channel to drain
        channel: Channel,
    },
    /// GET_CONTEXT: read one context entry
    GetContext {
        /// Entry key
        key: String,
    },
    /// SET_CONTEXT: merge entries into the current task's context
    SetContext {
        /// Entries to merge
        entries: FxHashMap<String, Value>,
    },
}

impl Effect {
    /// The tag identifying which runner executes this effect
    pub fn tag(&self) -> EffectTag {
        match self {
            Effect::Wait { .. } => EffectTag::Wait,
            Effect::Emit { .. } => EffectTag::Emit,
            Effect::Invoke { .. } => EffectTag::Invoke,
            Effect::CallbackInvoke { .. } => EffectTag::CallbackInvoke,
            Effect::Fork { .. } => EffectTag::Fork,
            Effect::Join { .. } => EffectTag::Join,
            Effect::Cancel { .. } => EffectTag::Cancel,
            Effect::Query { .. } => EffectTag::Query,
            Effect::All { .. } => EffectTag::All,
            Effect::Race { .. } => EffectTag::Race,
            Effect::DeriveChannel { .. } => EffectTag::DeriveChannel,
            Effect::IntrospectCancel => EffectTag::IntrospectCancel,
            Effect::Flush { .. } => EffectTag::Flush,
            Effect::GetContext { .. } => EffectTag::GetContext,
            Effect::SetContext { .. } => EffectTag::SetContext,
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Wait {
                pattern,
                tolerate_end,
                ..
            } => f
                .debug_struct("Wait")
                .field("pattern", pattern)
                .field("tolerate_end", tolerate_end)
                .finish_non_exhaustive(),
            Effect::Emit { event, .. } => {
                f.debug_struct("Emit").field("event", event).finish_non_exhaustive()
            }
            Effect::Invoke { name, args, .. } => f
                .debug_struct("Invoke")
                .field("name", name)
                .field("args", &args.len())
                .finish_non_exhaustive(),
            Effect::CallbackInvoke { name, args, .. } => f
                .debug_struct("CallbackInvoke")
                .field("name", name)
                .field("args", &args.len())
                .finish_non_exhaustive(),
            Effect::Fork { name, detached, .. } => f
                .debug_struct("Fork")
                .field("name", name)
                .field("detached", detached)
                .finish_non_exhaustive(),
            Effect::Join { task } => f.debug_struct("Join").field("task", &task.id()).finish(),
            Effect::Cancel { tasks } => f
                .debug_struct("Cancel")
                .field("tasks", &tasks.iter().map(|t| t.id()).collect::<Vec<_>>())
                .finish(),
            Effect::Query { name, .. } => {
                f.debug_struct("Query").field("name", name).finish_non_exhaustive()
            }
            Effect::All { branches } => {
                f.debug_struct("All").field("branches", &branches.len()).finish()
            }
            Effect::Race { branches } => {
                f.debug_struct("Race").field("branches", &branches.len()).finish()
            }
            Effect::DeriveChannel { pattern, buffer } => f
                .debug_struct("DeriveChannel")
                .field("pattern", pattern)
                .field("buffer", buffer)
                .finish(),
            Effect::IntrospectCancel => write!(f, "IntrospectCancel"),
            Effect::Flush { channel } => {
                f.debug_struct("Flush").field("channel", channel).finish()
            }
            Effect::GetContext { key } => {
                f.debug_struct("GetContext").field("key", key).finish()
            }
            Effect::SetContext { entries } => f
                .debug_struct("SetContext")
                .field("keys", &entries.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

fn validate_pattern(pattern: &Pattern) -> Result<(), InvalidEffectArgument> {
    match pattern {
        Pattern::AnyOf(patterns) => {
            if patterns.is_empty() {
                return Err(InvalidEffectArgument::new(
                    "pattern list must not be empty",
                ));
            }
            patterns.iter().try_for_each(validate_pattern)
        }
        _ => Ok(()),
    }
}

/// WAIT on the process-wide event channel
pub fn wait(pattern: Pattern) -> Result<Effect, InvalidEffectArgument> {
    validate_pattern(&pattern)?;
    Ok(Effect::Wait {
        channel: None,
        pattern,
        tolerate_end: false,
    })
}

/// WAIT on a specific channel
pub fn wait_from(channel: Channel, pattern: Pattern) -> Result<Effect, InvalidEffectArgument> {
    validate_pattern(&pattern)?;
    Ok(Effect::Wait {
        channel: Some(channel),
        pattern,
        tolerate_end: false,
    })
}

/// WAIT tolerant of end-of-channel: resolves with [`Value::End`] instead of
/// terminating the body
pub fn wait_maybe(pattern: Pattern) -> Result<Effect, InvalidEffectArgument> {
    validate_pattern(&pattern)?;
    Ok(Effect::Wait {
        channel: None,
        pattern,
        tolerate_end: true,
    })
}

/// End-tolerant WAIT on a specific channel
pub fn wait_from_maybe(
    channel: Channel,
    pattern: Pattern,
) -> Result<Effect, InvalidEffectArgument> {
    validate_pattern(&pattern)?;
    Ok(Effect::Wait {
        channel: Some(channel),
        pattern,
        tolerate_end: true,
    })
}

/// EMIT an event to the host bus and the process-wide channel
pub fn emit(event: Event) -> Effect {
    Effect::Emit {
        channel: None,
        event,
    }
}

/// EMIT an event directly to a specific channel
pub fn emit_to(channel: Channel, event: Event) -> Effect {
    Effect::Emit {
        channel: Some(channel),
        event,
    }
}

/// INVOKE a callable
pub fn invoke(name: impl Into<String>, call: CallFn, args: Vec<Value>) -> Effect {
    Effect::Invoke {
        name: name.into(),
        call,
        args,
    }
}

/// INVOKE a plain closure
pub fn invoke_fn(
    name: impl Into<String>,
    call: impl Fn(&[Value]) -> Result<CallOutcome, SagaError> + 'static,
    args: Vec<Value>,
) -> Effect {
    invoke(name, Rc::new(call), args)
}

/// CALLBACK_INVOKE a callback-style callable
pub fn invoke_cb(name: impl Into<String>, call: CpsFn, args: Vec<Value>) -> Effect {
    Effect::CallbackInvoke {
        name: name.into(),
        call,
        args,
    }
}

/// FORK a child coroutine linked to the caller's fork queue
pub fn fork(name: impl Into<String>, factory: SagaFactory, arg: Value) -> Effect {
    Effect::Fork {
        name: name.into(),
        factory,
        arg,
        detached: false,
    }
}

/// Spawn a detached child: failures are isolated and reported only to the
/// host's uncaught-error sink
pub fn spawn(name: impl Into<String>, factory: SagaFactory, arg: Value) -> Effect {
    Effect::Fork {
        name: name.into(),
        factory,
        arg,
        detached: true,
    }
}

/// JOIN a task: resolve when it reaches a terminal state
pub fn join(task: Task) -> Effect {
    Effect::Join { task }
}

/// CANCEL the given tasks
pub fn cancel(tasks: Vec<Task>) -> Effect {
    Effect::Cancel { tasks }
}

/// CANCEL the current task
pub fn cancel_self() -> Effect {
    Effect::Cancel { tasks: Vec::new() }
}

/// QUERY the host state through a selector
pub fn query(name: impl Into<String>, selector: Selector, args: Vec<Value>) -> Effect {
    Effect::Query {
        name: name.into(),
        selector,
        args,
    }
}

/// ALL: resolve once every sub-effect settles; fail-fast on the first error
pub fn all(effects: Vec<Effect>) -> Result<Effect, InvalidEffectArgument> {
    if effects.is_empty() {
        return Err(InvalidEffectArgument::new("all() requires at least one effect"));
    }
    Ok(Effect::All {
        branches: Branches::List(effects),
    })
}

/// ALL with named branches; the aggregate is a keyed map
pub fn all_keyed(effects: Vec<(String, Effect)>) -> Result<Effect, InvalidEffectArgument> {
    if effects.is_empty() {
        return Err(InvalidEffectArgument::new("all() requires at least one effect"));
    }
    Ok(Effect::All {
        branches: Branches::Keyed(effects),
    })
}

/// RACE: resolve with the first sub-effect to settle; cancel the rest
pub fn race(effects: Vec<Effect>) -> Result<Effect, InvalidEffectArgument> {
    if effects.is_empty() {
        return Err(InvalidEffectArgument::new("race() requires at least one effect"));
    }
    Ok(Effect::Race {
        branches: Branches::List(effects),
    })
}

/// RACE with named branches; the winner is a single-key map
pub fn race_keyed(effects: Vec<(String, Effect)>) -> Result<Effect, InvalidEffectArgument> {
    if effects.is_empty() {
        return Err(InvalidEffectArgument::new("race() requires at least one effect"));
    }
    Ok(Effect::Race {
        branches: Branches::Keyed(effects),
    })
}

/// DERIVE_CHANNEL: a buffered channel fed by events matching `pattern`
pub fn derive_channel(
    pattern: Pattern,
    buffer: BufferKind,
) -> Result<Effect, InvalidEffectArgument> {
    validate_pattern(&pattern)?;
    Ok(Effect::DeriveChannel { pattern, buffer })
}

/// INTROSPECT_CANCEL: whether the current task's cancellation flag is set
pub fn cancelled() -> Effect {
    Effect::IntrospectCancel
}

/// FLUSH a channel's buffer
pub fn flush(channel: Channel) -> Effect {
    Effect::Flush { channel }
}

/// GET_CONTEXT: read one entry of the current task's context
pub fn get_context(key: impl Into<String>) -> Effect {
    Effect::GetContext { key: key.into() }
}

/// SET_CONTEXT: merge entries into the current task's context
pub fn set_context(entries: FxHashMap<String, Value>) -> Effect {
    Effect::SetContext { entries }
}

/// SET_CONTEXT for a single entry
pub fn set_context_entry(key: impl Into<String>, value: Value) -> Effect {
    let mut entries = FxHashMap::default();
    entries.insert(key.into(), value);
    Effect::SetContext { entries }
}
