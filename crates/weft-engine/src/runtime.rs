//! Runtime construction and the host-facing surface
//!
//! The host owns event ingress (`dispatch`), effect egress (the emit and
//! query hooks), and the lifetime of the root channel. Everything else runs
//! inside the interpreter.

use crate::buffer::BufferKind;
use crate::channel::Channel;
use crate::dispatch::DispatchScheduler;
use crate::driver::{Env, Proc};
use crate::error::SagaError;
use crate::monitor::Monitor;
use crate::saga::Saga;
use crate::task::Task;
use crate::value::{Event, Value};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::debug;

/// Host hooks and initial state for a [`Runtime`].
#[derive(Default)]
pub struct RuntimeOptions {
    emit: Option<Box<dyn Fn(&Event)>>,
    query: Option<Box<dyn Fn() -> Value>>,
    on_uncaught: Option<Box<dyn Fn(&SagaError, &str)>>,
    monitor: Option<Monitor>,
    context: FxHashMap<String, Value>,
}

impl RuntimeOptions {
    /// Options with no hooks attached and an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook receiving every event an EMIT delivers to the host bus
    pub fn on_emit(mut self, hook: impl Fn(&Event) + 'static) -> Self {
        self.emit = Some(Box::new(hook));
        self
    }

    /// Provider of the host state snapshot QUERY selectors read from.
    /// Defaults to `Value::Null`.
    pub fn query_state(mut self, provider: impl Fn() -> Value + 'static) -> Self {
        self.query = Some(Box::new(provider));
        self
    }

    /// Sink for errors escaping a root or detached task
    pub fn on_uncaught(mut self, sink: impl Fn(&SagaError, &str) + 'static) -> Self {
        self.on_uncaught = Some(Box::new(sink));
        self
    }

    /// Attach lifecycle observability hooks
    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Context entries every root task starts with
    pub fn with_context(mut self, context: FxHashMap<String, Value>) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("emit", &self.emit.is_some())
            .field("query", &self.query.is_some())
            .field("on_uncaught", &self.on_uncaught.is_some())
            .field("monitor", &self.monitor.is_some())
            .field("context", &self.context.len())
            .finish()
    }
}

/// One interpreter instance: a root event channel, a dispatch scheduler,
/// and the host hooks, shared by every task it runs.
///
/// Instances are fully independent; ids and state never leak between them.
pub struct Runtime {
    env: Env,
    base_context: FxHashMap<String, Value>,
}

impl Runtime {
    /// Build a runtime from the given host hooks
    pub fn new(options: RuntimeOptions) -> Self {
        let env = Env::new(
            Channel::new(BufferKind::None),
            DispatchScheduler::new(),
            options.emit.unwrap_or_else(|| Box::new(|_| {})),
            options.query.unwrap_or_else(|| Box::new(|| Value::Null)),
            options.on_uncaught.unwrap_or_else(|| Box::new(|_, _| {})),
            options.monitor,
        );
        Self {
            env,
            base_context: options.context,
        }
    }

    /// Start a root task for `body`, driving it synchronously up to its
    /// first suspension. Emits from those first steps are queued until the
    /// start completes.
    pub fn run(&self, body: Box<dyn Saga>) -> Task {
        let name = body.name().to_string();
        let env = self.env.clone();
        let context = self.base_context.clone();
        self.env
            .scheduler()
            .immediately(move || Proc::spawn(env, name, body, context, true))
    }

    /// Feed an external event to the root channel.
    ///
    /// Exactly one matching waiter receives it; with no waiter it is
    /// dropped (the root channel is unbuffered).
    pub fn dispatch(&self, event: Event) {
        let env = self.env.clone();
        self.env.scheduler().asap(move || {
            if let Err(err) = env.channel().put(event) {
                debug!(%err, "event dispatched after close was dropped");
            }
        });
    }

    /// Handle to the root event channel
    pub fn channel(&self) -> Channel {
        self.env.channel()
    }

    /// Close the root channel: pending waits observe end-of-channel and
    /// non-tolerant waiters terminate.
    pub fn close(&self) {
        self.env.channel().close();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("channel", &self.env.channel())
            .finish_non_exhaustive()
    }
}
