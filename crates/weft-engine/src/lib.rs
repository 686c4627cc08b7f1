//! Weft Effect Engine
//!
//! A single-threaded interpreter for coroutine-based effect handling:
//! coroutines yield effect *descriptors* (plain data), and the engine
//! executes them — waiting on events, emitting to the host, invoking
//! callables, forking structured child tasks, racing branches, and more.
//!
//! - **Effects**: the descriptor algebra and constructors (`effect` module)
//! - **Sagas**: the resumable coroutine contract (`saga` module)
//! - **Channels**: buffered single-delivery event plumbing (`channel`,
//!   `buffer`, `matcher` modules)
//! - **Runtime**: the host-facing surface (`runtime` module)
//! - **Helpers**: worker patterns like `take_every` (`helpers` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_engine::{effect, saga_fn, Pattern, Runtime, RuntimeOptions, Step, Value};
//!
//! let rt = Runtime::new(RuntimeOptions::new());
//! let mut waited = false;
//! rt.run(saga_fn("greeter", move |_signal| {
//!     if !waited {
//!         waited = true;
//!         return Ok(Step::Effect(effect::wait(Pattern::tag("HELLO"))?));
//!     }
//!     Ok(Step::Done(Value::Null))
//! }));
//! rt.dispatch(weft_engine::Event::new("HELLO"));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Buffer policies backing channels
pub mod buffer;

/// Channels: take/put/flush/close event plumbing
pub mod channel;

/// Settle-once asynchronous results for INVOKE targets
pub mod deferred;

/// The reentrant dispatch scheduler
pub mod dispatch;

/// The effect descriptor algebra and constructors
pub mod effect;

/// Interpreter error types
pub mod error;

/// Worker patterns built from the primitive effects
pub mod helpers;

/// Event patterns matched by WAIT and DERIVE_CHANNEL
pub mod matcher;

/// Observability hooks over effect lifecycles
pub mod monitor;

/// The host-facing runtime surface
pub mod runtime;

/// The resumable coroutine contract
pub mod saga;

/// Task handles and lifecycle states
pub mod task;

/// Dynamic values and events
pub mod value;

mod driver;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::{BufferKind, BufferOverflow};
pub use channel::{Channel, ChannelError, TakeHandle, TakeOutcome};
pub use deferred::Deferred;
pub use driver::cb::CpsHandle;
pub use effect::{
    Branches, CallFn, CallOutcome, CpsFn, Effect, EffectTag, InvalidEffectArgument, SagaFactory,
    Selector,
};
pub use error::SagaError;
pub use matcher::Pattern;
pub use monitor::{EffectRef, Monitor};
pub use runtime::{Runtime, RuntimeOptions};
pub use saga::{saga_fn, Saga, Signal, Step};
pub use task::{Task, TaskId, TaskOutcome, TaskStatus};
pub use value::{Event, Value};
