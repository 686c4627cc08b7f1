//! The coroutine contract driven by the process driver

use crate::effect::Effect;
use crate::error::SagaError;
use crate::value::Value;

/// What the driver feeds into a saga at each resumption.
#[derive(Debug)]
pub enum Signal {
    /// The previous effect's result (or `Value::Null` on the first step)
    Resume(Value),
    /// The previous effect failed; behave as if the error were thrown at
    /// the suspension point. Handling it here and continuing absorbs it.
    Fail(SagaError),
    /// Forced return: run any finalization effects and finish. Sent on
    /// external cancellation and on end-of-channel termination.
    Return,
}

/// What a saga hands back to the driver from one step.
#[derive(Debug)]
pub enum Step {
    /// Perform this effect and resume me with its outcome
    Effect(Effect),
    /// The body is finished with this value
    Done(Value),
}

/// A resumable unit of logic.
///
/// A saga is an explicit state machine: each `step` consumes the outcome of
/// the previous suspension and either yields the next effect descriptor or
/// finishes. Returning `Err` is an uncaught error and aborts the owning task.
///
/// After receiving [`Signal::Return`] a body may still yield effects (its
/// finalizers) before finishing with [`Step::Done`].
pub trait Saga {
    /// Advance the body by one suspension point
    fn step(&mut self, signal: Signal) -> Result<Step, SagaError>;

    /// Display name used for tasks and diagnostics
    fn name(&self) -> &str {
        "anonymous"
    }
}

struct StepFn<F> {
    name: String,
    f: F,
}

impl<F> Saga for StepFn<F>
where
    F: FnMut(Signal) -> Result<Step, SagaError>,
{
    fn step(&mut self, signal: Signal) -> Result<Step, SagaError> {
        (self.f)(signal)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapt a closure into a boxed saga body.
///
/// The closure owns its own state (step counters, stashed results) and is
/// called once per resumption with the driver's signal.
pub fn saga_fn(
    name: impl Into<String>,
    f: impl FnMut(Signal) -> Result<Step, SagaError> + 'static,
) -> Box<dyn Saga> {
    Box::new(StepFn {
        name: name.into(),
        f,
    })
}
