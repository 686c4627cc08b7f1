//! Interpreter error types

use crate::channel::ChannelError;
use crate::effect::InvalidEffectArgument;

/// An error raised while executing an effect or by a saga body.
///
/// Cancellation is deliberately *not* a `SagaError`: the driver threads it
/// through a distinct signal so a cancelled task can never be mistaken for a
/// failed one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SagaError {
    /// A domain failure thrown by an invoked callable, selector, or saga body
    #[error("{0}")]
    Failure(String),

    /// A put failed: the target channel was closed or its buffer overflowed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// An effect descriptor was constructed with invalid arguments
    #[error(transparent)]
    InvalidEffect(#[from] InvalidEffectArgument),
}

impl SagaError {
    /// Shorthand for a domain failure
    pub fn failure(message: impl Into<String>) -> Self {
        SagaError::Failure(message.into())
    }
}
