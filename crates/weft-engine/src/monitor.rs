//! Observability hooks over effect and event lifecycles
//!
//! A monitor is attached at runtime construction and notified as effects
//! trigger, settle, or are cancelled, and as events reach the host bus.
//! Hooks observe; they cannot alter outcomes.

use crate::effect::EffectTag;
use crate::error::SagaError;
use crate::value::{Event, Value};
use std::fmt;

/// Identity of a triggered effect, handed to monitor hooks.
#[derive(Debug, Clone)]
pub struct EffectRef {
    /// Unique id within the owning runtime; settlement hooks receive it back
    pub effect_id: u64,
    /// Name of the task that yielded the effect
    pub task: String,
    /// Which effect was yielded
    pub tag: EffectTag,
}

/// Lifecycle hooks, all optional. Build with the `on_*` methods.
#[derive(Default)]
pub struct Monitor {
    effect_triggered: Option<Box<dyn Fn(&EffectRef)>>,
    effect_resolved: Option<Box<dyn Fn(u64, &Value)>>,
    effect_rejected: Option<Box<dyn Fn(u64, &SagaError)>>,
    effect_cancelled: Option<Box<dyn Fn(u64)>>,
    event_emitted: Option<Box<dyn Fn(&Event)>>,
}

impl Monitor {
    /// A monitor with no hooks attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a task yields an effect to the driver
    pub fn on_effect_triggered(mut self, hook: impl Fn(&EffectRef) + 'static) -> Self {
        self.effect_triggered = Some(Box::new(hook));
        self
    }

    /// Called when an effect settles with a value
    pub fn on_effect_resolved(mut self, hook: impl Fn(u64, &Value) + 'static) -> Self {
        self.effect_resolved = Some(Box::new(hook));
        self
    }

    /// Called when an effect settles with an error
    pub fn on_effect_rejected(mut self, hook: impl Fn(u64, &SagaError) + 'static) -> Self {
        self.effect_rejected = Some(Box::new(hook));
        self
    }

    /// Called when a pending effect is cancelled
    pub fn on_effect_cancelled(mut self, hook: impl Fn(u64) + 'static) -> Self {
        self.effect_cancelled = Some(Box::new(hook));
        self
    }

    /// Called when EMIT delivers an event to the host bus
    pub fn on_event_emitted(mut self, hook: impl Fn(&Event) + 'static) -> Self {
        self.event_emitted = Some(Box::new(hook));
        self
    }

    pub(crate) fn notify_triggered(&self, effect: &EffectRef) {
        if let Some(hook) = &self.effect_triggered {
            hook(effect);
        }
    }

    pub(crate) fn notify_resolved(&self, effect_id: u64, value: &Value) {
        if let Some(hook) = &self.effect_resolved {
            hook(effect_id, value);
        }
    }

    pub(crate) fn notify_rejected(&self, effect_id: u64, error: &SagaError) {
        if let Some(hook) = &self.effect_rejected {
            hook(effect_id, error);
        }
    }

    pub(crate) fn notify_cancelled(&self, effect_id: u64) {
        if let Some(hook) = &self.effect_cancelled {
            hook(effect_id);
        }
    }

    pub(crate) fn notify_emitted(&self, event: &Event) {
        if let Some(hook) = &self.event_emitted {
            hook(event);
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("effect_triggered", &self.effect_triggered.is_some())
            .field("effect_resolved", &self.effect_resolved.is_some())
            .field("effect_rejected", &self.effect_rejected.is_some())
            .field("effect_cancelled", &self.effect_cancelled.is_some())
            .field("event_emitted", &self.event_emitted.is_some())
            .finish()
    }
}
