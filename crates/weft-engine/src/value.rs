//! Dynamic values and events threaded through effects and resumptions

use crate::channel::Channel;
use crate::task::Task;
use rustc_hash::FxHashMap;

/// An event carried by channels and matched by patterns.
///
/// Events are plain data: a tag identifying the kind of event and an
/// arbitrary payload. The interpreter never interprets the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Tag identifying the kind of event
    pub tag: String,

    /// Arbitrary payload attached by the producer
    pub payload: Value,
}

impl Event {
    /// Create an event with a null payload
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            payload: Value::Null,
        }
    }

    /// Create an event with a payload
    pub fn with_payload(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }
}

/// A dynamic value.
///
/// Effect payloads, effect results, task results, and event payloads are all
/// `Value`s. Runtime handles (tasks, channels) are first-class so that FORK
/// can resolve with the child task and DERIVE_CHANNEL with the new channel.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value; also the initial resumption fed to a saga
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
    /// Ordered list of values
    List(Vec<Value>),
    /// Keyed map of values
    Map(FxHashMap<String, Value>),
    /// An event, as delivered by WAIT
    Event(Box<Event>),
    /// A task handle, as delivered by FORK
    Task(Task),
    /// A channel handle, as delivered by DERIVE_CHANNEL
    Channel(Channel),
    /// End-of-channel marker, as delivered to end-tolerant waits
    End,
}

impl Value {
    /// Shorthand for a string value
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Shorthand for an event value
    pub fn event(ev: Event) -> Self {
        Value::Event(Box::new(ev))
    }

    /// View this value as an event, if it is one
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Value::Event(ev) => Some(ev),
            _ => None,
        }
    }

    /// View this value as a task handle, if it is one
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Value::Task(task) => Some(task),
            _ => None,
        }
    }

    /// View this value as a channel handle, if it is one
    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            Value::Channel(chan) => Some(chan),
            _ => None,
        }
    }

    /// Whether this value is the end-of-channel marker
    pub fn is_end(&self) -> bool {
        matches!(self, Value::End)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Event(a), Value::Event(b)) => a == b,
            // Task handles compare by identity
            (Value::Task(a), Value::Task(b)) => a.id() == b.id(),
            (Value::Channel(a), Value::Channel(b)) => a.same_channel(b),
            (Value::End, Value::End) => true,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Event> for Value {
    fn from(ev: Event) -> Self {
        Value::Event(Box::new(ev))
    }
}
