//! Event patterns and the predicate they compile to

use crate::value::Event;
use std::fmt;
use std::rc::Rc;

/// A pattern selecting events for WAIT and DERIVE_CHANNEL.
///
/// Matching is pure: a pattern never mutates the event or any shared state.
#[derive(Clone)]
pub enum Pattern {
    /// Matches every event
    Any,
    /// Matches events whose tag equals the given tag
    Tag(String),
    /// Matches if any sub-pattern matches, short-circuiting
    AnyOf(Vec<Pattern>),
    /// Matches events the predicate accepts
    Predicate(Rc<dyn Fn(&Event) -> bool>),
}

impl Pattern {
    /// Shorthand for a tag-equality pattern
    pub fn tag(tag: impl Into<String>) -> Self {
        Pattern::Tag(tag.into())
    }

    /// Shorthand for a predicate pattern
    pub fn predicate(f: impl Fn(&Event) -> bool + 'static) -> Self {
        Pattern::Predicate(Rc::new(f))
    }

    /// Test an event against this pattern
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Tag(tag) => event.tag == *tag,
            Pattern::AnyOf(patterns) => patterns.iter().any(|p| p.matches(event)),
            Pattern::Predicate(pred) => pred(event),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => write!(f, "Any"),
            Pattern::Tag(tag) => f.debug_tuple("Tag").field(tag).finish(),
            Pattern::AnyOf(patterns) => f.debug_tuple("AnyOf").field(patterns).finish(),
            Pattern::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}
