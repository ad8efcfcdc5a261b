//! Event envelopes and event descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle signal processed first when an actor starts.
pub const INIT_EVENT: &str = "chart.init";

/// Terminal signal processed when an actor stops.
pub const STOP_EVENT: &str = "chart.stop";

/// Raised internally when an action fails during resolution or execution.
pub const ERROR_EXECUTION: &str = "error.execution";

/// Prefix of the event a parent receives when a child fails.
pub const ERROR_PLATFORM_PREFIX: &str = "error.platform.";

/// Prefix of the event raised when a compound or parallel state completes.
pub const DONE_STATE_PREFIX: &str = "done.state.";

/// Prefix of the event a parent receives when a child actor completes.
pub const DONE_ACTOR_PREFIX: &str = "done.actor.";

/// Prefix of the events that drive `after` transitions.
pub const AFTER_PREFIX: &str = "chart.after.";

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Sent from outside the actor, or by another actor.
    #[default]
    External,
    /// Raised by the actor itself.
    Internal,
    /// Produced by the runtime (lifecycle, completion and error signals).
    Platform,
}

/// An event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    #[serde(rename = "type")]
    pub name: String,

    /// Payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Session id of the sending actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
            origin: None,
            kind: EventKind::External,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn internal(name: impl Into<String>, data: Value) -> Self {
        Self::new(name).with_data(data).with_kind(EventKind::Internal)
    }

    pub(crate) fn platform(name: impl Into<String>, data: Value) -> Self {
        Self::new(name).with_data(data).with_kind(EventKind::Platform)
    }

    /// Builds the `done.state.<id>` event for a completed state.
    pub fn done_state(state_id: &str, output: Value) -> Self {
        Self::internal(format!("{DONE_STATE_PREFIX}{state_id}"), output)
    }

    /// Builds the `done.actor.<id>` event for a completed child actor.
    pub fn done_actor(actor_id: &str, output: Value) -> Self {
        Self::platform(format!("{DONE_ACTOR_PREFIX}{actor_id}"), output)
    }

    /// Builds the `error.platform.<id>` event for a failed child actor.
    pub fn error_platform(actor_id: &str, data: Value) -> Self {
        Self::platform(format!("{ERROR_PLATFORM_PREFIX}{actor_id}"), data)
    }

    /// Builds the `error.execution` event raised by a failed action.
    pub fn error_execution(data: Value) -> Self {
        Self::internal(ERROR_EXECUTION, data)
    }

    /// Returns true for error events that fail the actor when unhandled.
    pub fn is_error(&self) -> bool {
        self.name == ERROR_EXECUTION || self.name.starts_with(ERROR_PLATFORM_PREFIX)
    }

    /// Returns true for events produced by the runtime rather than by users.
    pub fn is_builtin(&self) -> bool {
        is_builtin_event(&self.name)
    }

    /// Returns the child id carried by a `done.actor.*` or
    /// `error.platform.*` event.
    pub fn child_completion_id(&self) -> Option<&str> {
        self.name
            .strip_prefix(DONE_ACTOR_PREFIX)
            .or_else(|| self.name.strip_prefix(ERROR_PLATFORM_PREFIX))
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Event::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event::new(name)
    }
}

pub(crate) fn is_builtin_event(name: &str) -> bool {
    name.starts_with("chart.")
        || name == ERROR_EXECUTION
        || name.starts_with(ERROR_PLATFORM_PREFIX)
        || name.starts_with(DONE_STATE_PREFIX)
        || name.starts_with(DONE_ACTOR_PREFIX)
}

/// Event descriptor a transition listens for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventDescriptor {
    /// Matches one event type exactly.
    Exact(String),
    /// `prefix.*`: matches the prefix itself and every dotted extension.
    Partial(String),
    /// `*`: matches every event.
    Wildcard,
    /// Eventless (`always`) transition.
    Eventless,
}

impl EventDescriptor {
    pub fn parse(descriptor: &str) -> Self {
        if descriptor == "*" {
            EventDescriptor::Wildcard
        } else if let Some(prefix) = descriptor.strip_suffix(".*") {
            EventDescriptor::Partial(prefix.to_string())
        } else {
            EventDescriptor::Exact(descriptor.to_string())
        }
    }

    pub fn matches(&self, event: &str) -> bool {
        match self {
            EventDescriptor::Exact(name) => name == event,
            EventDescriptor::Partial(prefix) => {
                event == prefix
                    || (event.starts_with(prefix.as_str())
                        && event[prefix.len()..].starts_with('.'))
            }
            EventDescriptor::Wildcard => true,
            EventDescriptor::Eventless => false,
        }
    }

    /// Length used to rank wildcard descriptors (longest first).
    pub(crate) fn specificity(&self) -> usize {
        match self {
            EventDescriptor::Exact(name) => name.len() + 2,
            EventDescriptor::Partial(prefix) => prefix.len() + 2,
            EventDescriptor::Wildcard => 1,
            EventDescriptor::Eventless => 0,
        }
    }
}

impl std::fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDescriptor::Exact(name) => write!(f, "{name}"),
            EventDescriptor::Partial(prefix) => write!(f, "{prefix}.*"),
            EventDescriptor::Wildcard => write!(f, "*"),
            EventDescriptor::Eventless => write!(f, "(always)"),
        }
    }
}
