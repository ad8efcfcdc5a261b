//! Action descriptors, executed-action records and deferred effects.
//!
//! Actions form a closed set of variants. Each one is resolved against the
//! current `(context, event)` by the interpreter into a context update, an
//! internally raised event, or a deferred [`Effect`] that the owning actor
//! runs once the microstep has been committed.

use crate::actor::{ActorLogic, ActorRef};
use crate::error::ActionError;
use crate::event::Event;
use crate::guard::Guard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Arguments passed to action closures.
pub struct ActionArgs<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    /// Parameters attached to a named action reference.
    pub params: &'a Value,
}

/// Context reducer. An `Err` is raised as `error.execution`.
pub type AssignFn = Arc<dyn Fn(&ActionArgs<'_>) -> Result<Value, ActionError> + Send + Sync>;

/// Computes a value from the context and event.
pub type ExprFn = Arc<dyn Fn(&ActionArgs<'_>) -> Value + Send + Sync>;

/// Computes an event from the context and event.
pub type EventFn = Arc<dyn Fn(&ActionArgs<'_>) -> Event + Send + Sync>;

/// Builds a list of actions that is spliced into the pipeline.
pub type EnqueueFn = Arc<dyn Fn(&ActionArgs<'_>) -> Vec<Action> + Send + Sync>;

/// A side-effecting action run after the microstep commits.
pub type ExecFn = Arc<dyn Fn(&ActionArgs<'_>) -> Result<(), ActionError> + Send + Sync>;

/// Computes a delay in milliseconds.
pub type DelayFn = Arc<dyn Fn(&ActionArgs<'_>) -> u64 + Send + Sync>;

/// A value that is either fixed or computed when the action is resolved.
#[derive(Clone)]
pub enum ValueExpr {
    Static(Value),
    Dynamic(ExprFn),
}

impl ValueExpr {
    pub(crate) fn evaluate(&self, args: &ActionArgs<'_>) -> Value {
        match self {
            ValueExpr::Static(value) => value.clone(),
            ValueExpr::Dynamic(f) => f(args),
        }
    }
}

impl From<Value> for ValueExpr {
    fn from(value: Value) -> Self {
        ValueExpr::Static(value)
    }
}

/// An event that is either fixed or computed when the action is resolved.
#[derive(Clone)]
pub enum EventExpr {
    Static(Event),
    Dynamic(EventFn),
}

impl EventExpr {
    pub(crate) fn evaluate(&self, args: &ActionArgs<'_>) -> Event {
        match self {
            EventExpr::Static(event) => event.clone(),
            EventExpr::Dynamic(f) => f(args),
        }
    }
}

impl From<Event> for EventExpr {
    fn from(event: Event) -> Self {
        EventExpr::Static(event)
    }
}

impl From<&str> for EventExpr {
    fn from(name: &str) -> Self {
        EventExpr::Static(Event::new(name))
    }
}

impl From<String> for EventExpr {
    fn from(name: String) -> Self {
        EventExpr::Static(Event::new(name))
    }
}

/// How an `assign` action computes the next context.
#[derive(Clone)]
pub enum Assignment {
    /// Replaces the whole context.
    Reducer(AssignFn),
    /// Updates individual top-level keys, in order.
    Keys(Vec<(String, Assigner)>),
}

/// Computes one context key.
#[derive(Clone)]
pub enum Assigner {
    Static(Value),
    Dynamic(AssignFn),
}

/// Delay of a delayed raise or send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    /// Milliseconds.
    Ms(u64),
    /// Looked up in the machine's delay implementations.
    Named(String),
}

impl Delay {
    /// Parses an `after` key: a number of milliseconds or a delay name.
    pub fn parse(key: &str) -> Self {
        key.parse::<u64>()
            .map(Delay::Ms)
            .unwrap_or_else(|_| Delay::Named(key.to_string()))
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delay::Ms(ms) => write!(f, "{ms}"),
            Delay::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Recipient of a `sendTo` action.
#[derive(Clone, Debug)]
pub enum SendTarget {
    /// The actor that spawned this one.
    Parent,
    /// This actor, through its mailbox.
    SelfActor,
    /// A child by id.
    Child(String),
    /// An actor registered under a system id.
    System(String),
    /// A specific actor.
    Ref(ActorRef),
}

impl SendTarget {
    /// Parses a target string: `#_parent`, `#_internal`, `#_<childId>` or a
    /// plain child id.
    pub fn parse(target: &str) -> Self {
        match target {
            "#_parent" => SendTarget::Parent,
            "#_internal" | "#_self" => SendTarget::SelfActor,
            other => SendTarget::Child(other.strip_prefix("#_").unwrap_or(other).to_string()),
        }
    }
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendTarget::Parent => f.write_str("#_parent"),
            SendTarget::SelfActor => f.write_str("#_internal"),
            SendTarget::Child(id) => write!(f, "{id}"),
            SendTarget::System(id) => write!(f, "system:{id}"),
            SendTarget::Ref(actor) => write!(f, "{}", actor.session_id()),
        }
    }
}

/// Where a spawned actor's logic comes from.
#[derive(Clone)]
pub enum LogicSource {
    /// Looked up in the machine's actor implementations.
    Key(String),
    Inline(Arc<dyn ActorLogic>),
}

/// One guarded branch of a `choose` action.
#[derive(Clone, Debug)]
pub struct ChooseBranch {
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
}

/// An action descriptor.
#[derive(Clone)]
pub enum Action {
    /// Looked up by name in the machine's implementations.
    Named { name: String, params: Value },
    Assign(Assignment),
    /// Without a delay the event goes to the internal queue; with a delay it
    /// becomes a scheduled send to self.
    Raise {
        event: EventExpr,
        delay: Option<Delay>,
        id: Option<String>,
    },
    SendTo {
        to: SendTarget,
        event: EventExpr,
        delay: Option<Delay>,
        id: Option<String>,
    },
    Log {
        label: Option<String>,
        value: Option<ValueExpr>,
    },
    Spawn {
        src: LogicSource,
        id: Option<String>,
        system_id: Option<String>,
        input: ValueExpr,
    },
    /// Stops a child by id.
    Stop(String),
    /// Cancels a delayed send or raise by id.
    Cancel(String),
    Choose(Vec<ChooseBranch>),
    Enqueue(EnqueueFn),
    Custom(ExecFn),
}

impl Action {
    pub fn named(name: impl Into<String>) -> Self {
        Action::Named {
            name: name.into(),
            params: Value::Null,
        }
    }

    pub fn assign<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        Action::Assign(Assignment::Reducer(Arc::new(f)))
    }

    /// Assigns one context key from a closure.
    pub fn assign_key<F>(key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        Action::Assign(Assignment::Keys(vec![(
            key.into(),
            Assigner::Dynamic(Arc::new(f)),
        )]))
    }

    pub fn raise(event: impl Into<EventExpr>) -> Self {
        Action::Raise {
            event: event.into(),
            delay: None,
            id: None,
        }
    }

    pub fn send_to(to: SendTarget, event: impl Into<EventExpr>) -> Self {
        Action::SendTo {
            to,
            event: event.into(),
            delay: None,
            id: None,
        }
    }

    pub fn send_parent(event: impl Into<EventExpr>) -> Self {
        Self::send_to(SendTarget::Parent, event)
    }

    /// Builds the event to send from the context and the current event.
    pub fn send_to_with<F>(to: SendTarget, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Event + Send + Sync + 'static,
    {
        Self::send_to(to, EventExpr::Dynamic(Arc::new(f)))
    }

    /// Sets the delay of a `raise` or `sendTo` action. Other actions are
    /// returned unchanged.
    pub fn with_delay(mut self, delay: Delay) -> Self {
        match &mut self {
            Action::Raise { delay: d, .. } | Action::SendTo { delay: d, .. } => *d = Some(delay),
            _ => {}
        }
        self
    }

    /// Sets the cancellation id of a `raise` or `sendTo` action.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Action::Raise { id: i, .. } | Action::SendTo { id: i, .. } => *i = Some(id.into()),
            _ => {}
        }
        self
    }

    pub fn log(label: impl Into<String>) -> Self {
        Action::Log {
            label: Some(label.into()),
            value: None,
        }
    }

    pub fn spawn_child(src: impl Into<String>, id: impl Into<String>) -> Self {
        Action::Spawn {
            src: LogicSource::Key(src.into()),
            id: Some(id.into()),
            system_id: None,
            input: ValueExpr::Static(Value::Null),
        }
    }

    pub fn spawn_inline(logic: Arc<dyn ActorLogic>, id: impl Into<String>) -> Self {
        Action::Spawn {
            src: LogicSource::Inline(logic),
            id: Some(id.into()),
            system_id: None,
            input: ValueExpr::Static(Value::Null),
        }
    }

    pub fn stop_child(id: impl Into<String>) -> Self {
        Action::Stop(id.into())
    }

    pub fn cancel(id: impl Into<String>) -> Self {
        Action::Cancel(id.into())
    }

    /// Runs the actions of the first branch whose guard passes.
    pub fn choose(branches: Vec<ChooseBranch>) -> Self {
        Action::Choose(branches)
    }

    pub fn enqueue<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Vec<Action> + Send + Sync + 'static,
    {
        Action::Enqueue(Arc::new(f))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Action::Custom(Arc::new(f))
    }

    /// Kind recorded in [`ExecutedAction::kind`].
    pub fn kind(&self) -> &str {
        match self {
            Action::Named { name, .. } => name,
            Action::Assign(_) => "assign",
            Action::Raise { .. } => "raise",
            Action::SendTo { .. } => "sendTo",
            Action::Log { .. } => "log",
            Action::Spawn { .. } => "spawnChild",
            Action::Stop(_) => "stopChild",
            Action::Cancel(_) => "cancel",
            Action::Choose(_) => "choose",
            Action::Enqueue(_) => "enqueueActions",
            Action::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Named { name, params } => f
                .debug_struct("Named")
                .field("name", name)
                .field("params", params)
                .finish(),
            Action::Raise { delay, id, .. } => f
                .debug_struct("Raise")
                .field("delay", delay)
                .field("id", id)
                .finish_non_exhaustive(),
            Action::SendTo { to, delay, id, .. } => f
                .debug_struct("SendTo")
                .field("to", to)
                .field("delay", delay)
                .field("id", id)
                .finish_non_exhaustive(),
            Action::Log { label, .. } => f.debug_struct("Log").field("label", label).finish(),
            Action::Spawn { id, system_id, .. } => f
                .debug_struct("Spawn")
                .field("id", id)
                .field("system_id", system_id)
                .finish_non_exhaustive(),
            Action::Stop(id) => f.debug_tuple("Stop").field(id).finish(),
            Action::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            Action::Choose(branches) => f.debug_tuple("Choose").field(branches).finish(),
            other => write!(f, "{}(..)", other.kind()),
        }
    }
}

/// Record of a resolved action, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl ExecutedAction {
    pub(crate) fn new(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// Resolved recipient of a send.
#[derive(Debug, Clone)]
pub(crate) enum Destination {
    /// Resolved through the system registry when the effect runs.
    Session(String),
    Actor(ActorRef),
}

/// A side effect produced during a microstep, run by the owning actor after
/// the resulting snapshot has been committed.
#[derive(Clone)]
pub(crate) enum Effect {
    Send {
        to: Destination,
        event: Event,
        delay: Option<u64>,
        id: Option<String>,
    },
    Start(ActorRef),
    Stop(ActorRef),
    Cancel(String),
    Log {
        label: Option<String>,
        value: Value,
    },
    Exec {
        name: String,
        exec: ExecFn,
        context: Value,
        event: Event,
        params: Value,
    },
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Send {
                to,
                event,
                delay,
                id,
            } => f
                .debug_struct("Send")
                .field("to", to)
                .field("event", &event.name)
                .field("delay", delay)
                .field("id", id)
                .finish(),
            Effect::Start(actor) => f.debug_tuple("Start").field(&actor.id()).finish(),
            Effect::Stop(actor) => f.debug_tuple("Stop").field(&actor.id()).finish(),
            Effect::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            Effect::Log { label, value } => f
                .debug_struct("Log")
                .field("label", label)
                .field("value", value)
                .finish(),
            Effect::Exec { name, .. } => f.debug_struct("Exec").field("name", name).finish(),
        }
    }
}
