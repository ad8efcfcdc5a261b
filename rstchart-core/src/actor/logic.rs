//! Actor logics and the scope they run in.

use super::actor_ref::{ActorCell, CellSpec};
use super::system::System;
use super::ActorRef;
use crate::action::{Destination, Effect};
use crate::error::{ActionError, ActorError};
use crate::event::Event;
use crate::snapshot::{MachineSnapshot, PersistedSnapshot, SnapshotStatus};
use serde_json::Value;
use std::sync::Arc;

/// Behavior of an actor: how it starts, reacts to events, stops and is
/// persisted.
///
/// Logics are shared between every actor created from them and must not
/// hold per-actor state; all of it lives in the [`ActorSnapshot`].
pub trait ActorLogic: Send + Sync {
    /// Short name used in logs and errors.
    fn kind(&self) -> &'static str;

    fn initial_snapshot(
        &self,
        scope: &mut ActorScope,
        input: &Value,
    ) -> Result<ActorSnapshot, ActorError>;

    fn transition(
        &self,
        snapshot: &ActorSnapshot,
        event: &Event,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError>;

    /// Runs when the actor starts. `None` keeps the snapshot as is.
    fn start(
        &self,
        _snapshot: &ActorSnapshot,
        _scope: &mut ActorScope,
    ) -> Result<Option<ActorSnapshot>, ActorError> {
        Ok(None)
    }

    /// Checked on every `send` before the event is queued.
    fn accepts(&self, _event: &Event) -> Result<(), ActorError> {
        Ok(())
    }

    fn stop(
        &self,
        snapshot: &ActorSnapshot,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError>;

    fn persist(&self, snapshot: &ActorSnapshot) -> Result<PersistedSnapshot, ActorError>;

    fn restore(
        &self,
        persisted: &PersistedSnapshot,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError>;
}

/// Snapshot of any actor.
#[derive(Debug, Clone)]
pub enum ActorSnapshot {
    Machine(MachineSnapshot),
    Value(ValueSnapshot),
}

impl ActorSnapshot {
    pub fn status(&self) -> SnapshotStatus {
        match self {
            ActorSnapshot::Machine(s) => s.status,
            ActorSnapshot::Value(s) => s.status,
        }
    }

    pub fn context(&self) -> &Value {
        match self {
            ActorSnapshot::Machine(s) => &s.context,
            ActorSnapshot::Value(s) => &s.context,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            ActorSnapshot::Machine(s) => s.output.as_ref(),
            ActorSnapshot::Value(s) => s.output.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&Value> {
        match self {
            ActorSnapshot::Machine(s) => s.error.as_ref(),
            ActorSnapshot::Value(s) => s.error.as_ref(),
        }
    }

    pub fn as_machine(&self) -> Option<&MachineSnapshot> {
        match self {
            ActorSnapshot::Machine(s) => Some(s),
            ActorSnapshot::Value(_) => None,
        }
    }

    /// Returns true if this is a machine snapshot whose value contains
    /// `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.as_machine().is_some_and(|s| s.matches(path))
    }

    pub fn children(&self) -> Vec<ActorRef> {
        match self {
            ActorSnapshot::Machine(s) => s.children.values().cloned().collect(),
            ActorSnapshot::Value(_) => Vec::new(),
        }
    }

    pub(crate) fn has_child(&self, child: &ActorRef) -> bool {
        match self {
            ActorSnapshot::Machine(s) => s.children.values().any(|c| c == child),
            ActorSnapshot::Value(_) => false,
        }
    }

    pub(crate) fn failed(self, data: Value) -> Self {
        match self {
            ActorSnapshot::Machine(mut s) => {
                s.status = SnapshotStatus::Error;
                s.error = Some(data);
                ActorSnapshot::Machine(s)
            }
            ActorSnapshot::Value(mut s) => {
                s.status = SnapshotStatus::Error;
                s.error = Some(data);
                ActorSnapshot::Value(s)
            }
        }
    }

    pub(crate) fn stopped(self) -> Self {
        match self {
            ActorSnapshot::Machine(mut s) => {
                s.status = SnapshotStatus::Stopped;
                ActorSnapshot::Machine(s)
            }
            ActorSnapshot::Value(mut s) => {
                s.status = SnapshotStatus::Stopped;
                ActorSnapshot::Value(s)
            }
        }
    }
}

/// Snapshot of a non-machine logic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueSnapshot {
    pub status: SnapshotStatus,
    pub context: Value,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub input: Value,
}

impl ValueSnapshot {
    fn persist(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            status: self.status,
            context: self.context.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            input: self.input.clone(),
            ..Default::default()
        }
    }

    fn restore(persisted: &PersistedSnapshot) -> Self {
        Self {
            status: persisted.status,
            context: persisted.context.clone(),
            output: persisted.output.clone(),
            error: persisted.error.clone(),
            input: persisted.input.clone(),
        }
    }
}

/// Where a logic runs: the owning actor's identity, its system, and the
/// effects produced by the current step.
pub struct ActorScope {
    pub(crate) system: System,
    pub(crate) session_id: String,
    pub(crate) id: String,
    pub(crate) parent: Option<String>,
    pub(crate) effects: Vec<Effect>,
}

impl ActorScope {
    pub(crate) fn new(
        system: System,
        session_id: String,
        id: String,
        parent: Option<String>,
    ) -> Self {
        Self {
            system,
            session_id,
            id,
            parent,
            effects: Vec::new(),
        }
    }

    /// A scope that is not bound to a running actor, for driving a logic
    /// directly. Effects accumulate and are never run.
    pub fn detached(system: &System, id: impl Into<String>) -> Self {
        Self::new(system.clone(), system.next_session_id(), id.into(), None)
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session id of the parent actor, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Sends an event to the parent once the current step commits. Returns
    /// false for a root actor.
    pub fn send_parent(&mut self, event: impl Into<Event>) -> bool {
        let Some(parent) = self.parent.clone() else {
            return false;
        };
        let event = event.into().with_origin(self.session_id.clone());
        self.effects.push(Effect::Send {
            to: Destination::Session(parent),
            event,
            delay: None,
            id: None,
        });
        true
    }

    /// Sends an event to `actor` once the current step commits.
    pub fn send_to(&mut self, actor: &ActorRef, event: impl Into<Event>) {
        let event = event.into().with_origin(self.session_id.clone());
        self.effects.push(Effect::Send {
            to: Destination::Actor(actor.clone()),
            event,
            delay: None,
            id: None,
        });
    }

    pub fn pending_effects(&self) -> usize {
        self.effects.len()
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Creates a child of this actor. The child is not started.
    pub(crate) fn spawn_child(
        &mut self,
        logic: Arc<dyn ActorLogic>,
        spec: ChildSpec<'_>,
    ) -> Result<ActorRef, ActorError> {
        ActorCell::create(
            self.system.clone(),
            logic,
            CellSpec {
                id: spec.id,
                parent: Some(self.session_id.clone()),
                src: spec.src,
                system_id: spec.system_id,
                input: spec.input,
                snapshot: spec.snapshot,
            },
        )
    }
}

/// Options for a child created by a machine.
pub(crate) struct ChildSpec<'a> {
    /// Defaults to the child's session id.
    pub id: Option<&'a str>,
    /// Implementation key, kept for persistence.
    pub src: Option<&'a str>,
    pub system_id: Option<&'a str>,
    pub input: &'a Value,
    pub snapshot: Option<&'a PersistedSnapshot>,
}

pub type ReducerFn = Arc<dyn Fn(&Value, &Event, &mut ActorScope) -> Value + Send + Sync>;
pub type InitFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A reducer over a JSON state.
#[derive(Clone)]
pub struct TransitionLogic {
    reducer: ReducerFn,
    initial: InitFn,
}

impl TransitionLogic {
    pub fn new<F>(initial: Value, reducer: F) -> Self
    where
        F: Fn(&Value, &Event, &mut ActorScope) -> Value + Send + Sync + 'static,
    {
        Self {
            reducer: Arc::new(reducer),
            initial: Arc::new(move |_: &Value| initial.clone()),
        }
    }

    /// Computes the initial state from the actor's input.
    pub fn with_input<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.initial = Arc::new(f);
        self
    }
}

impl ActorLogic for TransitionLogic {
    fn kind(&self) -> &'static str {
        "transition"
    }

    fn initial_snapshot(
        &self,
        _scope: &mut ActorScope,
        input: &Value,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(ActorSnapshot::Value(ValueSnapshot {
            context: (self.initial)(input),
            input: input.clone(),
            ..Default::default()
        }))
    }

    fn transition(
        &self,
        snapshot: &ActorSnapshot,
        event: &Event,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        let ActorSnapshot::Value(current) = snapshot else {
            return Err(ActorError::SnapshotMismatch { logic: self.kind() });
        };
        let mut next = current.clone();
        if next.status == SnapshotStatus::Active {
            next.context = (self.reducer)(&current.context, event, scope);
        }
        Ok(ActorSnapshot::Value(next))
    }

    fn stop(
        &self,
        snapshot: &ActorSnapshot,
        _scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(snapshot.clone().stopped())
    }

    fn persist(&self, snapshot: &ActorSnapshot) -> Result<PersistedSnapshot, ActorError> {
        match snapshot {
            ActorSnapshot::Value(s) => Ok(s.persist()),
            ActorSnapshot::Machine(_) => Err(ActorError::SnapshotMismatch { logic: self.kind() }),
        }
    }

    fn restore(
        &self,
        persisted: &PersistedSnapshot,
        _scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(ActorSnapshot::Value(ValueSnapshot::restore(persisted)))
    }
}

pub type TaskFn = Arc<dyn Fn(&Value, &mut ActorScope) -> Result<Value, ActionError> + Send + Sync>;

/// A fallible function of the actor's input, run once when the actor
/// starts. The actor is done with the returned value as output, or fails
/// with the error.
#[derive(Clone)]
pub struct TaskLogic {
    task: TaskFn,
}

impl TaskLogic {
    pub fn new<F>(task: F) -> Self
    where
        F: Fn(&Value, &mut ActorScope) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        Self {
            task: Arc::new(task),
        }
    }
}

impl ActorLogic for TaskLogic {
    fn kind(&self) -> &'static str {
        "task"
    }

    fn initial_snapshot(
        &self,
        _scope: &mut ActorScope,
        input: &Value,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(ActorSnapshot::Value(ValueSnapshot {
            input: input.clone(),
            ..Default::default()
        }))
    }

    fn transition(
        &self,
        snapshot: &ActorSnapshot,
        _event: &Event,
        _scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(snapshot.clone())
    }

    fn start(
        &self,
        snapshot: &ActorSnapshot,
        scope: &mut ActorScope,
    ) -> Result<Option<ActorSnapshot>, ActorError> {
        let ActorSnapshot::Value(current) = snapshot else {
            return Err(ActorError::SnapshotMismatch { logic: self.kind() });
        };
        if current.status != SnapshotStatus::Active {
            return Ok(None);
        }
        let mut next = current.clone();
        match (self.task)(&current.input, scope) {
            Ok(output) => {
                next.status = SnapshotStatus::Done;
                next.output = Some(output);
            }
            Err(e) => {
                tracing::debug!(actor = %scope.id, error = %e, "task failed");
                next.status = SnapshotStatus::Error;
                next.error = Some(e.to_event_data());
            }
        }
        Ok(Some(ActorSnapshot::Value(next)))
    }

    fn stop(
        &self,
        snapshot: &ActorSnapshot,
        _scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(snapshot.clone().stopped())
    }

    fn persist(&self, snapshot: &ActorSnapshot) -> Result<PersistedSnapshot, ActorError> {
        match snapshot {
            ActorSnapshot::Value(s) => Ok(s.persist()),
            ActorSnapshot::Machine(_) => Err(ActorError::SnapshotMismatch { logic: self.kind() }),
        }
    }

    fn restore(
        &self,
        persisted: &PersistedSnapshot,
        _scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        Ok(ActorSnapshot::Value(ValueSnapshot::restore(persisted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use serde_json::json;

    fn scope() -> (System, ActorScope) {
        let system = System::new(RuntimeConfig::default());
        let scope = ActorScope::detached(&system, "test");
        (system, scope)
    }

    #[test]
    fn test_transition_logic_reduces() {
        let (_system, mut scope) = scope();
        let logic = TransitionLogic::new(json!({"n": 0}), |state, event, _| {
            let n = state["n"].as_i64().unwrap_or(0);
            match event.name.as_str() {
                "INC" => json!({"n": n + 1}),
                _ => state.clone(),
            }
        });

        let s0 = logic.initial_snapshot(&mut scope, &Value::Null).unwrap();
        let s1 = logic.transition(&s0, &Event::new("INC"), &mut scope).unwrap();
        let s2 = logic.transition(&s1, &Event::new("NOPE"), &mut scope).unwrap();
        assert_eq!(s2.context(), &json!({"n": 1}));

        let persisted = logic.persist(&s2).unwrap();
        let back = logic.restore(&persisted, &mut scope).unwrap();
        assert_eq!(back.context(), &json!({"n": 1}));
    }

    #[test]
    fn test_transition_logic_from_input() {
        let (_system, mut scope) = scope();
        let logic = TransitionLogic::new(json!(0), |s, _, _| s.clone())
            .with_input(|input| json!(input["start"].as_i64().unwrap_or(0)));

        let snapshot = logic.initial_snapshot(&mut scope, &json!({"start": 5})).unwrap();
        assert_eq!(snapshot.context(), &json!(5));
    }

    #[test]
    fn test_task_logic_resolves_on_start() {
        let (_system, mut scope) = scope();
        let ok = TaskLogic::new(|input, _| Ok(json!(input.as_i64().unwrap_or(0) * 2)));
        let s0 = ok.initial_snapshot(&mut scope, &json!(21)).unwrap();
        let done = ok.start(&s0, &mut scope).unwrap().unwrap();
        assert_eq!(done.status(), SnapshotStatus::Done);
        assert_eq!(done.output(), Some(&json!(42)));
        assert!(ok.start(&done, &mut scope).unwrap().is_none());

        let failing = TaskLogic::new(|_, _| Err(ActionError::new("boom")));
        let s0 = failing.initial_snapshot(&mut scope, &Value::Null).unwrap();
        let failed = failing.start(&s0, &mut scope).unwrap().unwrap();
        assert_eq!(failed.status(), SnapshotStatus::Error);
        assert!(failed.error().is_some());
    }

    #[test]
    fn test_send_parent_from_root_scope() {
        let (_system, mut scope) = scope();
        assert!(!scope.send_parent("HELLO"));
        assert_eq!(scope.pending_effects(), 0);
    }
}
