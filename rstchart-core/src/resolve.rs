//! Action resolution.
//!
//! Actions run strictly in order: each one observes the context produced by
//! the actions before it. Context updates and raised events apply at once;
//! everything that touches other actors is recorded as an [`Effect`] and run
//! by the owning actor after the step commits.

use crate::action::{
    Action, ActionArgs, Assigner, Assignment, Delay, Destination, Effect, ExecFn,
    ExecutedAction, LogicSource, SendTarget, ValueExpr,
};
use crate::actor::{ActorScope, ChildSpec};
use crate::configuration::{self, Configuration};
use crate::definition::MachineDefinition;
use crate::error::{ActionError, ActorError};
use crate::event::{Event, EventKind};
use crate::guard::{Guard, GuardEvaluator, GuardScope};
use crate::implementations::Implementations;
use crate::selection::Selector;
use crate::snapshot::MachineSnapshot;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

/// Working state of one macrostep.
pub(crate) struct Step<'a> {
    pub def: &'a MachineDefinition,
    pub implementations: &'a Implementations,
    pub scope: &'a mut ActorScope,
    pub snapshot: MachineSnapshot,
    /// Internal event queue, drained before the next external event.
    pub internal: VecDeque<Event>,
}

impl<'a> Step<'a> {
    pub fn new(
        def: &'a MachineDefinition,
        implementations: &'a Implementations,
        scope: &'a mut ActorScope,
        mut snapshot: MachineSnapshot,
    ) -> Self {
        snapshot.actions.clear();
        snapshot.changed = false;
        Self {
            def,
            implementations,
            scope,
            snapshot,
            internal: VecDeque::new(),
        }
    }

    pub fn selector(&self) -> Selector<'_> {
        Selector {
            def: self.def,
            config: &self.snapshot.configuration,
            history: &self.snapshot.history,
            context: &self.snapshot.context,
            guards: &self.implementations.guards,
        }
    }

    /// Finishes the step and returns the resulting snapshot.
    pub fn finish(mut self, prev: Option<&MachineSnapshot>) -> MachineSnapshot {
        self.snapshot.refresh();
        self.snapshot.changed = match prev {
            Some(prev) => {
                prev.configuration != self.snapshot.configuration
                    || prev.context != self.snapshot.context
                    || !self.snapshot.actions.is_empty()
            }
            None => true,
        };
        self.snapshot
    }

    pub fn execute_all(&mut self, actions: &[Action], event: &Event) -> Result<(), ActorError> {
        for action in actions {
            self.execute(action, event, &Value::Null)?;
        }
        Ok(())
    }

    fn execute(&mut self, action: &Action, event: &Event, params: &Value) -> Result<(), ActorError> {
        match action {
            Action::Named { name, params: own } => {
                let params = if own.is_null() { params } else { own };
                let implementations = self.implementations;
                match implementations.actions.get(name) {
                    Some(Action::Custom(exec)) => {
                        self.push_exec(name, exec, event, params);
                        self.record(name, params.clone());
                    }
                    Some(found) => self.execute(found, event, params)?,
                    None => self.missing("action", name),
                }
            }
            Action::Assign(assignment) => {
                self.assign(assignment, event, params);
                self.record("assign", params.clone());
            }
            Action::Raise {
                event: expr,
                delay,
                id,
            } => {
                let raised = expr
                    .evaluate(&self.args(event, params))
                    .with_kind(EventKind::Internal);
                let name = raised.name.clone();
                match delay {
                    None => self.internal.push_back(raised),
                    Some(delay) => {
                        let Some(ms) = self.delay_ms(delay, event, params) else {
                            return Ok(());
                        };
                        self.scope.effects.push(Effect::Send {
                            to: Destination::Session(self.scope.session_id.clone()),
                            event: raised,
                            delay: Some(ms),
                            id: id.clone(),
                        });
                    }
                }
                self.record("raise", json!({"event": name}));
            }
            Action::SendTo {
                to,
                event: expr,
                delay,
                id,
            } => {
                let sent = expr
                    .evaluate(&self.args(event, params))
                    .with_origin(self.scope.session_id.clone());
                let destination = match self.destination(to) {
                    Ok(destination) => destination,
                    Err(e) => return self.communication_error(e),
                };
                let delay = match delay {
                    Some(delay) => match self.delay_ms(delay, event, params) {
                        Some(ms) => Some(ms),
                        None => return Ok(()),
                    },
                    None => None,
                };
                self.record(
                    "sendTo",
                    json!({"to": to.to_string(), "event": sent.name.clone()}),
                );
                self.scope.effects.push(Effect::Send {
                    to: destination,
                    event: sent,
                    delay,
                    id: id.clone(),
                });
            }
            Action::Log { label, value } => {
                let value = match value {
                    Some(expr) => expr.evaluate(&self.args(event, params)),
                    None => self.snapshot.context.clone(),
                };
                self.scope.effects.push(Effect::Log {
                    label: label.clone(),
                    value,
                });
                self.record("log", json!({"label": label}));
            }
            Action::Spawn {
                src,
                id,
                system_id,
                input,
            } => self.spawn(src, id.as_deref(), system_id.as_deref(), input, event, params),
            Action::Stop(id) => {
                if let Some(child) = self.snapshot.children.remove(id) {
                    self.scope.effects.push(Effect::Stop(child));
                }
                self.record("stopChild", json!({"id": id}));
            }
            Action::Cancel(id) => {
                self.scope.effects.push(Effect::Cancel(id.clone()));
                self.record("cancel", json!({"id": id}));
            }
            Action::Choose(branches) => {
                for branch in branches {
                    if self.guard_passes(branch.guard.as_ref(), event)? {
                        for action in &branch.actions {
                            self.execute(action, event, params)?;
                        }
                        break;
                    }
                }
            }
            Action::Enqueue(f) => {
                let actions = f(&self.args(event, params));
                for action in &actions {
                    self.execute(action, event, params)?;
                }
            }
            Action::Custom(exec) => {
                self.push_exec("custom", exec, event, params);
                self.record("custom", params.clone());
            }
        }
        Ok(())
    }

    fn args<'e>(&'e self, event: &'e Event, params: &'e Value) -> ActionArgs<'e> {
        ActionArgs {
            context: &self.snapshot.context,
            event,
            params,
        }
    }

    fn record(&mut self, kind: &str, params: Value) {
        self.snapshot.actions.push(ExecutedAction::new(kind, params));
    }

    fn missing(&self, kind: &str, name: &str) {
        if self.scope.system.config().dev_mode {
            tracing::warn!(
                actor = %self.scope.id,
                kind,
                name,
                "missing implementation, skipping"
            );
        }
    }

    fn raise_error(&mut self, error: ActionError) {
        tracing::debug!(actor = %self.scope.id, error = %error, "action failed");
        self.internal
            .push_back(Event::error_execution(error.to_event_data()));
    }

    fn assign(&mut self, assignment: &Assignment, event: &Event, params: &Value) {
        let result = {
            let args = self.args(event, params);
            match assignment {
                Assignment::Reducer(f) => f(&args),
                Assignment::Keys(keys) => assign_keys(args.context, keys, &args),
            }
        };
        match result {
            Ok(context) => self.snapshot.context = context,
            Err(e) => self.raise_error(e),
        }
    }

    fn delay_ms(&self, delay: &Delay, event: &Event, params: &Value) -> Option<u64> {
        match delay {
            Delay::Ms(ms) => Some(*ms),
            Delay::Named(name) => match self.implementations.delays.get(name) {
                Some(f) => Some(f(&self.args(event, params))),
                None => {
                    self.missing("delay", name);
                    None
                }
            },
        }
    }

    fn destination(&self, to: &SendTarget) -> Result<Destination, ActorError> {
        let unreachable = |target: String| ActorError::Communication {
            actor: self.scope.id.clone(),
            target,
        };
        match to {
            SendTarget::Parent => self
                .scope
                .parent
                .clone()
                .map(Destination::Session)
                .ok_or_else(|| unreachable("#_parent".to_string())),
            SendTarget::SelfActor => Ok(Destination::Session(self.scope.session_id.clone())),
            SendTarget::Child(id) => self
                .snapshot
                .children
                .get(id)
                .cloned()
                .map(Destination::Actor)
                .ok_or_else(|| unreachable(id.clone())),
            SendTarget::System(id) => self
                .scope
                .system
                .get(id)
                .map(Destination::Actor)
                .ok_or_else(|| unreachable(format!("system:{id}"))),
            SendTarget::Ref(actor) => Ok(Destination::Actor(actor.clone())),
        }
    }

    /// A root actor fails the caller; any other actor gets `error.execution`.
    fn communication_error(&mut self, error: ActorError) -> Result<(), ActorError> {
        if self.scope.parent.is_none() {
            return Err(error);
        }
        tracing::debug!(actor = %self.scope.id, error = %error, "send failed");
        self.internal
            .push_back(Event::error_execution(error.to_event_data()));
        Ok(())
    }

    fn spawn(
        &mut self,
        src: &LogicSource,
        id: Option<&str>,
        system_id: Option<&str>,
        input: &ValueExpr,
        event: &Event,
        params: &Value,
    ) {
        let implementations = self.implementations;
        let (logic, key) = match src {
            LogicSource::Key(key) => match implementations.actors.get(key) {
                Some(logic) => (logic.clone(), Some(key.as_str())),
                None => {
                    self.missing("actor", key);
                    return;
                }
            },
            LogicSource::Inline(logic) => (logic.clone(), None),
        };
        let input = input.evaluate(&self.args(event, params));

        let spec = ChildSpec {
            id,
            src: key,
            system_id,
            input: &input,
            snapshot: None,
        };
        match self.scope.spawn_child(logic, spec) {
            Ok(child) => {
                self.record("spawnChild", json!({"id": child.id(), "src": key}));
                self.snapshot
                    .children
                    .insert(child.id().to_string(), child.clone());
                self.scope.effects.push(Effect::Start(child));
            }
            Err(e) => {
                let child_id = id.or(key).unwrap_or("inline");
                tracing::debug!(actor = %self.scope.id, child = child_id, error = %e, "spawn failed");
                self.internal
                    .push_back(Event::error_platform(child_id, e.to_event_data()));
            }
        }
    }

    fn guard_passes(&self, guard: Option<&Guard>, event: &Event) -> Result<bool, ActorError> {
        let def = self.def;
        let config: &Configuration = &self.snapshot.configuration;
        let state_in = |id: &str| def.find(id).is_some_and(|i| config.contains(&i));
        let scope = GuardScope {
            context: &self.snapshot.context,
            event,
            guards: &self.implementations.guards,
            state_in: &state_in,
        };
        GuardEvaluator::evaluate_opt(guard, &scope)
    }

    fn push_exec(&mut self, name: &str, exec: &ExecFn, event: &Event, params: &Value) {
        self.scope.effects.push(Effect::Exec {
            name: name.to_string(),
            exec: exec.clone(),
            context: self.snapshot.context.clone(),
            event: event.clone(),
            params: params.clone(),
        });
    }

    /// Returns true if the configuration is final at the root.
    pub fn root_in_final_state(&self) -> bool {
        configuration::is_in_final_state(self.def, &self.snapshot.configuration, 0)
    }
}

fn assign_keys(
    context: &Value,
    keys: &[(String, Assigner)],
    args: &ActionArgs<'_>,
) -> Result<Value, ActionError> {
    let mut next = match context {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err(ActionError::new("cannot assign keys to a non-object context")),
    };
    for (key, assigner) in keys {
        let value = match assigner {
            Assigner::Static(value) => value.clone(),
            Assigner::Dynamic(f) => f(args)?,
        };
        next.insert(key.clone(), value);
    }
    Ok(Value::Object(next))
}
