//! Statechart actor logic.
//!
//! A [`Machine`] pairs an immutable [`MachineDefinition`] with the named
//! implementations its actions, guards, delays and invocations refer to.
//! Machines are pure: [`Machine::transition`] takes a snapshot and an event
//! and returns the next snapshot, recording anything that touches other
//! actors as deferred effects on the [`ActorScope`].

use crate::action::Effect;
use crate::actor::{ActorLogic, ActorScope, ActorSnapshot, ChildSpec};
use crate::configuration;
use crate::definition::MachineDefinition;
use crate::error::{ActorError, CoreError};
use crate::event::{Event, INIT_EVENT, STOP_EVENT};
use crate::implementations::Implementations;
use crate::resolve::Step;
use crate::selection::Selector;
use crate::snapshot::{MachineSnapshot, PersistedChild, PersistedSnapshot, SnapshotStatus};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A statechart definition with its implementations.
#[derive(Clone)]
pub struct Machine {
    definition: Arc<MachineDefinition>,
    implementations: Arc<Implementations>,
}

impl Machine {
    pub fn new(definition: MachineDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            implementations: Arc::new(Implementations::default()),
        }
    }

    /// Builds a machine from a JSON state-node tree.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        Ok(Self::new(MachineDefinition::from_json(json)?))
    }

    /// Parses a machine from JSON text.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        Ok(Self::new(MachineDefinition::parse(json)?))
    }

    /// Returns a machine sharing this definition, with `implementations`
    /// merged over the current ones.
    pub fn provide(&self, implementations: Implementations) -> Self {
        Self {
            definition: self.definition.clone(),
            implementations: Arc::new(self.implementations.merged(implementations)),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.definition
    }

    pub fn implementations(&self) -> &Implementations {
        &self.implementations
    }

    /// Enters the initial configuration and settles it.
    pub fn initial_state(
        &self,
        scope: &mut ActorScope,
        input: &Value,
    ) -> Result<MachineSnapshot, ActorError> {
        let context = match &self.implementations.context {
            Some(factory) => factory(input),
            None => self.definition.context.clone(),
        };
        let snapshot = MachineSnapshot::new(self.definition.clone(), context);
        let init = Event::platform(INIT_EVENT, input.clone());

        let mut step = Step::new(&self.definition, &self.implementations, scope, snapshot);
        step.enter_initial(&init)?;
        step.macrostep(None, &init)?;
        Ok(step.finish(None))
    }

    /// Runs one macrostep for `event`. A snapshot that is no longer active
    /// is returned unchanged.
    pub fn transition(
        &self,
        snapshot: &MachineSnapshot,
        event: &Event,
        scope: &mut ActorScope,
    ) -> Result<MachineSnapshot, ActorError> {
        if snapshot.status != SnapshotStatus::Active {
            let mut next = snapshot.clone();
            next.changed = false;
            next.actions.clear();
            return Ok(next);
        }
        let mut step = Step::new(
            &self.definition,
            &self.implementations,
            scope,
            snapshot.clone(),
        );
        step.macrostep(Some(event), event)?;
        Ok(step.finish(Some(snapshot)))
    }

    /// Returns true if `event` would enable at least one transition.
    pub fn can(&self, snapshot: &MachineSnapshot, event: &Event) -> Result<bool, ActorError> {
        if snapshot.status != SnapshotStatus::Active {
            return Ok(false);
        }
        let selector = Selector {
            def: &self.definition,
            config: &snapshot.configuration,
            history: &snapshot.history,
            context: &snapshot.context,
            guards: &self.implementations.guards,
        };
        let selected = selector.select(event)?;
        Ok(selected
            .iter()
            .any(|&t| !self.definition.transition(t).forbidden))
    }

    fn expect_machine<'s>(
        &self,
        snapshot: &'s ActorSnapshot,
    ) -> Result<&'s MachineSnapshot, ActorError> {
        snapshot
            .as_machine()
            .ok_or(ActorError::SnapshotMismatch { logic: "machine" })
    }

    fn restore_error(reason: String) -> ActorError {
        ActorError::Restore { reason }
    }
}

impl ActorLogic for Machine {
    fn kind(&self) -> &'static str {
        "machine"
    }

    fn initial_snapshot(
        &self,
        scope: &mut ActorScope,
        input: &Value,
    ) -> Result<ActorSnapshot, ActorError> {
        self.initial_state(scope, input).map(ActorSnapshot::Machine)
    }

    fn transition(
        &self,
        snapshot: &ActorSnapshot,
        event: &Event,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        let current = self.expect_machine(snapshot)?;
        Machine::transition(self, current, event, scope).map(ActorSnapshot::Machine)
    }

    fn accepts(&self, event: &Event) -> Result<(), ActorError> {
        if self.definition.strict
            && !event.is_builtin()
            && !self.definition.accepts_event(&event.name)
        {
            return Err(ActorError::StrictModeViolation {
                machine: self.definition.id.clone(),
                event: event.name.clone(),
            });
        }
        Ok(())
    }

    fn stop(
        &self,
        snapshot: &ActorSnapshot,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        let current = self.expect_machine(snapshot)?;
        if current.status != SnapshotStatus::Active {
            return Ok(snapshot.clone().stopped());
        }

        let stop = Event::platform(STOP_EVENT, Value::Null);
        let mut step = Step::new(
            &self.definition,
            &self.implementations,
            scope,
            current.clone(),
        );
        step.exit_all(&stop)?;
        let mut next = step.finish(Some(current));
        for (_, child) in std::mem::take(&mut next.children) {
            scope.effects.push(Effect::Stop(child));
        }
        Ok(ActorSnapshot::Machine(next))
    }

    fn persist(&self, snapshot: &ActorSnapshot) -> Result<PersistedSnapshot, ActorError> {
        let current = self.expect_machine(snapshot)?;
        let def = &self.definition;

        let history_value = current
            .history
            .iter()
            .map(|(history, states)| {
                let ids = states.iter().map(|&s| def.node(s).id.clone()).collect();
                (def.node(*history).id.clone(), ids)
            })
            .collect();

        let mut children = BTreeMap::new();
        for (id, child) in &current.children {
            children.insert(
                id.clone(),
                PersistedChild {
                    src: child.src().map(str::to_string),
                    system_id: child.system_id().map(str::to_string),
                    snapshot: child.persisted()?,
                },
            );
        }

        Ok(PersistedSnapshot {
            status: current.status,
            value: Some(current.value.clone()),
            context: current.context.clone(),
            history_value,
            children,
            tags: current.tags.iter().cloned().collect(),
            output: current.output.clone(),
            error: current.error.clone(),
            input: Value::Null,
            checksum: Some(def.checksum.clone()),
        })
    }

    fn restore(
        &self,
        persisted: &PersistedSnapshot,
        scope: &mut ActorScope,
    ) -> Result<ActorSnapshot, ActorError> {
        let def = &self.definition;
        if let Some(checksum) = &persisted.checksum {
            if checksum != &def.checksum {
                tracing::warn!(
                    machine = %def.id,
                    expected = %def.checksum,
                    found = %checksum,
                    "snapshot was taken from a different definition"
                );
            }
        }

        let value = persisted
            .value
            .as_ref()
            .ok_or_else(|| Self::restore_error("snapshot has no state value".to_string()))?;
        let mut snapshot = MachineSnapshot::new(def.clone(), persisted.context.clone());
        snapshot.configuration = configuration::from_value(def, value)?;
        snapshot.status = persisted.status;
        snapshot.output = persisted.output.clone();
        snapshot.error = persisted.error.clone();

        for (history, states) in &persisted.history_value {
            let index = def
                .find(history)
                .ok_or_else(|| Self::restore_error(format!("unknown history state '{history}'")))?;
            let recorded = states
                .iter()
                .map(|s| {
                    def.find(s)
                        .ok_or_else(|| Self::restore_error(format!("unknown state '{s}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            snapshot.history.insert(index, recorded);
        }

        for (id, child) in &persisted.children {
            let Some(src) = child.src.as_deref() else {
                tracing::warn!(machine = %def.id, child = %id, "inline child cannot be restored, skipping");
                continue;
            };
            let Some(logic) = self.implementations.actors.get(src) else {
                tracing::warn!(machine = %def.id, child = %id, src, "no actor implementation, skipping");
                continue;
            };
            let spec = ChildSpec {
                id: Some(id),
                src: Some(src),
                system_id: child.system_id.as_deref(),
                input: &Value::Null,
                snapshot: Some(&child.snapshot),
            };
            let actor = scope.spawn_child(logic.clone(), spec)?;
            snapshot.children.insert(id.clone(), actor.clone());
            scope.effects.push(Effect::Start(actor));
        }

        snapshot.refresh();
        tracing::debug!(machine = %def.id, value = ?snapshot.value, "snapshot restored");
        Ok(ActorSnapshot::Machine(snapshot))
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.definition.id)
            .field("implementations", &self.implementations)
            .finish()
    }
}
