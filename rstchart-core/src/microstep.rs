//! Microsteps: applying one conflict-free set of transitions.

use crate::configuration::{self, Configuration};
use crate::error::ActorError;
use crate::event::Event;
use crate::node::{NodeIndex, StateKind, TransitionDef, TransitionIndex};
use crate::resolve::Step;
use crate::selection;
use crate::snapshot::SnapshotStatus;
use serde_json::Value;
use std::collections::BTreeSet;

impl Step<'_> {
    /// Exits, runs transition actions, then enters.
    pub(crate) fn microstep(
        &mut self,
        transitions: &[TransitionIndex],
        event: &Event,
    ) -> Result<(), ActorError> {
        let def = self.def;
        let selected: Vec<&TransitionDef> = transitions
            .iter()
            .map(|&t| def.transition(t))
            .filter(|t| !t.forbidden)
            .collect();
        if selected.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            actor = %self.scope.id,
            event = %event.name,
            transitions = selected.len(),
            "microstep"
        );

        let mut exit = Configuration::new();
        for t in &selected {
            exit.extend(selection::exit_set(
                def,
                &self.snapshot.configuration,
                &self.snapshot.history,
                t,
            ));
        }
        let exiting: Vec<NodeIndex> = exit.into_iter().rev().collect();
        selection::record_history(
            def,
            &self.snapshot.configuration,
            &exiting,
            &mut self.snapshot.history,
        );

        for &state in &exiting {
            self.execute_all(&def.node(state).exit, event)?;
            self.snapshot.configuration.remove(&state);
        }

        for t in &selected {
            self.execute_all(&t.actions, event)?;
        }

        let entering: Vec<NodeIndex> = selection::entry_set(def, &self.snapshot.history, &selected)
            .into_iter()
            .filter(|s| !self.snapshot.configuration.contains(s))
            .collect();
        self.enter_states(&entering, event)
    }

    /// Enters the machine's default configuration.
    pub(crate) fn enter_initial(&mut self, event: &Event) -> Result<(), ActorError> {
        let entering: Vec<NodeIndex> = selection::initial_entry_set(self.def).into_iter().collect();
        self.enter_states(&entering, event)
    }

    fn enter_states(&mut self, entering: &[NodeIndex], event: &Event) -> Result<(), ActorError> {
        let def = self.def;
        let mut raised = BTreeSet::new();
        for &state in entering {
            self.snapshot.configuration.insert(state);
            let node = def.node(state);
            self.execute_all(&node.entry, event)?;
            if node.is_final() {
                self.complete_parent(state, &mut raised);
            }
        }

        if self.snapshot.status == SnapshotStatus::Active && self.root_in_final_state() {
            self.complete_machine(event)?;
        }
        Ok(())
    }

    /// Raises `done.state.*` for the parent of an entered final state, then
    /// for every parallel ancestor left with all regions final. `raised`
    /// holds the parallel states already reported in this entry pass.
    fn complete_parent(&mut self, final_state: NodeIndex, raised: &mut BTreeSet<NodeIndex>) {
        let def = self.def;
        let node = def.node(final_state);
        let Some(parent) = node.parent else {
            return;
        };
        if parent == 0 {
            return;
        }
        let output = node.output.clone().unwrap_or(Value::Null);
        self.internal
            .push_back(Event::done_state(&def.node(parent).id, output));

        for ancestor in def.proper_ancestors(parent, None) {
            if ancestor == 0 || def.node(ancestor).kind != StateKind::Parallel {
                continue;
            }
            if raised.contains(&ancestor)
                || !configuration::is_in_final_state(def, &self.snapshot.configuration, ancestor)
            {
                continue;
            }
            raised.insert(ancestor);
            self.internal
                .push_back(Event::done_state(&def.node(ancestor).id, Value::Null));
        }
    }

    /// Marks the machine done and exits every active state.
    fn complete_machine(&mut self, event: &Event) -> Result<(), ActorError> {
        let def = self.def;
        let root = def.root();
        let output = root.output.clone().or_else(|| {
            root.children
                .iter()
                .find(|c| self.snapshot.configuration.contains(*c) && def.node(**c).is_final())
                .and_then(|c| def.node(*c).output.clone())
        });

        tracing::debug!(actor = %self.scope.id, "machine reached its final state");
        self.snapshot.status = SnapshotStatus::Done;
        self.snapshot.output = output;

        let active: Vec<NodeIndex> = self.snapshot.configuration.iter().rev().copied().collect();
        for state in active {
            self.execute_all(&def.node(state).exit, event)?;
        }
        Ok(())
    }

    /// Exits every active state for a stop request.
    pub(crate) fn exit_all(&mut self, event: &Event) -> Result<(), ActorError> {
        let def = self.def;
        let active: Vec<NodeIndex> = self.snapshot.configuration.iter().rev().copied().collect();
        for state in active {
            self.execute_all(&def.node(state).exit, event)?;
        }
        self.snapshot.status = SnapshotStatus::Stopped;
        Ok(())
    }
}
