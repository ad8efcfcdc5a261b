//! Transition selection, conflict removal and exit/entry set computation.
//!
//! Selection walks every active atomic state in document order, then its
//! ancestors, and takes the first transition whose descriptor matches and
//! whose guard passes. Two selected transitions conflict when their exit
//! sets intersect; a transition from a descendant source preempts one from
//! its ancestor, otherwise the earlier selection wins.

use crate::configuration::{self, Configuration, HistoryValue};
use crate::definition::MachineDefinition;
use crate::error::ActorError;
use crate::event::Event;
use crate::guard::{GuardEvaluator, GuardFn, GuardScope};
use crate::node::{NodeIndex, StateKind, TransitionDef, TransitionIndex};
use serde_json::Value;
use std::collections::HashMap;

/// Selects enabled transitions against one configuration and context.
pub(crate) struct Selector<'a> {
    pub def: &'a MachineDefinition,
    pub config: &'a Configuration,
    pub history: &'a HistoryValue,
    pub context: &'a Value,
    pub guards: &'a HashMap<String, GuardFn>,
}

impl<'a> Selector<'a> {
    /// Transitions enabled by `event`, conflict-free.
    pub fn select(&self, event: &Event) -> Result<Vec<TransitionIndex>, ActorError> {
        self.select_with(event, |node| self.def.candidates(node, &event.name))
    }

    /// Enabled eventless transitions. Guards observe `event`, the event
    /// that led to the current configuration.
    pub fn select_eventless(&self, event: &Event) -> Result<Vec<TransitionIndex>, ActorError> {
        self.select_with(event, |node| self.def.eventless(node).to_vec())
    }

    fn select_with<F>(&self, event: &Event, candidates: F) -> Result<Vec<TransitionIndex>, ActorError>
    where
        F: Fn(NodeIndex) -> Vec<TransitionIndex>,
    {
        let def = self.def;
        let config = self.config;
        let state_in = |id: &str| def.find(id).is_some_and(|i| config.contains(&i));
        let scope = GuardScope {
            context: self.context,
            event,
            guards: self.guards,
            state_in: &state_in,
        };

        let mut selected = Vec::new();
        for leaf in configuration::leaves(def, config) {
            let path = std::iter::once(leaf).chain(def.proper_ancestors(leaf, None));
            'ascend: for node in path {
                for t in candidates(node) {
                    let transition = def.transition(t);
                    if GuardEvaluator::evaluate_opt(transition.guard.as_ref(), &scope)? {
                        if !selected.contains(&t) {
                            selected.push(t);
                        }
                        break 'ascend;
                    }
                }
            }
        }

        Ok(remove_conflicts(def, config, self.history, selected))
    }
}

/// Drops transitions whose exit sets overlap an earlier selection, letting a
/// descendant source preempt its ancestor.
pub(crate) fn remove_conflicts(
    def: &MachineDefinition,
    config: &Configuration,
    history: &HistoryValue,
    selected: Vec<TransitionIndex>,
) -> Vec<TransitionIndex> {
    let mut filtered: Vec<(TransitionIndex, Configuration)> = Vec::new();

    for t1 in selected {
        let td1 = def.transition(t1);
        let exit1: Configuration = exit_set(def, config, history, td1).into_iter().collect();
        let mut preempted = false;
        let mut to_remove = Vec::new();

        for (t2, exit2) in &filtered {
            if exit1.is_disjoint(exit2) {
                continue;
            }
            if def.is_descendant(td1.source, def.transition(*t2).source) {
                to_remove.push(*t2);
            } else {
                preempted = true;
                break;
            }
        }

        if !preempted {
            filtered.retain(|(t, _)| !to_remove.contains(t));
            filtered.push((t1, exit1));
        }
    }

    filtered.into_iter().map(|(t, _)| t).collect()
}

/// Targets with history nodes replaced by what they stand for.
pub(crate) fn effective_targets(
    def: &MachineDefinition,
    history: &HistoryValue,
    transition: &TransitionDef,
) -> Vec<NodeIndex> {
    let mut out = Vec::new();
    for &target in &transition.targets {
        push_effective(def, history, target, &mut out);
    }
    out
}

fn push_effective(
    def: &MachineDefinition,
    history: &HistoryValue,
    state: NodeIndex,
    out: &mut Vec<NodeIndex>,
) {
    if !def.node(state).is_history() {
        if !out.contains(&state) {
            out.push(state);
        }
        return;
    }
    match history.get(&state) {
        Some(recorded) => {
            for &s in recorded {
                if !out.contains(&s) {
                    out.push(s);
                }
            }
        }
        None => {
            for s in history_defaults(def, state) {
                push_effective(def, history, s, out);
            }
        }
    }
}

/// Default targets of a history node with no recorded value: its declared
/// target, or else the default entry of its parent.
fn history_defaults(def: &MachineDefinition, history_node: NodeIndex) -> Vec<NodeIndex> {
    let node = def.node(history_node);
    if !node.history_default.is_empty() {
        return node.history_default.clone();
    }
    let Some(parent) = node.parent.map(|p| def.node(p)) else {
        return Vec::new();
    };
    match parent.kind {
        StateKind::Parallel => parent
            .children
            .iter()
            .copied()
            .filter(|&c| !def.node(c).is_history())
            .collect(),
        _ => parent.initial.into_iter().collect(),
    }
}

/// The state whose descendants a transition exits and enters. `None` stands
/// for the whole machine, root included.
pub(crate) fn domain(
    def: &MachineDefinition,
    history: &HistoryValue,
    transition: &TransitionDef,
) -> Option<NodeIndex> {
    let targets = effective_targets(def, history, transition);
    if targets.is_empty() {
        return None;
    }

    let source = transition.source;
    let within_source = targets
        .iter()
        .all(|&t| t == source || def.is_descendant(t, source));
    if !transition.reenter && within_source {
        return Some(source);
    }

    def.proper_ancestors(source, None)
        .into_iter()
        .find(|&a| targets.iter().all(|&t| def.is_descendant(t, a)))
}

/// Active states a transition exits, in document order.
pub(crate) fn exit_set(
    def: &MachineDefinition,
    config: &Configuration,
    history: &HistoryValue,
    transition: &TransitionDef,
) -> Vec<NodeIndex> {
    if transition.is_targetless() {
        return Vec::new();
    }
    match domain(def, history, transition) {
        Some(d) => config
            .iter()
            .copied()
            .filter(|&s| def.is_descendant(s, d))
            .collect(),
        None => config.iter().copied().collect(),
    }
}

/// States entered by a set of transitions, before removing states that are
/// still active.
pub(crate) fn entry_set(
    def: &MachineDefinition,
    history: &HistoryValue,
    transitions: &[&TransitionDef],
) -> Configuration {
    let mut entry = Configuration::new();
    for transition in transitions {
        if transition.is_targetless() {
            continue;
        }
        for &target in &transition.targets {
            add_descendants(def, history, target, &mut entry);
        }
        let ancestor = domain(def, history, transition);
        for state in effective_targets(def, history, transition) {
            add_ancestors(def, history, state, ancestor, &mut entry);
        }
    }
    entry
}

/// Entry set of the machine's default configuration.
pub(crate) fn initial_entry_set(def: &MachineDefinition) -> Configuration {
    let mut entry = Configuration::new();
    add_descendants(def, &HistoryValue::new(), 0, &mut entry);
    entry
}

fn add_descendants(
    def: &MachineDefinition,
    history: &HistoryValue,
    state: NodeIndex,
    entry: &mut Configuration,
) {
    let node = def.node(state);
    if node.is_history() {
        let targets = history
            .get(&state)
            .cloned()
            .unwrap_or_else(|| history_defaults(def, state));
        for &t in &targets {
            add_descendants(def, history, t, entry);
        }
        for &t in &targets {
            add_ancestors(def, history, t, node.parent, entry);
        }
        return;
    }

    entry.insert(state);
    match node.kind {
        StateKind::Compound => {
            if let Some(initial) = node.initial {
                add_descendants(def, history, initial, entry);
                add_ancestors(def, history, initial, Some(state), entry);
            }
        }
        StateKind::Parallel => fill_regions(def, history, state, entry),
        _ => {}
    }
}

fn add_ancestors(
    def: &MachineDefinition,
    history: &HistoryValue,
    state: NodeIndex,
    ancestor: Option<NodeIndex>,
    entry: &mut Configuration,
) {
    for a in def.proper_ancestors(state, ancestor) {
        entry.insert(a);
        if def.node(a).kind == StateKind::Parallel {
            fill_regions(def, history, a, entry);
        }
    }
    // A parallel domain had every region exited, so each one is refilled.
    if let Some(d) = ancestor {
        if def.node(d).kind == StateKind::Parallel {
            fill_regions(def, history, d, entry);
        }
    }
}

fn fill_regions(
    def: &MachineDefinition,
    history: &HistoryValue,
    parallel: NodeIndex,
    entry: &mut Configuration,
) {
    for &region in &def.node(parallel).children {
        if def.node(region).is_history() {
            continue;
        }
        let covered = entry
            .iter()
            .any(|&s| s == region || def.is_descendant(s, region));
        if !covered {
            add_descendants(def, history, region, entry);
        }
    }
}

/// Records history for every history child of the states about to exit.
pub(crate) fn record_history(
    def: &MachineDefinition,
    config: &Configuration,
    exiting: &[NodeIndex],
    history: &mut HistoryValue,
) {
    for &state in exiting {
        let node = def.node(state);
        for &h in &node.children {
            let Some(kind) = def.node(h).history else {
                continue;
            };
            let recorded: Vec<NodeIndex> = match kind {
                crate::node::HistoryKind::Deep => config
                    .iter()
                    .copied()
                    .filter(|&s| def.node(s).is_atomic() && def.is_descendant(s, state))
                    .collect(),
                crate::node::HistoryKind::Shallow => node
                    .children
                    .iter()
                    .copied()
                    .filter(|c| config.contains(c))
                    .collect(),
            };
            history.insert(h, recorded);
        }
    }
}
