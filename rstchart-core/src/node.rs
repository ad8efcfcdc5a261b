//! State nodes and transitions of a built machine definition.
//!
//! Nodes live in an arena owned by [`MachineDefinition`](crate::MachineDefinition)
//! and refer to each other by index. Indices are assigned by a depth-first
//! preorder walk, so index order is document order and every subtree occupies
//! a contiguous index range.

use crate::action::{Action, Delay};
use crate::event::EventDescriptor;
use crate::guard::Guard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Index of a node in the definition arena.
pub type NodeIndex = usize;

/// Index of a transition in the definition's transition table.
pub type TransitionIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    Shallow,
    Deep,
}

/// An invocation started on entry and stopped on exit of its state.
#[derive(Debug, Clone)]
pub struct InvokeDef {
    pub id: String,
    pub src: String,
}

/// A state node.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub index: NodeIndex,
    /// Unique id, either explicit or the dotted path from the root.
    pub id: String,
    pub key: String,
    pub kind: StateKind,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    /// Initial child of a compound node.
    pub initial: Option<NodeIndex>,
    pub entry: Vec<Action>,
    pub exit: Vec<Action>,
    pub invoke: Vec<InvokeDef>,
    /// Transitions sourced from this node, in document order.
    pub transitions: Vec<TransitionIndex>,
    pub tags: Vec<String>,
    pub output: Option<Value>,
    pub history: Option<HistoryKind>,
    /// Default targets of a history node with no recorded value.
    pub history_default: Vec<NodeIndex>,
    pub description: Option<String>,
    pub meta: Option<Value>,
    pub depth: usize,
    /// One past the last descendant index.
    pub(crate) subtree_end: NodeIndex,
    pub(crate) exact: HashMap<String, Vec<TransitionIndex>>,
    pub(crate) wildcards: Vec<TransitionIndex>,
    pub(crate) eventless: Vec<TransitionIndex>,
}

impl StateNode {
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    pub fn is_history(&self) -> bool {
        self.kind == StateKind::History
    }

    /// Returns true if `other` is a proper descendant of this node.
    pub fn contains(&self, other: NodeIndex) -> bool {
        other > self.index && other < self.subtree_end
    }

    /// Exact event types this node has transitions for.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(|s| s.as_str())
    }
}

/// A transition.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    pub index: TransitionIndex,
    pub source: NodeIndex,
    pub event: EventDescriptor,
    /// Empty for a targetless transition.
    pub targets: Vec<NodeIndex>,
    /// A forbidden transition is selected like any other but does nothing.
    pub forbidden: bool,
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
    pub reenter: bool,
    /// Set for transitions compiled from `after`.
    pub delay: Option<Delay>,
    pub description: Option<String>,
}

impl TransitionDef {
    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }
}
