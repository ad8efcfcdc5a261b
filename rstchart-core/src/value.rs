//! State values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the active leaf of every active compound branch.
///
/// `"green"` for a flat machine, `{"A": "A1", "B": "B1"}` for a machine whose
/// root is parallel, `{"on": {"playing": "fast"}}` for nested compounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Leaf(String),
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Returns true if `other` is contained in this value.
    ///
    /// A leaf in `other` matches either an equal leaf or a branch keyed by the
    /// same name, so `"on"` matches `{"on": "playing"}`.
    pub fn matches(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Leaf(a), StateValue::Leaf(b)) => a == b,
            (StateValue::Branch(map), StateValue::Leaf(b)) => map.contains_key(b),
            (StateValue::Leaf(_), StateValue::Branch(other)) => other.is_empty(),
            (StateValue::Branch(map), StateValue::Branch(other)) => other
                .iter()
                .all(|(key, sub)| map.get(key).is_some_and(|v| v.matches(sub))),
        }
    }

    /// Parses a dotted path (`"on.playing"`) into a value.
    pub fn from_path(path: &str) -> StateValue {
        let mut parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        let Some(last) = parts.pop() else {
            return StateValue::Branch(BTreeMap::new());
        };
        let mut value = StateValue::Leaf(last.to_string());
        while let Some(part) = parts.pop() {
            let mut map = BTreeMap::new();
            map.insert(part.to_string(), value);
            value = StateValue::Branch(map);
        }
        value
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            StateValue::Leaf(s) => Some(s),
            StateValue::Branch(_) => None,
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::from_path(s)
    }
}

impl PartialEq<&str> for StateValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_leaf() == Some(*other)
    }
}
