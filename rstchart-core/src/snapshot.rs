//! Machine snapshots and their persisted form.

use crate::action::ExecutedAction;
use crate::actor::ActorRef;
use crate::configuration::{self, Configuration, HistoryValue};
use crate::definition::MachineDefinition;
use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Status of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    #[default]
    Active,
    Done,
    Error,
    Stopped,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotStatus::Active => write!(f, "active"),
            SnapshotStatus::Done => write!(f, "done"),
            SnapshotStatus::Error => write!(f, "error"),
            SnapshotStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The state of a machine after a macrostep. Every transition produces a new
/// snapshot; a snapshot is never modified once returned.
#[derive(Clone)]
pub struct MachineSnapshot {
    definition: Arc<MachineDefinition>,
    pub value: StateValue,
    pub context: Value,
    pub configuration: Configuration,
    pub history: HistoryValue,
    /// Spawned and invoked actors, by id.
    pub children: BTreeMap<String, ActorRef>,
    pub tags: BTreeSet<String>,
    pub status: SnapshotStatus,
    pub output: Option<Value>,
    pub error: Option<Value>,
    /// False when the last macrostep neither moved, assigned nor ran actions.
    pub changed: bool,
    /// Actions resolved by the last macrostep, in execution order.
    pub actions: Vec<ExecutedAction>,
}

impl MachineSnapshot {
    pub(crate) fn new(definition: Arc<MachineDefinition>, context: Value) -> Self {
        Self {
            definition,
            value: StateValue::Branch(BTreeMap::new()),
            context,
            configuration: Configuration::new(),
            history: HistoryValue::new(),
            children: BTreeMap::new(),
            tags: BTreeSet::new(),
            status: SnapshotStatus::Active,
            output: None,
            error: None,
            changed: false,
            actions: Vec::new(),
        }
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    /// Recomputes the state value and tags from the configuration.
    pub(crate) fn refresh(&mut self) {
        self.value = configuration::state_value(&self.definition, &self.configuration);
        self.tags = configuration::tags(&self.definition, &self.configuration);
    }

    /// Returns true if the state value contains `path` (`"on.playing"`).
    pub fn matches(&self, path: &str) -> bool {
        self.value.matches(&StateValue::from_path(path))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns true if the state with this id is active.
    pub fn is_active(&self, state_id: &str) -> bool {
        self.definition
            .find(state_id)
            .is_some_and(|i| self.configuration.contains(&i))
    }

    /// Ids of the active states, in document order.
    pub fn state_ids(&self) -> Vec<&str> {
        self.configuration
            .iter()
            .map(|&i| self.definition.node(i).id.as_str())
            .collect()
    }

    pub fn child(&self, id: &str) -> Option<&ActorRef> {
        self.children.get(id)
    }

    pub fn is_done(&self) -> bool {
        self.status == SnapshotStatus::Done
    }
}

impl fmt::Debug for MachineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineSnapshot")
            .field("machine", &self.definition.id)
            .field("value", &self.value)
            .field("context", &self.context)
            .field("status", &self.status)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("changed", &self.changed)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Serializable form of an actor snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub status: SnapshotStatus,

    /// State value; absent for non-machine logics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StateValue>,

    #[serde(default)]
    pub context: Value,

    /// Recorded history by history node id, as state ids.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub history_value: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, PersistedChild>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    /// Checksum of the definition the snapshot was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A persisted child actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChild {
    /// Implementation key the child was spawned from. Inline logics have none
    /// and cannot be restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,

    pub snapshot: PersistedSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_persisted_json_shape() {
        let mut children = BTreeMap::new();
        children.insert(
            "fetcher".to_string(),
            PersistedChild {
                src: Some("fetch".to_string()),
                system_id: None,
                snapshot: PersistedSnapshot {
                    status: SnapshotStatus::Done,
                    output: Some(json!(42)),
                    ..Default::default()
                },
            },
        );
        let persisted = PersistedSnapshot {
            status: SnapshotStatus::Active,
            value: Some(StateValue::from("loading")),
            context: json!({"n": 1}),
            children,
            ..Default::default()
        };

        let value = serde_json::to_value(&persisted).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "active",
                "value": "loading",
                "context": {"n": 1},
                "children": {
                    "fetcher": {
                        "src": "fetch",
                        "snapshot": {"status": "done", "context": null, "output": 42}
                    }
                }
            })
        );
        let back: PersistedSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, persisted);
    }

    #[test]
    fn test_matches_and_lookup() {
        let def = Arc::new(
            MachineDefinition::from_json(&json!({
                "id": "p",
                "initial": "on",
                "states": {
                    "on": {
                        "initial": "playing",
                        "tags": ["powered"],
                        "states": {"playing": {}, "paused": {}}
                    },
                    "off": {}
                }
            }))
            .unwrap(),
        );
        let mut snapshot = MachineSnapshot::new(def.clone(), json!({}));
        let playing = def.find("p.on.playing").unwrap();
        snapshot.configuration = configuration::resolve(&def, &Configuration::new(), &[playing]);
        snapshot.refresh();

        assert!(snapshot.matches("on"));
        assert!(snapshot.matches("on.playing"));
        assert!(!snapshot.matches("on.paused"));
        assert!(snapshot.has_tag("powered"));
        assert!(snapshot.is_active("#p.on"));
        assert_eq!(snapshot.state_ids(), vec!["p", "p.on", "p.on.playing"]);
    }
}
