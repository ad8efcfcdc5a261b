//! Active-state configurations.
//!
//! A configuration is the set of active node indices. Because indices follow
//! document order, iterating a [`Configuration`] visits states in document
//! order and iterating it in reverse visits them in exit order.

use crate::definition::MachineDefinition;
use crate::error::ActorError;
use crate::node::{NodeIndex, StateKind};
use crate::value::StateValue;
use std::collections::{BTreeMap, BTreeSet};

/// The set of active states.
pub type Configuration = BTreeSet<NodeIndex>;

/// Recorded sub-configurations, keyed by history node.
pub type HistoryValue = BTreeMap<NodeIndex, Vec<NodeIndex>>;

/// Completes a configuration around `targets`.
///
/// Every ancestor of a target becomes active. A compound state without an
/// active child reuses its child from `prev`, falling back to its initial
/// child; a parallel state gets all of its regions.
pub fn resolve(
    def: &MachineDefinition,
    prev: &Configuration,
    targets: &[NodeIndex],
) -> Configuration {
    let mut config = Configuration::new();
    for &target in targets {
        config.insert(target);
        config.extend(def.proper_ancestors(target, None));
    }

    // Children have larger indices than their parents, so one forward pass
    // reaches every node added along the way.
    for index in 0..def.nodes().len() {
        if !config.contains(&index) {
            continue;
        }
        let node = def.node(index);
        match node.kind {
            StateKind::Compound => {
                let has_active_child = node.children.iter().any(|c| config.contains(c));
                if !has_active_child {
                    let child = node
                        .children
                        .iter()
                        .copied()
                        .find(|c| prev.contains(c) && !def.node(*c).is_history())
                        .or(node.initial);
                    if let Some(child) = child {
                        config.insert(child);
                    }
                }
            }
            StateKind::Parallel => {
                for &child in &node.children {
                    if !def.node(child).is_history() {
                        config.insert(child);
                    }
                }
            }
            _ => {}
        }
    }

    config
}

/// Builds the state value of a configuration.
pub fn state_value(def: &MachineDefinition, config: &Configuration) -> StateValue {
    node_value(def, config, 0)
}

fn node_value(def: &MachineDefinition, config: &Configuration, index: NodeIndex) -> StateValue {
    let node = def.node(index);
    match node.kind {
        StateKind::Compound => {
            let active = node.children.iter().copied().find(|c| config.contains(c));
            match active {
                Some(child) if def.node(child).is_atomic() => {
                    StateValue::Leaf(def.node(child).key.clone())
                }
                Some(child) => {
                    let mut map = BTreeMap::new();
                    map.insert(def.node(child).key.clone(), node_value(def, config, child));
                    StateValue::Branch(map)
                }
                None => StateValue::Branch(BTreeMap::new()),
            }
        }
        StateKind::Parallel => StateValue::Branch(
            node.children
                .iter()
                .copied()
                .filter(|c| config.contains(c))
                .map(|c| (def.node(c).key.clone(), node_value(def, config, c)))
                .collect(),
        ),
        _ => StateValue::Branch(BTreeMap::new()),
    }
}

/// Rebuilds a configuration from a state value.
pub fn from_value(
    def: &MachineDefinition,
    value: &StateValue,
) -> Result<Configuration, ActorError> {
    let mut named = vec![0];
    collect_named(def, 0, value, &mut named)?;
    Ok(resolve(def, &Configuration::new(), &named))
}

fn collect_named(
    def: &MachineDefinition,
    parent: NodeIndex,
    value: &StateValue,
    out: &mut Vec<NodeIndex>,
) -> Result<(), ActorError> {
    let child = |key: &str| {
        def.child_by_key(parent, key)
            .ok_or_else(|| ActorError::Restore {
                reason: format!("state '{}' has no child '{}'", def.node(parent).id, key),
            })
    };
    match value {
        StateValue::Leaf(key) => out.push(child(key)?),
        StateValue::Branch(map) => {
            for (key, sub) in map {
                let index = child(key)?;
                out.push(index);
                collect_named(def, index, sub, out)?;
            }
        }
    }
    Ok(())
}

/// Returns true if `index` is in a final state under `config`.
pub fn is_in_final_state(def: &MachineDefinition, config: &Configuration, index: NodeIndex) -> bool {
    let node = def.node(index);
    match node.kind {
        StateKind::Compound => node
            .children
            .iter()
            .any(|c| config.contains(c) && def.node(*c).is_final()),
        StateKind::Parallel => node
            .children
            .iter()
            .filter(|c| !def.node(**c).is_history())
            .all(|c| is_in_final_state(def, config, *c)),
        StateKind::Final => config.contains(&index),
        _ => false,
    }
}

/// Tags of every active state.
pub fn tags(def: &MachineDefinition, config: &Configuration) -> BTreeSet<String> {
    config
        .iter()
        .flat_map(|&i| def.node(i).tags.iter().cloned())
        .collect()
}

/// Active atomic states, in document order.
pub fn leaves(def: &MachineDefinition, config: &Configuration) -> Vec<NodeIndex> {
    config
        .iter()
        .copied()
        .filter(|&i| def.node(i).is_atomic())
        .collect()
}

/// Checks the structural invariants of a configuration.
pub fn is_valid(def: &MachineDefinition, config: &Configuration) -> bool {
    if config.is_empty() {
        return true;
    }
    config.iter().all(|&i| {
        let node = def.node(i);
        let parent_ok = node.parent.map_or(true, |p| config.contains(&p));
        let active_children = node.children.iter().filter(|c| config.contains(*c)).count();
        let children_ok = match node.kind {
            StateKind::Compound => active_children == 1,
            StateKind::Parallel => node
                .children
                .iter()
                .all(|c| def.node(*c).is_history() || config.contains(c)),
            StateKind::History => false,
            _ => true,
        };
        parent_ok && children_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player() -> MachineDefinition {
        MachineDefinition::from_json(&json!({
            "id": "player",
            "initial": "off",
            "states": {
                "off": {"tags": ["idle"]},
                "on": {
                    "type": "parallel",
                    "states": {
                        "track": {
                            "initial": "playing",
                            "states": {"playing": {"tags": ["busy"]}, "paused": {}}
                        },
                        "volume": {
                            "initial": "normal",
                            "states": {"normal": {}, "loud": {"type": "final"}}
                        },
                        "light": {}
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_initial_chain() {
        let def = player();
        let config = resolve(&def, &Configuration::new(), &[0]);
        assert_eq!(state_value(&def, &config), StateValue::from("off"));
        assert!(is_valid(&def, &config));
        assert_eq!(tags(&def, &config).into_iter().collect::<Vec<_>>(), vec!["idle"]);
    }

    #[test]
    fn test_resolve_parallel_fills_regions() {
        let def = player();
        let on = def.find("player.on").unwrap();
        let config = resolve(&def, &Configuration::new(), &[on]);

        assert!(is_valid(&def, &config));
        assert_eq!(
            serde_json::to_value(state_value(&def, &config)).unwrap(),
            json!({"on": {"track": "playing", "volume": "normal", "light": {}}})
        );
        assert_eq!(leaves(&def, &config).len(), 3);
    }

    #[test]
    fn test_resolve_reuses_previous_child() {
        let def = player();
        let paused = def.find("player.on.track.paused").unwrap();
        let prev = resolve(&def, &Configuration::new(), &[paused]);
        let on = def.find("player.on").unwrap();

        let config = resolve(&def, &prev, &[on]);
        assert!(config.contains(&paused));
    }

    #[test]
    fn test_from_value_round_trip() {
        let def = player();
        let loud = def.find("player.on.volume.loud").unwrap();
        let config = resolve(&def, &Configuration::new(), &[loud]);
        let value = state_value(&def, &config);

        assert_eq!(from_value(&def, &value).unwrap(), config);
        assert!(matches!(
            from_value(&def, &StateValue::from("missing")),
            Err(ActorError::Restore { .. })
        ));
    }

    #[test]
    fn test_final_detection() {
        let def = player();
        let volume = def.find("player.on.volume").unwrap();
        let loud = def.find("player.on.volume.loud").unwrap();
        let config = resolve(&def, &Configuration::new(), &[loud]);

        assert!(is_in_final_state(&def, &config, volume));
        assert!(!is_in_final_state(&def, &config, def.find("player.on").unwrap()));
    }

    #[test]
    fn test_invalid_configurations() {
        let def = player();
        let playing = def.find("player.on.track.playing").unwrap();
        let orphan: Configuration = [playing].into_iter().collect();
        assert!(!is_valid(&def, &orphan));

        let off = def.find("player.off").unwrap();
        let on = def.find("player.on").unwrap();
        let mut two = resolve(&def, &Configuration::new(), &[on]);
        two.insert(off);
        assert!(!is_valid(&def, &two));
    }

    mod properties {
        use super::*;
        use crate::actor::{ActorScope, System};
        use crate::config::RuntimeConfig;
        use crate::event::Event;
        use crate::machine::Machine;
        use proptest::prelude::*;

        fn machine() -> Machine {
            Machine::from_json(&json!({
                "id": "player",
                "initial": "off",
                "states": {
                    "off": {"on": {"POWER": "on"}},
                    "on": {
                        "type": "parallel",
                        "on": {"POWER": "off", "RESET": {"target": "on", "reenter": true}},
                        "states": {
                            "track": {
                                "initial": "playing",
                                "states": {
                                    "playing": {"on": {"PAUSE": "paused"}},
                                    "paused": {"on": {"PLAY": "playing", "SEEK": "seeking.fast"}},
                                    "seeking": {
                                        "initial": "slow",
                                        "states": {"slow": {}, "fast": {}},
                                        "on": {"PLAY": "playing"}
                                    },
                                    "hist": {"type": "history", "history": "deep"}
                                }
                            },
                            "volume": {
                                "initial": "normal",
                                "states": {
                                    "normal": {"on": {"UP": "loud"}},
                                    "loud": {"on": {"DOWN": "normal"}}
                                }
                            }
                        }
                    }
                }
            }))
            .unwrap()
        }

        fn event() -> impl Strategy<Value = &'static str> {
            prop::sample::select(vec![
                "POWER", "RESET", "PAUSE", "PLAY", "SEEK", "UP", "DOWN", "NOPE",
            ])
        }

        proptest! {
            #[test]
            fn configuration_stays_valid(events in prop::collection::vec(event(), 0..40)) {
                let machine = machine();
                let def = machine.definition().clone();
                let system = System::new(RuntimeConfig::default());
                let mut scope = ActorScope::detached(&system, "player");
                let mut snapshot = machine.initial_state(&mut scope, &serde_json::Value::Null).unwrap();

                for name in events {
                    snapshot = machine.transition(&snapshot, &Event::new(name), &mut scope).unwrap();
                    prop_assert!(is_valid(&def, &snapshot.configuration));
                    prop_assert!(leaves(&def, &snapshot.configuration)
                        .iter()
                        .all(|&leaf| def.node(leaf).is_atomic()));

                    let rebuilt = from_value(&def, &snapshot.value).unwrap();
                    prop_assert_eq!(&rebuilt, &snapshot.configuration);
                }
            }
        }
    }
}
