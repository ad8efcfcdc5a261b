//! Machine definition types.
//!
//! Machine definitions use a JSON document describing the normalized state
//! tree:
//!
//! ```json
//! {
//!   "id": "light",
//!   "initial": "green",
//!   "context": {"cycles": 0},
//!   "states": {
//!     "green": {"on": {"TIMER": "yellow"}},
//!     "yellow": {"on": {"TIMER": "red"}},
//!     "red": {
//!       "after": {"1000": "green"},
//!       "on": {"TIMER": {"target": "green", "guard": "ctx.cycles < 10"}}
//!     }
//!   }
//! }
//! ```
//!
//! States are kept in document order. Targets are written as `key`
//! (a sibling of the source), `.child` (a child of the source), `#id`
//! (any node by id), or dotted paths under those.

use crate::action::{
    Action, Assigner, Assignment, ChooseBranch, Delay, EventExpr, LogicSource, SendTarget,
    ValueExpr,
};
use crate::error::CoreError;
use crate::event::{
    Event, EventDescriptor, AFTER_PREFIX, DONE_ACTOR_PREFIX, DONE_STATE_PREFIX,
    ERROR_PLATFORM_PREFIX,
};
use crate::guard::{Guard, GuardExpr};
use crate::node::{
    HistoryKind, InvokeDef, NodeIndex, StateKind, StateNode, TransitionDef, TransitionIndex,
};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

/// Default id of a machine whose root has none.
pub const DEFAULT_MACHINE_ID: &str = "machine";

/// A JSON object whose entries keep their document order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> OrderedMap<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(k, _): &(String, T)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One transition of a transition list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionConfig {
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub target: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardConfig>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub actions: Vec<ActionConfig>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub reenter: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TransitionConfig {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: vec![target.into()],
            ..Default::default()
        }
    }
}

/// The transitions for one event: a target string, one transition object,
/// or an array of either, tried in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TransitionsConfig(pub Vec<TransitionConfig>);

impl<'de> Deserialize<'de> for TransitionsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Entry {
            Target(String),
            Config(TransitionConfig),
        }

        struct TransitionsVisitor;

        impl<'de> Visitor<'de> for TransitionsVisitor {
            type Value = TransitionsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target string, a transition object or an array of them")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TransitionsConfig(vec![TransitionConfig::to(v)]))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let config =
                    TransitionConfig::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(TransitionsConfig(vec![config]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut transitions = Vec::new();
                while let Some(entry) = seq.next_element::<Entry>()? {
                    transitions.push(match entry {
                        Entry::Target(target) => TransitionConfig::to(target),
                        Entry::Config(config) => config,
                    });
                }
                Ok(TransitionsConfig(transitions))
            }
        }

        deserializer.deserialize_any(TransitionsVisitor)
    }
}

/// A guard reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuardConfig {
    Named(String),
    Expr {
        expr: String,
    },
    Not {
        not: Box<GuardConfig>,
    },
    And {
        and: Vec<GuardConfig>,
    },
    Or {
        or: Vec<GuardConfig>,
    },
    StateIn {
        #[serde(rename = "stateIn")]
        state_in: String,
    },
    Parameterized {
        #[serde(rename = "type")]
        name: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
}

/// An event written inline: a type string or an event object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventConfig {
    Name(String),
    Event(Event),
}

impl EventConfig {
    fn to_event(&self) -> Event {
        match self {
            EventConfig::Name(name) => Event::new(name.as_str()),
            EventConfig::Event(event) => event.clone(),
        }
    }
}

/// A delay written as milliseconds or as a delay name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelayConfig {
    Ms(u64),
    Named(String),
}

impl DelayConfig {
    fn to_delay(&self) -> Delay {
        match self {
            DelayConfig::Ms(ms) => Delay::Ms(*ms),
            DelayConfig::Named(name) => Delay::parse(name),
        }
    }
}

/// One branch of a `choose` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChooseBranchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardConfig>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub actions: Vec<ActionConfig>,
}

/// Built-in actions that can be written directly in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuiltinActionConfig {
    Assign {
        assignment: Map<String, Value>,
    },
    Raise {
        event: EventConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<DelayConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    SendTo {
        to: String,
        event: EventConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<DelayConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    SendParent {
        event: EventConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<DelayConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
    },
    Cancel {
        id: String,
    },
    StopChild {
        id: String,
    },
    SpawnChild {
        src: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, rename = "systemId", skip_serializing_if = "Option::is_none")]
        system_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    Choose {
        branches: Vec<ChooseBranchConfig>,
    },
}

/// An action reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionConfig {
    /// A named implementation.
    Named(String),
    Builtin(BuiltinActionConfig),
    /// A named implementation with parameters.
    Parameterized {
        #[serde(rename = "type")]
        name: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
}

/// An actor invoked while its state is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<TransitionsConfig>,
}

/// Raw state node as stored/transmitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNodeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<StateKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<OrderedMap<StateNodeConfig>>,

    /// Event transitions. A `null` entry is a forbidden transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<OrderedMap<Option<TransitionsConfig>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<TransitionsConfig>,

    /// Delayed transitions keyed by milliseconds or delay name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<OrderedMap<TransitionsConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionsConfig>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub entry: Vec<ActionConfig>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub exit: Vec<ActionConfig>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub invoke: Vec<InvokeConfig>,

    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryKind>,

    /// Default target of a history node.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub target: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Raw machine definition as stored/transmitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Initial context.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,

    /// Reject events no transition listens for.
    #[serde(default, skip_serializing_if = "is_false")]
    pub strict: bool,

    /// The root state node.
    #[serde(flatten)]
    pub root: StateNodeConfig,
}

/// Validated and indexed machine definition.
#[derive(Debug)]
pub struct MachineDefinition {
    /// Machine id (the root node id).
    pub id: String,

    /// Initial context.
    pub context: Value,

    pub strict: bool,

    nodes: Vec<StateNode>,

    transitions: Vec<TransitionDef>,

    ids: HashMap<String, NodeIndex>,

    events: BTreeSet<String>,

    /// Original raw definition for storage.
    pub raw: MachineConfig,

    /// Hash of the definition for integrity checks.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: MachineConfig = serde_json::from_value(json.clone())?;
        Self::from_config(raw)
    }

    /// Parses and validates a machine definition from a JSON string.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let raw: MachineConfig = serde_json::from_str(json)?;
        Self::from_config(raw)
    }

    /// Builds a machine definition from raw parts.
    pub fn from_config(raw: MachineConfig) -> Result<Self, CoreError> {
        let id = raw
            .root
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_string());

        let mut builder = Builder::new(&id);
        builder.add_node(&raw.root, &id, None, &[])?;
        builder.link()?;
        let Builder {
            nodes,
            transitions,
            ids,
            ..
        } = builder;

        let mut definition = Self {
            id,
            context: raw.context.clone(),
            strict: raw.strict,
            nodes,
            transitions,
            ids,
            events: BTreeSet::new(),
            checksum: String::new(),
            raw,
        };
        definition.finalize()?;

        tracing::debug!(
            machine = %definition.id,
            states = definition.nodes.len(),
            transitions = definition.transitions.len(),
            checksum = %definition.checksum,
            "machine definition built"
        );

        Ok(definition)
    }

    /// Computes per-node candidate indices, the event set and the checksum.
    fn finalize(&mut self) -> Result<(), CoreError> {
        for t in &self.transitions {
            let node = &mut self.nodes[t.source];
            match &t.event {
                EventDescriptor::Exact(name) => {
                    node.exact.entry(name.clone()).or_default().push(t.index);
                    self.events.insert(name.clone());
                }
                EventDescriptor::Partial(_) | EventDescriptor::Wildcard => {
                    node.wildcards.push(t.index)
                }
                EventDescriptor::Eventless => node.eventless.push(t.index),
            }
        }

        let transitions = &self.transitions;
        for node in &mut self.nodes {
            node.wildcards
                .sort_by_key(|&t| std::cmp::Reverse(transitions[t].event.specificity()));
        }

        let json_bytes = serde_json::to_vec(&self.raw)?;
        self.checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));
        Ok(())
    }

    pub fn root(&self) -> &StateNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: NodeIndex) -> &StateNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[StateNode] {
        &self.nodes
    }

    pub fn transition(&self, index: TransitionIndex) -> &TransitionDef {
        &self.transitions[index]
    }

    pub fn transitions(&self) -> &[TransitionDef] {
        &self.transitions
    }

    /// Looks up a node by id. A leading `#` is accepted.
    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id.trim_start_matches('#')).copied()
    }

    /// Looks up a state node by id.
    pub fn state(&self, id: &str) -> Option<&StateNode> {
        self.find(id).map(|i| &self.nodes[i])
    }

    /// Returns all exact event types any transition listens for.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|s| s.as_str())
    }

    /// Returns true if some transition listens for the event type.
    pub fn accepts_event(&self, event: &str) -> bool {
        self.events.contains(event)
            || self
                .nodes
                .iter()
                .flat_map(|n| n.wildcards.iter())
                .any(|&t| self.transitions[t].event.matches(event))
    }

    /// Returns true if `node` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, node: NodeIndex, ancestor: NodeIndex) -> bool {
        self.nodes[ancestor].contains(node)
    }

    /// Proper ancestors of `node`, nearest first, stopping before `stop`.
    pub fn proper_ancestors(&self, node: NodeIndex, stop: Option<NodeIndex>) -> Vec<NodeIndex> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes[node].parent;
        while let Some(p) = current {
            if Some(p) == stop {
                break;
            }
            ancestors.push(p);
            current = self.nodes[p].parent;
        }
        ancestors
    }

    pub fn child_by_key(&self, parent: NodeIndex, key: &str) -> Option<NodeIndex> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].key == key)
    }

    /// Transitions of `node` that match an event type, in document order.
    ///
    /// Exact descriptors take precedence. Without an exact descriptor,
    /// wildcard descriptors match, longest descriptor first.
    pub fn candidates(&self, node: NodeIndex, event: &str) -> Vec<TransitionIndex> {
        let node = &self.nodes[node];
        if let Some(exact) = node.exact.get(event) {
            return exact.clone();
        }
        node.wildcards
            .iter()
            .copied()
            .filter(|&t| self.transitions[t].event.matches(event))
            .collect()
    }

    /// Eventless transitions of `node`, in document order.
    pub fn eventless(&self, node: NodeIndex) -> &[TransitionIndex] {
        &self.nodes[node].eventless
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

struct Builder<'a> {
    machine_id: String,
    nodes: Vec<StateNode>,
    configs: Vec<&'a StateNodeConfig>,
    ids: HashMap<String, NodeIndex>,
    transitions: Vec<TransitionDef>,
}

impl<'a> Builder<'a> {
    fn new(machine_id: &str) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            nodes: Vec::new(),
            configs: Vec::new(),
            ids: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    fn add_node(
        &mut self,
        config: &'a StateNodeConfig,
        key: &str,
        parent: Option<NodeIndex>,
        path: &[String],
    ) -> Result<NodeIndex, CoreError> {
        let index = self.nodes.len();
        let id = match &config.id {
            Some(id) => id.clone(),
            None if path.is_empty() => self.machine_id.clone(),
            None => format!("{}.{}", self.machine_id, path.join(".")),
        };
        let kind = infer_kind(config, &id, parent.is_none())?;

        if self.ids.insert(id.clone(), index).is_some() {
            return Err(CoreError::DuplicateId { id });
        }

        self.nodes.push(StateNode {
            index,
            id,
            key: key.to_string(),
            kind,
            parent,
            children: Vec::new(),
            initial: None,
            entry: Vec::new(),
            exit: Vec::new(),
            invoke: Vec::new(),
            transitions: Vec::new(),
            tags: config.tags.clone(),
            output: config.output.clone(),
            history: match kind {
                StateKind::History => Some(config.history.unwrap_or_default()),
                _ => None,
            },
            history_default: Vec::new(),
            description: config.description.clone(),
            meta: config.meta.clone(),
            depth: path.len(),
            subtree_end: index + 1,
            exact: HashMap::new(),
            wildcards: Vec::new(),
            eventless: Vec::new(),
        });
        self.configs.push(config);

        if let Some(states) = &config.states {
            let mut child_path = path.to_vec();
            for (child_key, child) in states.iter() {
                child_path.push(child_key.to_string());
                let child_index = self.add_node(child, child_key, Some(index), &child_path)?;
                child_path.pop();
                self.nodes[index].children.push(child_index);
            }
        }

        self.nodes[index].subtree_end = self.nodes.len();
        Ok(index)
    }

    /// Resolves initial states, targets and actions once every node exists.
    fn link(&mut self) -> Result<(), CoreError> {
        for index in 0..self.nodes.len() {
            let config = self.configs[index];

            if self.nodes[index].kind == StateKind::Compound {
                let initial = self.resolve_initial(index, config)?;
                self.nodes[index].initial = Some(initial);
            }

            if self.nodes[index].kind == StateKind::History {
                let defaults = config
                    .target
                    .iter()
                    .map(|t| self.resolve_target(index, t))
                    .collect::<Result<Vec<_>, _>>()?;
                self.nodes[index].history_default = defaults;
            }

            let mut entry = compile_actions(&config.entry)?;
            let mut exit = compile_actions(&config.exit)?;

            if let Some(on) = &config.on {
                for (event, transitions) in on.iter() {
                    let descriptor = EventDescriptor::parse(event);
                    match transitions {
                        Some(transitions) => {
                            for t in &transitions.0 {
                                self.add_transition(index, descriptor.clone(), t, None)?;
                            }
                        }
                        None => self.add_forbidden(index, descriptor),
                    }
                }
            }

            if let Some(after) = &config.after {
                let state_id = self.nodes[index].id.clone();
                for (key, transitions) in after.iter() {
                    let delay = Delay::parse(key);
                    let event = format!("{AFTER_PREFIX}{key}.{state_id}");
                    entry.push(Action::Raise {
                        event: EventExpr::Static(Event::new(event.as_str())),
                        delay: Some(delay.clone()),
                        id: Some(event.clone()),
                    });
                    exit.push(Action::Cancel(event.clone()));
                    for t in &transitions.0 {
                        self.add_transition(
                            index,
                            EventDescriptor::Exact(event.clone()),
                            t,
                            Some(delay.clone()),
                        )?;
                    }
                }
            }

            if let Some(always) = &config.always {
                for t in &always.0 {
                    self.add_transition(index, EventDescriptor::Eventless, t, None)?;
                }
            }

            if let Some(on_done) = &config.on_done {
                let event = format!("{DONE_STATE_PREFIX}{}", self.nodes[index].id);
                for t in &on_done.0 {
                    self.add_transition(index, EventDescriptor::Exact(event.clone()), t, None)?;
                }
            }

            for (i, invoke) in config.invoke.iter().enumerate() {
                let id = invoke
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}:invocation[{}]", self.nodes[index].id, i));
                entry.push(Action::Spawn {
                    src: LogicSource::Key(invoke.src.clone()),
                    id: Some(id.clone()),
                    system_id: invoke.system_id.clone(),
                    input: ValueExpr::Static(invoke.input.clone().unwrap_or(Value::Null)),
                });
                exit.push(Action::Stop(id.clone()));

                if let Some(on_done) = &invoke.on_done {
                    let event = EventDescriptor::Exact(format!("{DONE_ACTOR_PREFIX}{id}"));
                    for t in &on_done.0 {
                        self.add_transition(index, event.clone(), t, None)?;
                    }
                }
                if let Some(on_error) = &invoke.on_error {
                    let event = EventDescriptor::Exact(format!("{ERROR_PLATFORM_PREFIX}{id}"));
                    for t in &on_error.0 {
                        self.add_transition(index, event.clone(), t, None)?;
                    }
                }

                self.nodes[index].invoke.push(InvokeDef {
                    id,
                    src: invoke.src.clone(),
                });
            }

            self.nodes[index].entry = entry;
            self.nodes[index].exit = exit;
        }

        Ok(())
    }

    fn resolve_initial(
        &self,
        index: NodeIndex,
        config: &StateNodeConfig,
    ) -> Result<NodeIndex, CoreError> {
        let node = &self.nodes[index];
        let initial = config
            .initial
            .as_deref()
            .ok_or_else(|| CoreError::MissingInitial {
                state: node.id.clone(),
            })?;
        let key = initial.trim_start_matches('.');
        node.children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].key == key && !self.nodes[c].is_history())
            .ok_or_else(|| CoreError::InvalidInitial {
                state: node.id.clone(),
                initial: initial.to_string(),
            })
    }

    fn add_transition(
        &mut self,
        source: NodeIndex,
        event: EventDescriptor,
        config: &TransitionConfig,
        delay: Option<Delay>,
    ) -> Result<(), CoreError> {
        let targets = config
            .target
            .iter()
            .map(|t| self.resolve_target(source, t))
            .collect::<Result<Vec<_>, _>>()?;
        let guard = config.guard.as_ref().map(compile_guard).transpose()?;
        let actions = compile_actions(&config.actions)?;

        let index = self.transitions.len();
        self.transitions.push(TransitionDef {
            index,
            source,
            event,
            targets,
            forbidden: false,
            guard,
            actions,
            reenter: config.reenter,
            delay,
            description: config.description.clone(),
        });
        self.nodes[source].transitions.push(index);
        Ok(())
    }

    fn add_forbidden(&mut self, source: NodeIndex, event: EventDescriptor) {
        let index = self.transitions.len();
        self.transitions.push(TransitionDef {
            index,
            source,
            event,
            targets: Vec::new(),
            forbidden: true,
            guard: None,
            actions: Vec::new(),
            reenter: false,
            delay: None,
            description: None,
        });
        self.nodes[source].transitions.push(index);
    }

    fn resolve_target(&self, source: NodeIndex, target: &str) -> Result<NodeIndex, CoreError> {
        let resolved = if let Some(id) = target.strip_prefix('#') {
            self.resolve_id_path(id)
        } else if let Some(path) = target.strip_prefix('.') {
            self.descend(source, path)
        } else {
            let base = self.nodes[source].parent.unwrap_or(source);
            self.descend(base, target)
        };

        resolved.ok_or_else(|| CoreError::UnknownTarget {
            from: self.nodes[source].id.clone(),
            target: target.to_string(),
        })
    }

    fn resolve_id_path(&self, id: &str) -> Option<NodeIndex> {
        if let Some(&index) = self.ids.get(id) {
            return Some(index);
        }
        let parts: Vec<&str> = id.split('.').collect();
        (1..parts.len()).rev().find_map(|i| {
            let base = *self.ids.get(&parts[..i].join("."))?;
            self.descend(base, &parts[i..].join("."))
        })
    }

    fn descend(&self, from: NodeIndex, path: &str) -> Option<NodeIndex> {
        let mut current = from;
        for key in path.split('.') {
            current = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].key == key)?;
        }
        Some(current)
    }
}

fn infer_kind(config: &StateNodeConfig, id: &str, is_root: bool) -> Result<StateKind, CoreError> {
    let has_children = config.states.as_ref().is_some_and(|s| !s.is_empty());
    let kind = match config.kind {
        Some(kind) => kind,
        None if config.history.is_some() => StateKind::History,
        None if has_children => StateKind::Compound,
        None => StateKind::Atomic,
    };

    let invalid = |reason: &str| CoreError::InvalidDefinition {
        reason: format!("state '{}' {}", id, reason),
    };
    match kind {
        StateKind::Compound | StateKind::Parallel if !has_children => {
            Err(invalid("has no child states"))
        }
        StateKind::Atomic | StateKind::Final | StateKind::History if has_children => {
            Err(invalid("cannot have child states"))
        }
        StateKind::Final | StateKind::History if is_root => {
            Err(invalid("cannot be the root state"))
        }
        kind => Ok(kind),
    }
}

fn compile_guard(config: &GuardConfig) -> Result<Guard, CoreError> {
    Ok(match config {
        GuardConfig::Named(name) => Guard::named(name.as_str()),
        GuardConfig::Expr { expr } => Guard::Expr(GuardExpr::parse(expr)?),
        GuardConfig::Not { not } => Guard::Not(Box::new(compile_guard(not)?)),
        GuardConfig::And { and } => {
            Guard::And(and.iter().map(compile_guard).collect::<Result<_, _>>()?)
        }
        GuardConfig::Or { or } => Guard::Or(or.iter().map(compile_guard).collect::<Result<_, _>>()?),
        GuardConfig::StateIn { state_in } => Guard::StateIn(state_in.clone()),
        GuardConfig::Parameterized { name, params } => Guard::Named {
            name: name.clone(),
            params: params.clone(),
        },
    })
}

fn compile_actions(configs: &[ActionConfig]) -> Result<Vec<Action>, CoreError> {
    configs.iter().map(compile_action).collect()
}

fn compile_action(config: &ActionConfig) -> Result<Action, CoreError> {
    let builtin = match config {
        ActionConfig::Named(name) => return Ok(Action::named(name.as_str())),
        ActionConfig::Parameterized { name, params } => {
            return Ok(Action::Named {
                name: name.clone(),
                params: params.clone(),
            })
        }
        ActionConfig::Builtin(builtin) => builtin,
    };

    Ok(match builtin {
        BuiltinActionConfig::Assign { assignment } => Action::Assign(Assignment::Keys(
            assignment
                .iter()
                .map(|(k, v)| (k.clone(), Assigner::Static(v.clone())))
                .collect(),
        )),
        BuiltinActionConfig::Raise { event, delay, id } => Action::Raise {
            event: EventExpr::Static(event.to_event()),
            delay: delay.as_ref().map(DelayConfig::to_delay),
            id: id.clone(),
        },
        BuiltinActionConfig::SendTo {
            to,
            event,
            delay,
            id,
        } => Action::SendTo {
            to: SendTarget::parse(to),
            event: EventExpr::Static(event.to_event()),
            delay: delay.as_ref().map(DelayConfig::to_delay),
            id: id.clone(),
        },
        BuiltinActionConfig::SendParent { event, delay, id } => Action::SendTo {
            to: SendTarget::Parent,
            event: EventExpr::Static(event.to_event()),
            delay: delay.as_ref().map(DelayConfig::to_delay),
            id: id.clone(),
        },
        BuiltinActionConfig::Log { label, message } => Action::Log {
            label: label.clone(),
            value: message.clone().map(ValueExpr::Static),
        },
        BuiltinActionConfig::Cancel { id } => Action::Cancel(id.clone()),
        BuiltinActionConfig::StopChild { id } => Action::Stop(id.clone()),
        BuiltinActionConfig::SpawnChild {
            src,
            id,
            system_id,
            input,
        } => Action::Spawn {
            src: LogicSource::Key(src.clone()),
            id: id.clone(),
            system_id: system_id.clone(),
            input: ValueExpr::Static(input.clone().unwrap_or(Value::Null)),
        },
        BuiltinActionConfig::Choose { branches } => Action::Choose(
            branches
                .iter()
                .map(|b| {
                    Ok(ChooseBranch {
                        guard: b.guard.as_ref().map(compile_guard).transpose()?,
                        actions: compile_actions(&b.actions)?,
                    })
                })
                .collect::<Result<_, CoreError>>()?,
        ),
    })
}
