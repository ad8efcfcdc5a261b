//! Named implementations supplied by the embedder.

use crate::action::{Action, ActionArgs, DelayFn};
use crate::actor::ActorLogic;
use crate::guard::{GuardArgs, GuardFn};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds the initial context from the actor input.
pub type ContextFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Actions, guards, delays and actor logics referenced by name from a
/// machine definition.
#[derive(Clone, Default)]
pub struct Implementations {
    pub actions: HashMap<String, Action>,
    pub guards: HashMap<String, GuardFn>,
    pub delays: HashMap<String, DelayFn>,
    pub actors: HashMap<String, Arc<dyn ActorLogic>>,
    pub context: Option<ContextFn>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn with_guard<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&GuardArgs<'_>) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_delay<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> u64 + Send + Sync + 'static,
    {
        self.delays.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_actor(mut self, name: impl Into<String>, logic: Arc<dyn ActorLogic>) -> Self {
        self.actors.insert(name.into(), logic);
        self
    }

    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(f));
        self
    }

    /// Returns a copy where entries from `other` replace entries of the same
    /// name.
    pub fn merged(&self, other: Implementations) -> Self {
        let mut merged = self.clone();
        merged.actions.extend(other.actions);
        merged.guards.extend(other.guards);
        merged.delays.extend(other.delays);
        merged.actors.extend(other.actors);
        if other.context.is_some() {
            merged.context = other.context;
        }
        merged
    }
}

impl fmt::Debug for Implementations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a String> {
            let mut names: Vec<&String> = keys.collect();
            names.sort();
            names
        }
        f.debug_struct("Implementations")
            .field("actions", &sorted(self.actions.keys()))
            .field("guards", &sorted(self.guards.keys()))
            .field("delays", &sorted(self.delays.keys()))
            .field("actors", &sorted(self.actors.keys()))
            .field("context", &self.context.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merged_overrides_by_name() {
        let base = Implementations::new()
            .with_action("a", Action::log("base"))
            .with_guard("g", |_| false);
        let merged = base.merged(
            Implementations::new()
                .with_guard("g", |_| true)
                .with_context(|input| json!({"seed": input})),
        );

        assert!(merged.actions.contains_key("a"));
        let event = crate::event::Event::new("E");
        let args = GuardArgs {
            context: &Value::Null,
            event: &event,
            params: &Value::Null,
        };
        assert!((merged.guards["g"])(&args));
        let context = merged.context.as_ref().map(|f| f(&json!(3)));
        assert_eq!(context, Some(json!({"seed": 3})));
        assert!(!(base.guards["g"])(&args));
    }
}
