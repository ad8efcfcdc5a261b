//! End-to-end scenarios: machines running as actors.

use rstchart::{
    create_actor, Action, ActionError, ActorLogic, ActorOptions, ActorStatus, ClockKind, Event,
    Implementations, Machine, Observer, PersistedSnapshot, RuntimeConfig, SnapshotStatus,
    TaskLogic, TransitionLogic,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn simulated() -> RuntimeConfig {
    RuntimeConfig {
        clock: ClockKind::Simulated,
        ..Default::default()
    }
}

fn state_value(actor: &rstchart::ActorRef) -> Value {
    let snapshot = actor.get_snapshot();
    serde_json::to_value(&snapshot.as_machine().unwrap().value).unwrap()
}

fn traffic_light() -> Machine {
    Machine::from_json(&json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": {"on": {"TIMER": "yellow"}},
            "yellow": {"on": {"TIMER": "red"}},
            "red": {"on": {"TIMER": "green"}}
        }
    }))
    .unwrap()
}

#[test]
fn test_traffic_light_actor() {
    let actor = create_actor(Arc::new(traffic_light()), ActorOptions::new()).unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();
    actor.subscribe(move |_: &rstchart::ActorSnapshot| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    actor.start().unwrap();
    assert_eq!(state_value(&actor), json!("green"));

    actor.send("TIMER").unwrap();
    assert_eq!(state_value(&actor), json!("yellow"));
    actor.send("TIMER").unwrap();
    actor.send("TIMER").unwrap();
    assert_eq!(state_value(&actor), json!("green"));

    // one notification for start, one per event
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[test]
fn test_parallel_regions_through_actor() {
    let machine = Machine::from_json(&json!({
        "id": "editor",
        "type": "parallel",
        "states": {
            "bold": {
                "initial": "off",
                "states": {"off": {"on": {"BOLD": "on"}}, "on": {"on": {"BOLD": "off"}}}
            },
            "italic": {
                "initial": "off",
                "states": {"off": {"on": {"ITALIC": "on"}}, "on": {"on": {"ITALIC": "off"}}}
            }
        }
    }))
    .unwrap();
    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();

    actor.send("BOLD").unwrap();
    assert_eq!(state_value(&actor), json!({"bold": "on", "italic": "off"}));
    actor.send("ITALIC").unwrap();
    actor.send("BOLD").unwrap();
    assert_eq!(state_value(&actor), json!({"bold": "off", "italic": "on"}));
}

#[test]
fn test_delayed_transition_on_simulated_clock() {
    let machine = Machine::from_json(&json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": {"after": {"100": "yellow"}, "on": {"SKIP": "red"}},
            "yellow": {},
            "red": {}
        }
    }))
    .unwrap();
    let actor = create_actor(Arc::new(machine), ActorOptions::new().with_config(simulated())).unwrap();
    actor.start().unwrap();
    let system = actor.system().clone();
    assert_eq!(system.pending_timers(), 1);

    system.advance(99).unwrap();
    assert_eq!(state_value(&actor), json!("green"));
    system.advance(1).unwrap();
    assert_eq!(state_value(&actor), json!("yellow"));
    assert_eq!(system.pending_timers(), 0);
}

#[test]
fn test_leaving_state_cancels_its_delays() {
    let machine = Machine::from_json(&json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": {"after": {"100": "yellow"}, "on": {"SKIP": "red"}},
            "yellow": {},
            "red": {}
        }
    }))
    .unwrap();
    let actor = create_actor(Arc::new(machine), ActorOptions::new().with_config(simulated())).unwrap();
    actor.start().unwrap();
    actor.send("SKIP").unwrap();

    let system = actor.system().clone();
    system.advance(500).unwrap();
    assert_eq!(state_value(&actor), json!("red"));
    assert_eq!(system.pending_timers(), 0);
}

#[test]
fn test_invoked_task_completes_once() {
    let done = Arc::new(AtomicUsize::new(0));
    let d = done.clone();
    let machine = Machine::from_json(&json!({
        "id": "loader",
        "initial": "loading",
        "states": {
            "loading": {
                "invoke": {"id": "fetch", "src": "fetch", "onDone": {"target": "ready", "actions": "count"}}
            },
            "ready": {}
        }
    }))
    .unwrap()
    .provide(
        Implementations::new()
            .with_actor(
                "fetch",
                Arc::new(TaskLogic::new(|_, _| Ok(json!({"items": 3})))),
            )
            .with_action(
                "count",
                Action::custom(move |_| {
                    d.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ),
    );

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();

    assert_eq!(state_value(&actor), json!("ready"));
    assert_eq!(done.load(Ordering::SeqCst), 1);
    let snapshot = actor.get_snapshot();
    assert!(snapshot.as_machine().unwrap().children.is_empty());
    // the parent and nothing else
    assert_eq!(actor.system().actor_count(), 1);
}

#[test]
fn test_failed_child_reaches_parent_as_error_platform() {
    let machine = Machine::from_json(&json!({
        "id": "loader",
        "initial": "loading",
        "states": {
            "loading": {"invoke": {"id": "fetch", "src": "fetch", "onError": "failed"}},
            "failed": {}
        }
    }))
    .unwrap()
    .provide(Implementations::new().with_actor(
        "fetch",
        Arc::new(TaskLogic::new(|_, _| Err(ActionError::new("offline")))),
    ));

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    assert_eq!(state_value(&actor), json!("failed"));
    assert_eq!(actor.status(), ActorStatus::Running);
}

#[test]
fn test_assign_error_goes_to_error_observer() {
    let machine = Machine::from_json(&json!({
        "id": "m",
        "initial": "idle",
        "states": {"idle": {"on": {"GO": {"actions": "explode"}}}}
    }))
    .unwrap()
    .provide(Implementations::new().with_action(
        "explode",
        Action::assign(|_| Err(ActionError::new("boom"))),
    ));

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    actor.subscribe(Observer::new().on_error(move |_| {
        e.fetch_add(1, Ordering::SeqCst);
    }));
    actor.start().unwrap();

    assert!(actor.send("GO").is_ok());
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(actor.get_snapshot().status(), SnapshotStatus::Error);
    assert_eq!(actor.status(), ActorStatus::Stopped);
}

#[test]
fn test_unobserved_root_error_is_returned() {
    let machine = Machine::from_json(&json!({
        "id": "m",
        "initial": "idle",
        "states": {"idle": {"on": {"GO": {"actions": "explode"}}}}
    }))
    .unwrap()
    .provide(Implementations::new().with_action(
        "explode",
        Action::assign(|_| Err(ActionError::new("boom"))),
    ));

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    assert!(actor.send("GO").is_err());
}

#[test]
fn test_child_round_trip() {
    let echo = TransitionLogic::new(json!(0), |state, event, scope| {
        if event.name == "PING" {
            let n = state.as_i64().unwrap_or(0) + 1;
            scope.send_parent(Event::new("PONG").with_data(json!(n)));
            return json!(n);
        }
        state.clone()
    });
    let machine = Machine::from_json(&json!({
        "id": "parent",
        "context": {"pongs": 0},
        "initial": "running",
        "states": {
            "running": {
                "entry": {"type": "spawnChild", "src": "echo", "id": "echo"},
                "on": {
                    "SEND": {"actions": {"type": "sendTo", "to": "echo", "event": "PING"}},
                    "PONG": {"actions": "record"}
                }
            }
        }
    }))
    .unwrap()
    .provide(
        Implementations::new()
            .with_actor("echo", Arc::new(echo))
            .with_action(
                "record",
                Action::assign_key("pongs", |args| Ok(args.event.data.clone())),
            ),
    );

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    actor.send("SEND").unwrap();
    actor.send("SEND").unwrap();

    assert_eq!(actor.get_snapshot().context(), &json!({"pongs": 2}));
    let children = actor.get_snapshot().children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].get_snapshot().context(), &json!(2));
    assert_eq!(children[0].parent_session(), Some(actor.session_id()));
}

#[test]
fn test_stop_cascades_to_children() {
    let child = Machine::from_json(&json!({
        "id": "child",
        "initial": "busy",
        "states": {"busy": {}}
    }))
    .unwrap();
    let machine = Machine::from_json(&json!({
        "id": "parent",
        "initial": "running",
        "states": {"running": {"invoke": {"id": "worker", "src": "worker"}}}
    }))
    .unwrap()
    .provide(Implementations::new().with_actor("worker", Arc::new(child)));

    let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    let children = actor.get_snapshot().children();
    assert_eq!(children.len(), 1);
    let worker = children[0].clone();
    assert_eq!(worker.status(), ActorStatus::Running);

    actor.stop().unwrap();
    assert_eq!(actor.status(), ActorStatus::Stopped);
    assert_eq!(worker.status(), ActorStatus::Stopped);
    assert_eq!(worker.get_snapshot().status(), SnapshotStatus::Stopped);
    assert!(actor.system().lookup(worker.session_id()).is_none());
}

#[test]
fn test_same_events_same_snapshots() {
    let events = ["TIMER", "NOPE", "TIMER", "TIMER", "TIMER"];
    let run = || {
        let actor = create_actor(Arc::new(traffic_light()), ActorOptions::new()).unwrap();
        actor.start().unwrap();
        let mut values = Vec::new();
        for event in events {
            actor.send(event).unwrap();
            values.push(state_value(&actor));
        }
        values
    };
    assert_eq!(run(), run());
}

#[test]
fn test_persist_and_resume_with_children() {
    let counter = TransitionLogic::new(json!(0), |state, event, _| match event.name.as_str() {
        "INC" => json!(state.as_i64().unwrap_or(0) + 1),
        _ => state.clone(),
    });
    let machine = Machine::from_json(&json!({
        "id": "parent",
        "context": {"label": "x"},
        "initial": "idle",
        "states": {
            "idle": {"on": {"GO": "active"}},
            "active": {
                "invoke": {"id": "counter", "src": "counter"},
                "on": {"BUMP": {"actions": {"type": "sendTo", "to": "counter", "event": "INC"}}}
            }
        }
    }))
    .unwrap()
    .provide(Implementations::new().with_actor("counter", Arc::new(counter)));
    let machine = Arc::new(machine);

    let actor = create_actor(machine.clone(), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    actor.send("GO").unwrap();
    actor.send("BUMP").unwrap();
    actor.send("BUMP").unwrap();

    let persisted = actor.persisted().unwrap();
    assert_eq!(persisted.children["counter"].snapshot.context, json!(2));
    let json = serde_json::to_string(&persisted).unwrap();
    actor.stop().unwrap();

    let parsed: PersistedSnapshot = serde_json::from_str(&json).unwrap();
    let resumed = create_actor(machine, ActorOptions::new().with_snapshot(parsed)).unwrap();
    resumed.start().unwrap();
    assert_eq!(state_value(&resumed), json!("active"));
    assert_eq!(resumed.get_snapshot().context(), &json!({"label": "x"}));

    resumed.send("BUMP").unwrap();
    let children = resumed.get_snapshot().children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].get_snapshot().context(), &json!(3));
}

#[test]
fn test_machine_as_pure_function_matches_actor() {
    let machine = traffic_light();
    let actor = create_actor(Arc::new(machine.clone()), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    actor.send("TIMER").unwrap();

    let mut scope = rstchart::ActorScope::detached(actor.system(), "light");
    let initial = machine.initial_state(&mut scope, &Value::Null).unwrap();
    let next = machine
        .transition(&initial, &Event::new("TIMER"), &mut scope)
        .unwrap();
    assert_eq!(serde_json::to_value(&next.value).unwrap(), state_value(&actor));
    assert_eq!(machine.kind(), "machine");
}
