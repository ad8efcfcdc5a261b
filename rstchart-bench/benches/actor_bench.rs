//! Actor send benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rstchart_core::{
    create_actor, ActorOptions, Implementations, Machine, TransitionLogic,
};
use serde_json::json;
use std::sync::Arc;

fn parent_with_child() -> Machine {
    let echo = TransitionLogic::new(json!(0), |state, event, scope| {
        if event.name == "PING" {
            scope.send_parent("PONG");
        }
        state.clone()
    });
    Machine::from_json(&json!({
        "id": "parent",
        "initial": "running",
        "states": {
            "running": {
                "entry": {"type": "spawnChild", "src": "echo", "id": "echo"},
                "on": {
                    "SEND": {"actions": {"type": "sendTo", "to": "echo", "event": "PING"}},
                    "PONG": {}
                }
            }
        }
    }))
    .unwrap()
    .provide(Implementations::new().with_actor("echo", Arc::new(echo)))
}

fn bench_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("actor_send");
    group.throughput(Throughput::Elements(1));

    let light = Machine::from_json(&json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": {"on": {"TIMER": "yellow"}},
            "yellow": {"on": {"TIMER": "red"}},
            "red": {"on": {"TIMER": "green"}}
        }
    }))
    .unwrap();
    let actor = create_actor(Arc::new(light), ActorOptions::new()).unwrap();
    actor.start().unwrap();
    group.bench_function("root", |b| {
        b.iter(|| black_box(actor.send("TIMER").unwrap()))
    });

    let parent = create_actor(Arc::new(parent_with_child()), ActorOptions::new()).unwrap();
    parent.start().unwrap();
    group.bench_function("child_round_trip", |b| {
        b.iter(|| black_box(parent.send("SEND").unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_send);
criterion_main!(benches);
