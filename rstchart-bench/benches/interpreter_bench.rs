//! Macrostep throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rstchart_core::{
    ActorScope, Event, Machine, MachineSnapshot, RuntimeConfig, System,
};
use serde_json::{json, Value};

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

fn parallel(regions: usize) -> Machine {
    let mut states = serde_json::Map::new();
    for r in 0..regions {
        states.insert(
            format!("r{}", r),
            json!({
                "initial": "off",
                "states": {
                    "off": {"on": {"TOGGLE": "on"}},
                    "on": {"on": {"TOGGLE": "off"}}
                }
            }),
        );
    }
    Machine::from_json(&json!({"id": "switches", "type": "parallel", "states": states})).unwrap()
}

fn run(machine: &Machine, scope: &mut ActorScope, start: &MachineSnapshot, event: &Event, n: usize) {
    let mut snapshot = start.clone();
    for _ in 0..n {
        snapshot = machine.transition(&snapshot, event, scope).unwrap();
    }
    black_box(snapshot);
}

fn bench_macrostep(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter_macrostep");
    let system = System::new(RuntimeConfig::default());
    let mut scope = ActorScope::detached(&system, "bench");

    let light = traffic_light();
    let initial = light.initial_state(&mut scope, &Value::Null).unwrap();
    let timer = Event::new("TIMER");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("traffic_light", |b| {
        b.iter(|| run(&light, &mut scope, &initial, &timer, 1000))
    });

    let toggle = Event::new("TOGGLE");
    for regions in [2, 8, 32] {
        let machine = parallel(regions);
        let initial = machine.initial_state(&mut scope, &Value::Null).unwrap();
        group.bench_with_input(BenchmarkId::new("parallel", regions), &regions, |b, _| {
            b.iter(|| run(&machine, &mut scope, &initial, &toggle, 1000))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_macrostep);
criterion_main!(benches);
