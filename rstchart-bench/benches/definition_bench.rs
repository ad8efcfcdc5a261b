//! Machine definition build benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rstchart_core::MachineDefinition;
use serde_json::{json, Value};

fn chain(n: usize) -> Value {
    let mut states = serde_json::Map::new();
    for i in 0..n {
        let next = format!("state_{}", (i + 1) % n);
        states.insert(
            format!("state_{}", i),
            json!({"on": {format!("NEXT_{}", i): next, "RESET": "#chain.state_0"}}),
        );
    }
    json!({"id": "chain", "initial": "state_0", "states": states})
}

fn nested_parallel(regions: usize) -> Value {
    let mut states = serde_json::Map::new();
    for r in 0..regions {
        states.insert(
            format!("region_{}", r),
            json!({
                "initial": "idle",
                "states": {
                    "idle": {"on": {format!("GO_{}", r): "busy"}},
                    "busy": {
                        "initial": "working",
                        "states": {
                            "working": {"after": {"100": "waiting"}},
                            "waiting": {"on": {"DONE": "finished"}},
                            "finished": {"type": "final"},
                            "hist": {"type": "history", "history": "deep"}
                        },
                        "onDone": "idle"
                    }
                }
            }),
        );
    }
    json!({"id": "parallel", "type": "parallel", "states": states})
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_build");

    let simple = json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": {"on": {"TIMER": "yellow"}},
            "yellow": {"on": {"TIMER": "red"}},
            "red": {"on": {"TIMER": "green"}}
        }
    });
    group.bench_function("simple", |b| {
        b.iter(|| black_box(MachineDefinition::from_json(&simple).unwrap()))
    });

    for size in [20, 200] {
        let def = chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &def, |b, def| {
            b.iter(|| black_box(MachineDefinition::from_json(def).unwrap()))
        });
    }

    for regions in [4, 16] {
        let def = nested_parallel(regions);
        group.bench_with_input(BenchmarkId::new("parallel", regions), &def, |b, def| {
            b.iter(|| black_box(MachineDefinition::from_json(def).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
