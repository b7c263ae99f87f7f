use criterion::{criterion_group, criterion_main, Criterion};
use scribble_core::snapshot::{parse_cursors, parse_stroke_set};
use serde_json::{json, Map, Value};
use std::hint::black_box;

/// `users` namespaces of `strokes_per_user` strokes with 64 points each.
fn stroke_snapshot(users: usize, strokes_per_user: usize) -> Value {
    let mut root = Map::new();
    for u in 0..users {
        let owner = format!("user{u}");
        let mut strokes = Map::new();
        for s in 0..strokes_per_user {
            let points: Vec<Value> = (0..64)
                .map(|i| json!({ "x": i as f64 * 3.0, "y": s as f64 }))
                .collect();
            strokes.insert(
                format!("stroke{s}"),
                json!({ "userId": owner, "points": points, "timestamp": 1_700_000_000_000i64 }),
            );
        }
        root.insert(owner, Value::Object(strokes));
    }
    Value::Object(root)
}

fn bench_parse_stroke_set(c: &mut Criterion) {
    let snapshot = stroke_snapshot(20, 50);
    c.bench_function("parse_stroke_set_1k_strokes", |b| {
        b.iter(|| black_box(parse_stroke_set(black_box(&snapshot))))
    });
}

fn bench_parse_cursors(c: &mut Criterion) {
    let mut root = Map::new();
    for u in 0..100 {
        root.insert(
            format!("user{u}"),
            json!({ "x": 10.0, "y": 20.0, "email": "user@example.com", "timestamp": 1i64 }),
        );
    }
    let snapshot = Value::Object(root);
    c.bench_function("parse_cursors_100_peers", |b| {
        b.iter(|| black_box(parse_cursors(black_box(&snapshot))))
    });
}

criterion_group!(benches, bench_parse_stroke_set, bench_parse_cursors);
criterion_main!(benches);
