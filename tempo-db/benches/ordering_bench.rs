//! Ordering-choice enumeration on a long timeline.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use tempo_db::{PlanDatabase, TokenSpec};

/// A timeline with `n` back-to-back tokens already sequenced, plus one free
/// token whose slots we enumerate.
fn build_timeline(n: usize) -> (PlanDatabase, tempo_core::keys::TokenKey) {
    let mut db = PlanDatabase::new();
    db.register_object_type("Machine", None, true).unwrap();
    let tl = db.create_closed_object("Machine", "m1").unwrap();

    let mut prev = None;
    for i in 0..n {
        let t0 = (i * 10) as i64;
        let tok = db
            .create_token(TokenSpec::interval(
                "Machine",
                "Run",
                (t0, t0),
                (t0 + 5, t0 + 5),
                (5, 5),
            ))
            .unwrap();
        db.activate(tok).unwrap();
        match prev {
            None => db.constrain(tl, tok, tok).unwrap(),
            Some(p) => db.constrain(tl, p, tok).unwrap(),
        }
        prev = Some(tok);
    }

    let free = db
        .create_token(TokenSpec::interval(
            "Machine",
            "Run",
            (0, (n * 10) as i64),
            (0, (n * 10) as i64),
            (1, 3),
        ))
        .unwrap();
    db.activate(free).unwrap();
    db.propagate().unwrap();
    (db, free)
}

fn ordering_choices(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering_choices");
    for n in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (mut db, free) = build_timeline(n);
            b.iter(|| {
                let choices = db.ordering_choices(free, usize::MAX).unwrap();
                std::hint::black_box(choices)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, ordering_choices);
criterion_main!(benches);
