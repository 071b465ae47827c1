//! Riposte Benchmark Suite
//!
//! Hot paths on the combat tick and the progression worker:
//!   parry_classify ................. pure timing classification
//!   parry_activate_resolve ......... full activate + resolve round trip
//!   aggregate_batch_500 ............ claim and fold 500 events
//!   progression_cycle_200 .......... aggregate + evaluate 200 events

use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use serde_json::Map;

use riposte_core::achievements::AchievementCatalog;
use riposte_core::clock::ManualClock;
use riposte_core::config::{ParryConfig, PersistenceConfig};
use riposte_core::events::{EventDispatcher, EventKind};
use riposte_core::parry::{ParryEngine, classify};
use riposte_core::progression::Progression;
use riposte_core::stats::StatAggregator;
use riposte_core::store::Store;
use riposte_core::telemetry::NullSink;
use riposte_core::types::{TargetId, UserId};

fn store() -> Arc<Store> {
    Arc::new(Store::open_in_memory(&PersistenceConfig::default(), Arc::new(NullSink)).expect("open"))
}

fn seeded(events: usize) -> Arc<Store> {
    let store = store();
    let dispatcher = EventDispatcher::new(Arc::clone(&store));
    let kinds = [EventKind::Kill, EventKind::ParrySuccess, EventKind::GoldSpent, EventKind::DamageDealt];
    for i in 0..events {
        let user = UserId(i64::try_from(i % 20).expect("small"));
        dispatcher
            .log(kinds[i % kinds.len()].clone(), user, 1.0, Map::new())
            .expect("log");
    }
    store
}

fn bench_classify(c: &mut Criterion) {
    let config = ParryConfig::default();
    c.bench_function("parry_classify", |b| {
        b.iter(|| {
            for reaction in (0..3000).step_by(50) {
                black_box(classify(black_box(reaction), &config));
            }
        });
    });
}

fn bench_activate_resolve(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let engine = ParryEngine::with_clock(store(), ParryConfig::default(), clock.clone()).expect("engine");
    let mut user = 0_i64;

    c.bench_function("parry_activate_resolve", |b| {
        b.iter(|| {
            user = (user + 1) % 1000;
            engine.activate(UserId(user), TargetId(1)).expect("activate");
            let at = engine.now() + chrono::Duration::milliseconds(150);
            let outcome = engine
                .resolve(UserId(user), TargetId(1), black_box(50.0), at)
                .expect("resolve");
            black_box(outcome);
        });
    });
}

fn bench_aggregate_batch(c: &mut Criterion) {
    c.bench_function("aggregate_batch_500", |b| {
        b.iter_batched(
            || StatAggregator::new(seeded(500)),
            |aggregator| black_box(aggregator.run_once(500).expect("aggregate")),
            BatchSize::LargeInput,
        );
    });
}

fn bench_progression_cycle(c: &mut Criterion) {
    let catalog = Arc::new(AchievementCatalog::builtin());
    c.bench_function("progression_cycle_200", |b| {
        b.iter_batched(
            || Progression::new(seeded(200), Arc::clone(&catalog)),
            |progression| black_box(progression.run_cycle(200).expect("cycle")),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_activate_resolve,
    bench_aggregate_batch,
    bench_progression_cycle,
);
criterion_main!(benches);
