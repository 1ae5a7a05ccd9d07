use chrono::{DateTime, Duration};
use criterion::{Criterion, criterion_group, criterion_main};
use letracker::{
    AttemptEvent, FixedClock, HistoryRecord, MemoryRepository, Outcome, ReviewConfig,
    ReviewService, Scheduler, replay,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const START: i64 = 1_600_000_000;

fn history(rng: &mut StdRng, slugs: usize, per_slug: usize) -> Vec<HistoryRecord> {
    (0..slugs)
        .flat_map(|slug| (0..per_slug).map(move |n| (slug, n)))
        .map(|(slug, _)| HistoryRecord {
            title: format!("Problem {slug}"),
            slug: format!("problem-{slug}"),
            status: if rng.random_bool(0.8) {
                "Accepted".into()
            } else {
                "Wrong Answer".into()
            },
            timestamp: START + rng.random_range(0..3 * 365 * 86_400),
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let events: Vec<AttemptEvent> = (0..500)
        .map(|_| AttemptEvent {
            slug: "two-sum".into(),
            title: "Two Sum".into(),
            outcome: if rng.random_bool(0.8) {
                Outcome::Accepted
            } else {
                Outcome::Rejected
            },
            timestamp: DateTime::from_timestamp(START, 0).unwrap()
                + Duration::hours(rng.random_range(0..3 * 365 * 24)),
        })
        .collect();
    let scheduler = Scheduler::default();
    c.bench_function("replay_500_events", |b| {
        b.iter(|| black_box(replay(&scheduler, "user", 1, &events, &mut rng).unwrap()))
    });

    let records = history(&mut rng, 300, 20);
    c.bench_function("import_300_items", |b| {
        b.iter(|| {
            let service = ReviewService::with_clock(
                MemoryRepository::new(),
                FixedClock(DateTime::from_timestamp(START + 4 * 365 * 86_400, 0).unwrap()),
                Scheduler::default(),
                ReviewConfig {
                    seed: Some(7),
                    ..Default::default()
                },
            );
            black_box(service.import_history("user", records.clone()).unwrap())
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
