//! Benchmarks the concurrent `reserve` path (spec §4.C) — the hardest
//! operation in this crate, since it must stay a bounded compare-and-swap loop
//! rather than degrade into lock contention under fan-out.

use std::sync::Arc;

use agentkern_gate::quota::{UsageKind, UsageTracker};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("quota_reserve");
    for fan_out in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(fan_out), &fan_out, |b, &fan_out| {
            b.iter(|| {
                let tracker = Arc::new(UsageTracker::new());
                tracker.set_quota("tenant-bench", UsageKind::Action, Some(1_000_000));
                std::thread::scope(|scope| {
                    for _ in 0..fan_out {
                        let tracker = tracker.clone();
                        scope.spawn(move || {
                            for _ in 0..1_000 {
                                let _ = tracker.reserve("tenant-bench", UsageKind::Action, 0, 0);
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reserve);
criterion_main!(benches);
