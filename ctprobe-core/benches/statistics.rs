use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ctprobe_core::{evaluate, Class, PercentileLadder, TestSet, VerdictThresholds};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn batch(len: usize, seed: u64) -> (Vec<i64>, Vec<Class>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let exec_times = (0..len).map(|_| 200 + rng.gen_range(0..40)).collect();
    let classes = (0..len).map(|_| Class::from_bit(rng.gen())).collect();
    (exec_times, classes)
}

fn bench_update_statistics(c: &mut Criterion) {
    let (exec_times, classes) = batch(9_800, 1);
    let ladder = PercentileLadder::from_exec_times(&exec_times, 100);

    c.bench_function("update_statistics/9800x102", |b| {
        let mut tests = TestSet::new(100, 0);
        b.iter(|| tests.update_statistics(black_box(&exec_times), black_box(&classes), &ladder))
    });
}

fn bench_percentile_ladder(c: &mut Criterion) {
    let (exec_times, _) = batch(9_800, 2);

    c.bench_function("percentile_ladder/9800", |b| {
        b.iter(|| PercentileLadder::from_exec_times(black_box(&exec_times), 100))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let (exec_times, classes) = batch(20_000, 3);
    let ladder = PercentileLadder::from_exec_times(&exec_times, 100);
    let mut tests = TestSet::new(100, 0);
    tests.update_statistics(&exec_times, &classes, &ladder);
    let thresholds = VerdictThresholds::default();

    c.bench_function("evaluate/102", |b| {
        b.iter(|| evaluate(black_box(&tests), &thresholds))
    });
}

criterion_group!(
    benches,
    bench_update_statistics,
    bench_percentile_ladder,
    bench_evaluate
);
criterion_main!(benches);
