//! Hot-path benchmarks: feature extraction and window scoring.
//!
//! Run with `cargo bench -p vigil-engine --bench scoring`.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vigil_engine::{
    build_detector, extract, AnomalyScorer, CancellationFlag, ScoringConfig, SystemClock,
};
use vigil_types::{DetectorKind, Model, ModelVersion, Record, SeriesKey, Window, WindowId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// Deterministic window of `len` records oscillating around `center`.
fn window(id: u64, len: usize, center: f64) -> Window {
    let key = SeriesKey::new("bench.series");
    let start = t0() + Duration::minutes(id as i64);
    let records = (0..len)
        .map(|i| {
            let value = center + ((i as f64 + id as f64) * 0.37).sin();
            Record::new(key.clone(), start + Duration::milliseconds(i as i64), value)
        })
        .collect();
    Window::sealed(key, WindowId(id), start, start + Duration::minutes(1), records)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    for len in [10usize, 100, 1_000, 10_000] {
        let w = window(0, len, 50.0);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &w, |b, w| {
            b.iter(|| extract(black_box(w)))
        });
    }
    group.finish();
}

fn bench_score(c: &mut Criterion) {
    let config = ScoringConfig::default();
    let scorer = AnomalyScorer::new(config.clone(), Arc::new(SystemClock));
    let history: Vec<_> = (0..500).map(|i| extract(&window(i, 60, 50.0))).collect();
    let candidate = extract(&window(501, 60, 55.0));

    let mut baseline = scorer.new_baseline(&candidate.series);
    for fv in &history {
        baseline.observe(fv);
    }

    let mut group = c.benchmark_group("score");
    group.bench_function("baseline", |b| {
        b.iter(|| scorer.score(black_box(&candidate), None, black_box(&baseline)))
    });

    for kind in [DetectorKind::RobustZScore, DetectorKind::GaussianEnsemble] {
        let detector = build_detector(kind, &config, 64);
        let params = match detector.train(&history, &CancellationFlag::new()) {
            Ok(params) => params,
            Err(e) => panic!("training {kind} failed: {e}"),
        };
        let model = Model::new(
            candidate.series.clone(),
            ModelVersion(1),
            t0(),
            history.len(),
            0.8,
            params,
        );
        group.bench_function(BenchmarkId::new("model", kind), |b| {
            b.iter(|| scorer.score(black_box(&candidate), Some(&model), black_box(&baseline)))
        });
    }
    group.finish();
}

fn bench_train(c: &mut Criterion) {
    let config = ScoringConfig::default();
    let mut group = c.benchmark_group("train");
    for windows in [50u64, 500] {
        let history: Vec<_> = (0..windows).map(|i| extract(&window(i, 60, 50.0))).collect();
        for kind in [DetectorKind::RobustZScore, DetectorKind::GaussianEnsemble] {
            let detector = build_detector(kind, &config, 64);
            group.bench_with_input(BenchmarkId::new(kind.to_string(), windows), &history, |b, h| {
                b.iter(|| detector.train(black_box(h), &CancellationFlag::new()))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_extract, bench_score, bench_train);
criterion_main!(benches);
