//! Benchmarks for the per-chunk data path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sweepctl::config::{AcquisitionSettings, AnalogChannel};
use sweepctl::stream::{ContinuityValidator, ScalingStage};
use sweepctl::types::{IncrementalStats, Matrix};

fn settings(channels: usize) -> AcquisitionSettings {
    AcquisitionSettings {
        channels: (0..channels)
            .map(|i| AnalogChannel::new(format!("AI{}", i)).with_scale(0.1, "mV"))
            .collect(),
        ..Default::default()
    }
}

fn raw_chunk(scans: usize, channels: usize) -> Matrix<i16> {
    let data = (0..scans * channels)
        .map(|i| ((i * 37) % 65_536) as i32 - 32_768)
        .map(|v| v as i16)
        .collect();
    Matrix::new(scans, channels, data).unwrap()
}

fn bench_linear_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_scaling");

    for scans in [100, 1_000, 10_000].iter() {
        let stage = ScalingStage::from_settings(&settings(8));
        let chunk = raw_chunk(*scans, 8);

        group.throughput(Throughput::Elements((*scans * 8) as u64));
        group.bench_with_input(BenchmarkId::new("8ch", scans), &chunk, |b, chunk| {
            b.iter(|| black_box(stage.process(chunk).unwrap()));
        });
    }

    group.finish();
}

fn bench_polynomial_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("polynomial_scaling");

    let mut acq = settings(8);
    for channel in acq.channels.iter_mut() {
        channel.coefficients = Some(vec![0.5, 1.0, 1e-3, 1e-6]);
    }
    let stage = ScalingStage::from_settings(&acq);
    let chunk = raw_chunk(1_000, 8);

    group.throughput(Throughput::Elements(8_000));
    group.bench_function("cubic_8ch_1000", |b| {
        b.iter(|| black_box(stage.process(&chunk).unwrap()));
    });

    group.finish();
}

fn bench_inactive_columns(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_selection");

    let mut acq = settings(16);
    for channel in acq.channels.iter_mut().skip(1).step_by(2) {
        channel.active = false;
    }
    let stage = ScalingStage::from_settings(&acq);
    let chunk = raw_chunk(1_000, 16);

    group.bench_function("half_active_16ch", |b| {
        b.iter(|| black_box(stage.process(&chunk).unwrap()));
    });

    group.finish();
}

fn bench_continuity(c: &mut Criterion) {
    c.bench_function("continuity_accept", |b| {
        let mut validator = ContinuityValidator::new();
        let mut index = 0u64;
        b.iter(|| {
            validator.accept(black_box(index), 100).unwrap();
            index += 100;
        });
    });
}

fn bench_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_stats");

    for size in [1_000, 100_000].iter() {
        let data: Vec<f64> = (0..*size).map(|i| (i as f64 * 0.01).sin()).collect();
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("push", size), &data, |b, data| {
            b.iter(|| {
                let mut stats = IncrementalStats::new();
                for &v in data {
                    stats.push(v);
                }
                black_box(stats.average())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_linear_scaling,
    bench_polynomial_scaling,
    bench_inactive_columns,
    bench_continuity,
    bench_statistics,
);
criterion_main!(benches);
