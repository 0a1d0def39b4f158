//! Benchmarks for whole-stream writing and reading
//!
//! Measures formatter and handler throughput on synthetic time series and
//! spectrograms, in binary and ASCII transfer.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use qstream::FormatterConfig;
use qstream::test_utils::{
    read_back, sample_spectrogram, sample_time_series, to_stream_bytes_with,
};
use std::hint::black_box;

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");

    for records in [1_000usize, 10_000] {
        let series = sample_time_series(records);
        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::new("binary", records), &series, |b, ds| {
            b.iter(|| {
                black_box(to_stream_bytes_with(ds, FormatterConfig::default()).expect("format"))
            })
        });
        group.bench_with_input(BenchmarkId::new("ascii", records), &series, |b, ds| {
            b.iter(|| {
                black_box(to_stream_bytes_with(ds, FormatterConfig::ascii()).expect("format"))
            })
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    let time_series = sample_time_series(10_000);
    let series = to_stream_bytes_with(&time_series, FormatterConfig::default()).expect("format");
    group.throughput(Throughput::Bytes(series.len() as u64));
    group.bench_function("time_series_binary", |b| {
        b.iter(|| black_box(read_back(&series).expect("read")))
    });

    let ascii = to_stream_bytes_with(&time_series, FormatterConfig::ascii()).expect("format");
    group.throughput(Throughput::Bytes(ascii.len() as u64));
    group.bench_function("time_series_ascii", |b| {
        b.iter(|| black_box(read_back(&ascii).expect("read")))
    });

    let spectrogram =
        to_stream_bytes_with(&sample_spectrogram(1_000, 32), FormatterConfig::default())
            .expect("format");
    group.throughput(Throughput::Bytes(spectrogram.len() as u64));
    group.bench_function("spectrogram_binary", |b| {
        b.iter(|| black_box(read_back(&spectrogram).expect("read")))
    });

    group.finish();
}

criterion_group!(benches, bench_format, bench_read);
criterion_main!(benches);
