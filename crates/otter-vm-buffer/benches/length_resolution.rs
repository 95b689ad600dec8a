//! Length Resolution Benchmarks
//!
//! Measures the per-access cost of resolving typed array lengths over fixed,
//! resizable and growable shared buffers, and of extension sweeps.
//!
//! Run with: `cargo bench -p otter-vm-buffer length`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use otter_vm_buffer::{Isolate, IsolateConfig, JsArrayBuffer, JsTypedArray, TypedArrayKind};
use otter_vm_gc::SweepScope;
use std::hint::black_box;
use std::sync::Arc;

fn create_isolate() -> Arc<Isolate> {
    Isolate::new(IsolateConfig::default())
}

/// GetLengthOrOutOfBounds for each buffer flavor
fn length_or_out_of_bounds_benchmark(c: &mut Criterion) {
    let isolate = create_isolate();
    let mut group = c.benchmark_group("length_or_out_of_bounds");

    let fixed = JsArrayBuffer::allocate(&isolate, 4096).unwrap();
    let resizable = JsArrayBuffer::allocate_resizable(&isolate, 4096, 8192).unwrap();
    let growable = JsArrayBuffer::allocate_growable_shared(&isolate, 4096, 8192).unwrap();

    let views = [
        (
            "fixed",
            JsTypedArray::new(fixed, TypedArrayKind::Float64, 0, None).unwrap(),
        ),
        (
            "rab_fixed",
            JsTypedArray::new(resizable.clone(), TypedArrayKind::Float64, 8, Some(256)).unwrap(),
        ),
        (
            "rab_tracking",
            JsTypedArray::new(resizable, TypedArrayKind::Float64, 8, None).unwrap(),
        ),
        (
            "gsab_tracking",
            JsTypedArray::new(growable, TypedArrayKind::Float64, 8, None).unwrap(),
        ),
    ];

    for (name, view) in views.iter() {
        group.bench_with_input(BenchmarkId::new("view", name), view, |b, view| {
            b.iter(|| black_box(view.get_length_or_out_of_bounds()))
        });
    }

    group.finish();
}

/// SeqCst length loads on a growable shared buffer
fn gsab_length_benchmark(c: &mut Criterion) {
    let isolate = create_isolate();
    let buffer = JsArrayBuffer::allocate_growable_shared(&isolate, 1024, 1 << 20).unwrap();
    let view = JsTypedArray::new(buffer.clone(), TypedArrayKind::Uint32, 0, None).unwrap();
    let mut group = c.benchmark_group("gsab_length");

    group.bench_function("gsab_byte_length", |b| {
        b.iter(|| black_box(buffer.gsab_byte_length()))
    });

    group.bench_function("length_tracking_gsab_backed_length", |b| {
        b.iter(|| black_box(view.length_tracking_gsab_backed_length()))
    });

    group.finish();
}

/// Young sweep over registered extensions, half of them live
fn extension_sweep_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("extension_sweep");

    for num_buffers in [100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("buffers", num_buffers),
            num_buffers,
            |b, &n| {
                b.iter_custom(|iters| {
                    let mut total_duration = std::time::Duration::ZERO;

                    for _ in 0..iters {
                        let isolate = create_isolate();
                        // Even-indexed buffers stay reachable, odd ones become garbage
                        let buffers: Vec<_> = (0..n)
                            .map(|_| JsArrayBuffer::allocate(&isolate, 64).unwrap())
                            .enumerate()
                            .filter_map(|(i, buffer)| (i % 2 == 0).then_some(buffer))
                            .collect();
                        for buffer in &buffers {
                            buffer.young_mark_extension();
                        }

                        let start = std::time::Instant::now();
                        let stats = isolate.sweep_array_buffer_extensions(SweepScope::Young);
                        total_duration += start.elapsed();

                        black_box((stats, &buffers));
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    length_or_out_of_bounds_benchmark,
    gsab_length_benchmark,
    extension_sweep_benchmark,
);

criterion_main!(benches);
