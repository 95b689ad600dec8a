//! Extension registry tests
//!
//! These drive the heap the way a collector does: mark from outside, then
//! sweep, and check what was released.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use otter_vm_gc::{Extension, ExtensionMarks, GcHeap, Generation, MarkScope, SweepScope};

/// Record that counts how often it was released
struct CountingRecord {
    marks: ExtensionMarks,
    bytes: usize,
    releases: Arc<AtomicUsize>,
}

impl Extension for CountingRecord {
    fn marks(&self) -> &ExtensionMarks {
        &self.marks
    }

    fn accounting_length(&self) -> usize {
        self.bytes
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn record(bytes: usize, releases: &Arc<AtomicUsize>) -> Arc<CountingRecord> {
    Arc::new(CountingRecord {
        marks: ExtensionMarks::new(),
        bytes,
        releases: releases.clone(),
    })
}

#[test]
fn test_unmarked_records_are_released_once() {
    let heap = GcHeap::new();
    let releases = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        heap.append_array_buffer_extension(record(16, &releases));
    }
    assert_eq!(heap.external_memory(), 160);

    let stats = heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 10);
    assert_eq!(releases.load(Ordering::SeqCst), 10);
    assert_eq!(heap.external_memory(), 0);

    // Nothing left to free.
    heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(releases.load(Ordering::SeqCst), 10);
}

#[test]
fn test_detached_records_are_never_swept() {
    let heap = GcHeap::new();
    let releases = Arc::new(AtomicUsize::new(0));
    let detached = record(32, &releases);
    heap.append_array_buffer_extension(detached.clone());
    assert_eq!(
        heap.detach_array_buffer_extension(&detached),
        Some(Generation::Young)
    );

    heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    assert_eq!(heap.external_memory(), 0);
}

#[test]
fn test_promotion_then_full_collection() {
    let heap = GcHeap::new();
    let releases = Arc::new(AtomicUsize::new(0));
    let survivor = record(100, &releases);
    heap.append_array_buffer_extension(survivor.clone());

    survivor.marks().mark(MarkScope::YoungPromoted);
    let stats = heap.sweep_array_buffer_extensions(SweepScope::Young);
    assert_eq!(stats.promoted, 1);
    assert_eq!(heap.old_external_memory(), 100);
    assert_eq!(heap.young_external_memory(), 0);

    // The survivor becomes unreachable before the next full pass.
    drop(survivor);
    heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(heap.extension_count(), 0);
}

#[test]
fn test_concurrent_marking() {
    let heap = GcHeap::new();
    let releases = Arc::new(AtomicUsize::new(0));
    let records: Vec<_> = (0..64).map(|_| record(1, &releases)).collect();
    for r in &records {
        heap.append_array_buffer_extension(r.clone());
    }

    let handles: Vec<_> = records
        .chunks(16)
        .map(|chunk| {
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for r in chunk.iter().step_by(2) {
                    r.marks().mark(MarkScope::Full);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    drop(records);

    let stats = heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 32);
    assert_eq!(stats.surviving, 32);
    assert_eq!(releases.load(Ordering::SeqCst), 32);
}

#[test]
fn test_held_records_are_not_released() {
    let heap = GcHeap::new();
    let releases = Arc::new(AtomicUsize::new(0));
    let held = record(8, &releases);
    heap.append_array_buffer_extension(held.clone());
    heap.append_array_buffer_extension(record(8, &releases));

    // Neither is marked; only the one the heap owns alone goes.
    let stats = heap.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(heap.extension_generation(&held), Some(Generation::Young));
    assert_eq!(heap.external_memory(), 8);
}
