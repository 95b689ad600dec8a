//! Buffer lifecycle tests
//!
//! Attach, detach, remove, promotion and collection, checked against the
//! memory the allocator actually handed out.

use std::sync::Arc;

use otter_vm_buffer::{
    ARRAY_BUFFER_DETACHING, ArrayBufferAllocator, BackingStore, InitializedFlag, Isolate,
    IsolateConfig, JsArrayBuffer, JsTypedArray, LimitedAllocator, ResizableFlag, SharedFlag,
    TypedArrayKind, Value,
};
use otter_vm_gc::{GcConfig, Generation, SweepScope};

fn isolate_with(limit: usize) -> (Arc<Isolate>, Arc<LimitedAllocator>) {
    let limited = LimitedAllocator::new(limit);
    let isolate = Isolate::new(IsolateConfig {
        allocator: limited.clone(),
        ..IsolateConfig::default()
    });
    (isolate, limited)
}

fn store(isolate: &Isolate, len: usize) -> Arc<BackingStore> {
    BackingStore::allocate(
        isolate.allocator(),
        len,
        SharedFlag::NotShared,
        InitializedFlag::Zeroed,
    )
    .expect("allocation within limit")
}

#[test]
fn test_detach_resets_buffer() {
    let (isolate, limited) = isolate_with(1 << 20);
    let buffer = JsArrayBuffer::allocate(&isolate, 64).unwrap();
    let extension = buffer.extension().unwrap();

    buffer.detach(false);

    assert!(buffer.was_detached());
    assert_eq!(buffer.byte_length(), 0);
    assert!(buffer.is_empty());
    assert!(buffer.extension().is_none());
    assert!(extension.backing_store().is_none());
    assert_eq!(isolate.heap().extension_generation(&extension), None);
    assert_eq!(isolate.heap().external_memory(), 0);
    assert_eq!(limited.allocated(), 0);
    assert!(!ARRAY_BUFFER_DETACHING.is_intact());

    // Repeated detaches change nothing.
    let ptr = buffer.backing_store_ptr();
    buffer.detach(false);
    buffer.detach(false);
    assert!(buffer.was_detached());
    assert_eq!(buffer.byte_length(), 0);
    assert_eq!(buffer.backing_store_ptr(), ptr);
}

#[test]
fn test_attach_remove_attach_releases_first_store() {
    let (isolate, limited) = isolate_with(1 << 20);
    let buffer = JsArrayBuffer::new(&isolate);

    let first = store(&isolate, 32);
    let weak_first = Arc::downgrade(&first);
    buffer.attach(first);
    assert_eq!(buffer.byte_length(), 32);
    assert_eq!(limited.allocated(), 32);

    let removed = buffer.remove_extension().unwrap();
    assert!(!buffer.was_detached());
    assert_eq!(buffer.byte_length(), 0);
    assert_eq!(isolate.heap().extension_count(), 0);
    drop(removed);
    assert!(weak_first.upgrade().is_none());
    assert_eq!(limited.allocated(), 0);

    let second = store(&isolate, 48);
    let second_start = second.buffer_start();
    buffer.attach(second);
    assert_eq!(buffer.byte_length(), 48);
    assert_eq!(buffer.max_byte_length(), 48);
    assert_eq!(buffer.backing_store_ptr(), second_start);
    assert_eq!(limited.allocated(), 48);
    assert_eq!(isolate.heap().external_memory(), 48);
}

#[test]
fn test_reattach_replaces_store_without_double_counting() {
    let (isolate, limited) = isolate_with(1 << 20);
    let buffer = JsArrayBuffer::allocate(&isolate, 16).unwrap();
    let weak_first = Arc::downgrade(&buffer.get_backing_store().unwrap());

    let second = store(&isolate, 24);
    buffer.attach(second.clone());

    assert!(weak_first.upgrade().is_none());
    assert!(Arc::ptr_eq(&buffer.get_backing_store().unwrap(), &second));
    assert_eq!(isolate.heap().extension_count(), 1);
    assert_eq!(isolate.heap().external_memory(), 24);
    assert_eq!(limited.allocated(), 24);
}

#[test]
fn test_shared_store_freed_by_last_owner() {
    let (isolate, limited) = isolate_with(1 << 20);
    let shared = BackingStore::allocate(
        isolate.allocator(),
        64,
        SharedFlag::Shared,
        InitializedFlag::Zeroed,
    )
    .unwrap();
    let a = JsArrayBuffer::setup(
        &isolate,
        SharedFlag::Shared,
        ResizableFlag::NotResizable,
        Some(shared.clone()),
    );
    let b = JsArrayBuffer::setup(
        &isolate,
        SharedFlag::Shared,
        ResizableFlag::NotResizable,
        Some(shared),
    );
    assert_eq!(a.backing_store_ptr(), b.backing_store_ptr());
    assert_eq!(isolate.heap().external_memory(), 0);

    drop(b);
    let stats = isolate.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 1);
    assert_eq!(limited.allocated(), 64);

    drop(a);
    let stats = isolate.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 1);
    assert_eq!(limited.allocated(), 0);
}

#[test]
fn test_sweep_keeps_memory_of_live_buffers() {
    let (isolate, limited) = isolate_with(1 << 20);
    let buffer = JsArrayBuffer::allocate(&isolate, 4096).unwrap();
    let view = JsTypedArray::new(buffer.clone(), TypedArrayKind::Uint8, 0, None).unwrap();
    view.set_element(0, &Value::Number(1.0)).unwrap();

    // No marks at all: the buffer itself still holds its extension.
    let stats = isolate.sweep_array_buffer_extensions(SweepScope::Young);
    assert_eq!(stats.freed, 0);
    let stats = isolate.sweep_array_buffer_extensions(SweepScope::Full);
    assert_eq!(stats.freed, 0);

    assert_eq!(limited.allocated(), 4096);
    assert!(buffer.get_backing_store().is_some());
    assert_eq!(isolate.heap().external_memory(), 4096);

    let other = JsArrayBuffer::allocate(&isolate, 4096).unwrap();
    assert_ne!(other.backing_store_ptr(), buffer.backing_store_ptr());
    let other_view = JsTypedArray::new(other, TypedArrayKind::Uint8, 0, None).unwrap();
    other_view.set_element(0, &Value::Number(77.0)).unwrap();
    assert_eq!(view.get_element(0), Some(Value::Number(1.0)));
}

#[test]
fn test_young_sweep_promotes_marked_buffers() {
    let (isolate, limited) = isolate_with(1 << 20);
    let survivor = JsArrayBuffer::allocate(&isolate, 8).unwrap();
    let promoted = JsArrayBuffer::allocate(&isolate, 16).unwrap();
    let garbage = JsArrayBuffer::allocate(&isolate, 32).unwrap();

    survivor.young_mark_extension();
    promoted.young_mark_extension_promoted();
    drop(garbage);

    let stats = isolate.sweep_array_buffer_extensions(SweepScope::Young);
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.freed_bytes, 32);
    assert_eq!(stats.promoted, 1);
    assert_eq!(limited.allocated(), 24);

    let heap = isolate.heap();
    assert_eq!(
        heap.extension_generation(&survivor.extension().unwrap()),
        Some(Generation::Young)
    );
    assert_eq!(
        heap.extension_generation(&promoted.extension().unwrap()),
        Some(Generation::Old)
    );
    assert_eq!(heap.young_external_memory(), 8);
    assert_eq!(heap.old_external_memory(), 16);
}

#[test]
fn test_promotion_copies_inline_bytes() {
    let (isolate, limited) = isolate_with(1 << 20);
    let view = JsTypedArray::with_length(&isolate, TypedArrayKind::Uint8, 4).unwrap();
    for (i, byte) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
        view.set_element(i, &Value::Number(byte)).unwrap();
    }
    assert!(view.is_on_heap());
    assert_eq!(limited.allocated(), 0);

    let buffer = view.get_buffer();
    assert!(!view.is_on_heap());
    assert_eq!(buffer.byte_length(), 4);
    assert_eq!(
        buffer.get_backing_store().unwrap().copy_contents(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(view.data_ptr(), buffer.backing_store_ptr());
    assert_eq!(limited.allocated(), 4);
    assert_eq!(isolate.heap().external_memory(), 4);

    let again = view.get_buffer();
    assert!(Arc::ptr_eq(&buffer, &again));
    assert_eq!(limited.allocation_count(), 1);

    // Writes after promotion land in the store.
    view.set_element(0, &Value::Number(9.0)).unwrap();
    assert_eq!(buffer.get_backing_store().unwrap().copy_contents()[0], 9);
}

#[test]
fn test_promotion_after_detaching_inline_buffer() {
    let (isolate, limited) = isolate_with(1 << 20);
    let view = JsTypedArray::with_length(&isolate, TypedArrayKind::Uint8, 4).unwrap();
    view.set_element(0, &Value::Number(5.0)).unwrap();
    view.buffer().detach(false);

    let buffer = view.get_buffer();
    assert!(buffer.was_detached());
    assert_eq!(buffer.byte_length(), 0);
    assert!(buffer.extension().is_none());
    assert!(!view.is_on_heap());
    assert_eq!(limited.allocation_count(), 0);
    assert_eq!(isolate.heap().extension_count(), 0);
}

#[test]
fn test_promotion_of_empty_array() {
    let (isolate, _) = isolate_with(1 << 20);
    let view = JsTypedArray::with_length(&isolate, TypedArrayKind::Int32, 0).unwrap();
    let buffer = view.get_buffer();
    assert!(!view.is_on_heap());
    assert_eq!(buffer.byte_length(), 0);
    assert!(buffer.is_empty());
}

fn panic_on_oom(location: &str) -> ! {
    panic!("fatal oom at {location}")
}

#[test]
#[should_panic(expected = "fatal oom at JsTypedArray::get_buffer")]
fn test_promotion_failure_is_fatal() {
    let limited = LimitedAllocator::new(2);
    let allocator: Arc<dyn ArrayBufferAllocator> = limited;
    let isolate = Isolate::new(IsolateConfig {
        gc: GcConfig {
            oom_handler: panic_on_oom,
            ..GcConfig::default()
        },
        allocator,
        ..IsolateConfig::default()
    });
    let view = JsTypedArray::with_length(&isolate, TypedArrayKind::Uint8, 4).unwrap();
    view.get_buffer();
}

#[test]
fn test_allocation_failure_is_catchable() {
    let (isolate, _) = isolate_with(8);
    assert!(matches!(
        JsArrayBuffer::allocate(&isolate, 16),
        Err(otter_vm_buffer::VmError::ArrayBufferAllocationFailed)
    ));
}
