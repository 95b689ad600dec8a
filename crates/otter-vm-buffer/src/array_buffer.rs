//! ArrayBuffer implementation
//!
//! A `JsArrayBuffer` never owns memory directly. Memory lives in a
//! [`BackingStore`] held by the buffer's [`ArrayBufferExtension`], which is
//! registered with the isolate's heap so the collector can account for it and
//! free it without scanning the buffer.
//!
//! The buffer caches the region start and length for fast access. The one
//! exception is a growable shared buffer (GSAB): another thread may grow its
//! store at any time, so its own `byte_length` field is always zero and readers
//! go through [`JsArrayBuffer::gsab_byte_length`].

use parking_lot::RwLock;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::allocator::empty_backing_store_buffer;
use crate::backing_store::{BackingStore, InitializedFlag, ResizableFlag, SharedFlag};
use crate::error::{VmError, VmResult};
use crate::extension::ArrayBufferExtension;
use crate::isolate::Isolate;
use crate::protectors::ARRAY_BUFFER_DETACHING;

/// Mutable per-buffer fields
#[derive(Debug)]
struct ArrayBufferSlots {
    /// Region start, or the empty sentinel
    data: NonNull<u8>,
    /// Always 0 for growable shared buffers
    byte_length: usize,
    max_byte_length: usize,
    is_shared: bool,
    is_resizable: bool,
    is_detachable: bool,
    was_detached: bool,
    is_external: bool,
    is_asmjs_memory: bool,
    extension: Option<Arc<ArrayBufferExtension>>,
}

impl ArrayBufferSlots {
    fn empty(shared: SharedFlag, resizable: ResizableFlag) -> Self {
        let is_shared = shared == SharedFlag::Shared;
        Self {
            data: empty_backing_store_buffer(),
            byte_length: 0,
            max_byte_length: 0,
            is_shared,
            is_resizable: resizable == ResizableFlag::Resizable,
            is_detachable: !is_shared,
            was_detached: false,
            is_external: false,
            is_asmjs_memory: false,
            extension: None,
        }
    }

    fn is_gsab(&self) -> bool {
        self.is_shared && self.is_resizable
    }
}

/// A JavaScript ArrayBuffer or SharedArrayBuffer
#[derive(Debug)]
pub struct JsArrayBuffer {
    isolate: Arc<Isolate>,
    slots: RwLock<ArrayBufferSlots>,
}

// SAFETY: `data` points into a backing store kept alive by the extension the
// slots hold; every access to the slots goes through the lock.
unsafe impl Send for JsArrayBuffer {}
unsafe impl Sync for JsArrayBuffer {}

impl JsArrayBuffer {
    /// Create an empty, non-shared, fixed-length buffer with no memory
    pub fn new(isolate: &Arc<Isolate>) -> Arc<Self> {
        Self::setup(
            isolate,
            SharedFlag::NotShared,
            ResizableFlag::NotResizable,
            None,
        )
    }

    /// Create a buffer with the given flags, attaching `backing_store` if any
    pub fn setup(
        isolate: &Arc<Isolate>,
        shared: SharedFlag,
        resizable: ResizableFlag,
        backing_store: Option<Arc<BackingStore>>,
    ) -> Arc<Self> {
        let buffer = Arc::new(Self {
            isolate: Arc::clone(isolate),
            slots: RwLock::new(ArrayBufferSlots::empty(shared, resizable)),
        });
        if let Some(backing_store) = backing_store {
            buffer.attach(backing_store);
        }
        buffer
    }

    fn check_length(isolate: &Isolate, byte_length: usize, what: &str) -> VmResult<()> {
        if byte_length > isolate.max_byte_length() {
            return Err(VmError::range_error(format!("Invalid array buffer {what}")));
        }
        Ok(())
    }

    /// `new ArrayBuffer(byteLength)`
    pub fn allocate(isolate: &Arc<Isolate>, byte_length: usize) -> VmResult<Arc<Self>> {
        Self::check_length(isolate, byte_length, "length")?;
        let store = BackingStore::allocate(
            isolate.allocator(),
            byte_length,
            SharedFlag::NotShared,
            InitializedFlag::Zeroed,
        )
        .ok_or(VmError::ArrayBufferAllocationFailed)?;
        Ok(Self::setup(
            isolate,
            SharedFlag::NotShared,
            ResizableFlag::NotResizable,
            Some(store),
        ))
    }

    /// `new ArrayBuffer(byteLength, { maxByteLength })`
    pub fn allocate_resizable(
        isolate: &Arc<Isolate>,
        byte_length: usize,
        max_byte_length: usize,
    ) -> VmResult<Arc<Self>> {
        Self::allocate_with_max(isolate, byte_length, max_byte_length, SharedFlag::NotShared)
    }

    /// `new SharedArrayBuffer(byteLength)`
    pub fn allocate_shared(isolate: &Arc<Isolate>, byte_length: usize) -> VmResult<Arc<Self>> {
        Self::check_length(isolate, byte_length, "length")?;
        let store = BackingStore::allocate(
            isolate.allocator(),
            byte_length,
            SharedFlag::Shared,
            InitializedFlag::Zeroed,
        )
        .ok_or(VmError::ArrayBufferAllocationFailed)?;
        Ok(Self::setup(
            isolate,
            SharedFlag::Shared,
            ResizableFlag::NotResizable,
            Some(store),
        ))
    }

    /// `new SharedArrayBuffer(byteLength, { maxByteLength })`
    pub fn allocate_growable_shared(
        isolate: &Arc<Isolate>,
        byte_length: usize,
        max_byte_length: usize,
    ) -> VmResult<Arc<Self>> {
        Self::allocate_with_max(isolate, byte_length, max_byte_length, SharedFlag::Shared)
    }

    fn allocate_with_max(
        isolate: &Arc<Isolate>,
        byte_length: usize,
        max_byte_length: usize,
        shared: SharedFlag,
    ) -> VmResult<Arc<Self>> {
        Self::check_length(isolate, max_byte_length, "max length")?;
        if byte_length > max_byte_length {
            return Err(VmError::range_error("Invalid array buffer length"));
        }
        let store = BackingStore::allocate_resizable(
            isolate.allocator(),
            byte_length,
            max_byte_length,
            shared,
        )
        .ok_or(VmError::ArrayBufferAllocationFailed)?;
        Ok(Self::setup(
            isolate,
            shared,
            ResizableFlag::Resizable,
            Some(store),
        ))
    }

    /// Attach `backing_store` to this buffer
    ///
    /// The store's flags must match the buffer's and the buffer must never
    /// have been detached. A store already attached is replaced.
    pub fn attach(&self, backing_store: Arc<BackingStore>) {
        let mut slots = self.slots.write();
        debug_assert_eq!(slots.is_shared, backing_store.is_shared());
        debug_assert_eq!(slots.is_resizable, backing_store.is_resizable());
        debug_assert!(
            backing_store.is_wasm_memory()
                || backing_store.is_resizable()
                || backing_store.byte_length() == backing_store.max_byte_length()
        );
        debug_assert!(!slots.was_detached);

        slots.data = if backing_store.is_empty() {
            empty_backing_store_buffer()
        } else {
            backing_store.buffer_start()
        };

        slots.byte_length = if slots.is_gsab() {
            0
        } else {
            assert!(backing_store.byte_length() <= self.isolate.max_byte_length());
            backing_store.byte_length()
        };
        slots.max_byte_length = backing_store.max_byte_length();
        if backing_store.is_wasm_memory() {
            slots.is_detachable = false;
        }
        if !backing_store.free_on_destruct() {
            slots.is_external = true;
        }

        let heap = self.isolate.heap();
        let extension = Self::ensure_extension_in(&mut slots);
        heap.detach_array_buffer_extension(&extension);
        let bytes = backing_store.per_isolate_accounting_length();
        extension.set_accounting_length(bytes);

        tracing::trace!(
            target: "otter::buffer",
            byte_length = backing_store.byte_length(),
            max_byte_length = backing_store.max_byte_length(),
            accounting_length = bytes,
            shared = slots.is_shared,
            resizable = slots.is_resizable,
            "attach backing store"
        );

        extension.set_backing_store(backing_store);
        heap.append_array_buffer_extension(extension);
    }

    /// Detach the buffer from its memory
    ///
    /// A no-op when already detached, and when the buffer is not detachable
    /// unless `force_for_wasm_memory` is set for wasm memory teardown.
    pub fn detach(&self, force_for_wasm_memory: bool) {
        let mut slots = self.slots.write();
        if slots.was_detached {
            return;
        }
        if force_for_wasm_memory {
            debug_assert!(
                slots
                    .extension
                    .as_ref()
                    .and_then(|extension| extension.backing_store())
                    .is_some_and(|store| store.is_wasm_memory())
            );
        } else if !slots.is_detachable {
            return;
        }

        if slots.extension.is_some() {
            let backing_store = self.remove_extension_in(&mut slots);
            assert!(
                !force_for_wasm_memory
                    || backing_store
                        .as_ref()
                        .is_some_and(|store| store.is_wasm_memory())
            );
        }

        if ARRAY_BUFFER_DETACHING.is_intact() {
            ARRAY_BUFFER_DETACHING.invalidate();
        }

        debug_assert!(!slots.is_shared);
        debug_assert!(!slots.is_asmjs_memory);
        slots.data = empty_backing_store_buffer();
        slots.byte_length = 0;
        slots.was_detached = true;

        tracing::trace!(target: "otter::buffer", force_for_wasm_memory, "detach array buffer");
    }

    /// Unregister the extension and hand its backing store to the caller
    ///
    /// The buffer is left empty but not detached, so a new store may be
    /// attached afterwards.
    pub fn remove_extension(&self) -> Option<Arc<BackingStore>> {
        let mut slots = self.slots.write();
        let backing_store = self.remove_extension_in(&mut slots);
        slots.data = empty_backing_store_buffer();
        slots.byte_length = 0;
        slots.max_byte_length = 0;
        slots.is_external = false;
        backing_store
    }

    fn remove_extension_in(&self, slots: &mut ArrayBufferSlots) -> Option<Arc<BackingStore>> {
        let extension = slots.extension.take()?;
        self.isolate
            .heap()
            .detach_array_buffer_extension(&extension);
        extension.remove_backing_store()
    }

    /// Return the extension, creating an unregistered one if needed
    pub fn ensure_extension(&self) -> Arc<ArrayBufferExtension> {
        Self::ensure_extension_in(&mut self.slots.write())
    }

    fn ensure_extension_in(slots: &mut ArrayBufferSlots) -> Arc<ArrayBufferExtension> {
        Arc::clone(
            slots
                .extension
                .get_or_insert_with(|| ArrayBufferExtension::new(None, 0)),
        )
    }

    /// The extension, if any
    pub fn extension(&self) -> Option<Arc<ArrayBufferExtension>> {
        self.slots.read().extension.clone()
    }

    /// The attached backing store, if any
    pub fn get_backing_store(&self) -> Option<Arc<BackingStore>> {
        self.slots
            .read()
            .extension
            .as_ref()
            .and_then(|extension| extension.backing_store())
    }

    /// Full-collection mark callback
    pub fn mark_extension(&self) {
        if let Some(extension) = self.extension() {
            extension.mark();
        }
    }

    /// Young-collection mark callback for a buffer that stays young
    pub fn young_mark_extension(&self) {
        if let Some(extension) = self.extension() {
            extension.young_mark();
        }
    }

    /// Young-collection mark callback for a buffer being promoted
    pub fn young_mark_extension_promoted(&self) {
        if let Some(extension) = self.extension() {
            extension.young_mark_promoted();
        }
    }

    /// Current length of a growable shared buffer
    ///
    /// Loaded from the store with SeqCst so a concurrent grow is observed. The
    /// result must be used before anything can run that might collect the
    /// store or re-enter script.
    pub fn gsab_byte_length(&self) -> usize {
        let slots = self.slots.read();
        assert!(slots.is_resizable);
        assert!(slots.is_shared);
        slots
            .extension
            .as_ref()
            .and_then(|extension| extension.backing_store())
            .map_or(0, |store| store.byte_length_with(Ordering::SeqCst))
    }

    /// The raw `byte_length` field (0 for growable shared buffers)
    pub fn byte_length(&self) -> usize {
        self.slots.read().byte_length
    }

    /// The buffer's current length, reading through the store for GSABs
    pub fn get_byte_length(&self) -> usize {
        let is_gsab = self.slots.read().is_gsab();
        if is_gsab {
            self.gsab_byte_length()
        } else {
            self.byte_length()
        }
    }

    /// Maximum length
    pub fn max_byte_length(&self) -> usize {
        self.slots.read().max_byte_length
    }

    /// Region start, or the empty sentinel
    pub fn backing_store_ptr(&self) -> NonNull<u8> {
        self.slots.read().data
    }

    /// SharedArrayBuffer
    pub fn is_shared(&self) -> bool {
        self.slots.read().is_shared
    }

    /// Resizable (or growable, when shared)
    pub fn is_resizable(&self) -> bool {
        self.slots.read().is_resizable
    }

    /// Whether [`JsArrayBuffer::detach`] has an effect
    pub fn is_detachable(&self) -> bool {
        self.slots.read().is_detachable
    }

    /// Whether the buffer was ever detached
    pub fn was_detached(&self) -> bool {
        self.slots.read().was_detached
    }

    /// Whether the memory is owned by someone other than the store
    pub fn is_external(&self) -> bool {
        self.slots.read().is_external
    }

    /// Whether the buffer backs asm.js memory
    pub fn is_asmjs_memory(&self) -> bool {
        self.slots.read().is_asmjs_memory
    }

    /// Whether the buffer has no memory
    pub fn is_empty(&self) -> bool {
        self.slots.read().data == empty_backing_store_buffer()
    }

    /// Allow or forbid detaching; shared buffers are never detachable
    pub fn set_detachable(&self, detachable: bool) {
        let mut slots = self.slots.write();
        assert!(!slots.is_shared || !detachable);
        slots.is_detachable = detachable;
    }

    /// Pin the buffer as asm.js memory; it can no longer be detached
    pub fn mark_as_asmjs_memory(&self) {
        let mut slots = self.slots.write();
        debug_assert!(!slots.is_shared);
        slots.is_asmjs_memory = true;
        slots.is_detachable = false;
    }

    /// The owning isolate
    pub fn isolate(&self) -> &Arc<Isolate> {
        &self.isolate
    }

    /// `ArrayBuffer.prototype.resize`
    pub fn resize(&self, new_byte_length: usize) -> VmResult<()> {
        let mut slots = self.slots.write();
        if slots.is_shared || !slots.is_resizable {
            return Err(VmError::type_error(
                "Method ArrayBuffer.prototype.resize called on incompatible receiver",
            ));
        }
        if slots.was_detached {
            return Err(VmError::Detached);
        }
        if new_byte_length > slots.max_byte_length {
            return Err(VmError::range_error("Invalid length parameter"));
        }
        let Some(extension) = slots.extension.clone() else {
            return Err(VmError::range_error("Invalid length parameter"));
        };
        let Some(store) = extension.backing_store() else {
            return Err(VmError::range_error("Invalid length parameter"));
        };

        store.resize(new_byte_length)?;
        slots.byte_length = new_byte_length;

        let old_bytes = extension.accounting_length();
        let new_bytes = store.per_isolate_accounting_length();
        extension.set_accounting_length(new_bytes);
        self.isolate
            .heap()
            .resize_array_buffer_extension(&extension, old_bytes, new_bytes);
        Ok(())
    }

    /// `SharedArrayBuffer.prototype.grow`
    pub fn grow(&self, new_byte_length: usize) -> VmResult<()> {
        let store = {
            let slots = self.slots.read();
            if !slots.is_gsab() {
                return Err(VmError::type_error(
                    "Method SharedArrayBuffer.prototype.grow called on incompatible receiver",
                ));
            }
            slots
                .extension
                .as_ref()
                .and_then(|extension| extension.backing_store())
        };
        match store {
            Some(store) => store.grow_shared(new_byte_length),
            None if new_byte_length == 0 => Ok(()),
            None => Err(VmError::range_error("Invalid length parameter")),
        }
    }

    /// `ArrayBuffer.prototype.transfer` with the current length
    ///
    /// Moves the memory into a fresh buffer and detaches this one.
    pub fn transfer(&self) -> VmResult<Arc<JsArrayBuffer>> {
        let resizable = {
            let slots = self.slots.read();
            if slots.is_shared {
                return Err(VmError::type_error(
                    "Method ArrayBuffer.prototype.transfer called on incompatible receiver",
                ));
            }
            if slots.was_detached {
                return Err(VmError::Detached);
            }
            if !slots.is_detachable {
                return Err(VmError::type_error("Cannot transfer a non-detachable ArrayBuffer"));
            }
            if slots.is_resizable {
                ResizableFlag::Resizable
            } else {
                ResizableFlag::NotResizable
            }
        };

        let backing_store = self
            .remove_extension()
            .unwrap_or_else(|| BackingStore::empty(SharedFlag::NotShared, resizable));
        self.detach(false);
        Ok(Self::setup(
            &self.isolate,
            SharedFlag::NotShared,
            resizable,
            Some(backing_store),
        ))
    }
}
