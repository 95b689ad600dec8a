//! Backing stores: the memory behind array buffers
//!
//! A `BackingStore` owns one region allocated outside the managed heap (or the
//! empty sentinel) and is shared through `Arc`. The region is released when the
//! last handle drops, and only if the store owns it (`free_on_destruct`).
//!
//! Resizable stores reserve `max_byte_length` up front, so the region start is
//! stable for the life of the store and only `byte_length` moves.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::allocator::{ArrayBufferAllocator, empty_backing_store_buffer};
use crate::error::{VmError, VmResult};

/// Whether a buffer may be shared between execution contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedFlag {
    /// Exclusively owned
    NotShared,
    /// Shared
    Shared,
}

impl SharedFlag {
    fn is_shared(self) -> bool {
        self == Self::Shared
    }
}

/// Whether script may change a buffer's length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizableFlag {
    /// Fixed length
    NotResizable,
    /// Resizable (or growable, when shared)
    Resizable,
}

/// Whether fresh memory must be zero-filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializedFlag {
    /// Zero-filled
    Zeroed,
    /// Left as the allocator returned it; the caller overwrites every byte
    Uninitialized,
}

/// Memory region behind one or more array buffers
pub struct BackingStore {
    buffer_start: NonNull<u8>,
    /// Current length; grown with SeqCst stores when shared and growable
    byte_length: AtomicUsize,
    max_byte_length: usize,
    /// Bytes actually reserved (and later freed)
    allocation_length: usize,
    is_shared: bool,
    is_resizable: bool,
    is_wasm_memory: bool,
    free_on_destruct: bool,
    allocator: Option<Arc<dyn ArrayBufferAllocator>>,
}

// SAFETY: `buffer_start` is a raw region whose lifetime is tied to the store.
// Length updates are atomic; byte access through the region is synchronized by
// the owning buffers (shared buffers leave data races to script, as intended).
unsafe impl Send for BackingStore {}
unsafe impl Sync for BackingStore {}

impl BackingStore {
    #[allow(clippy::too_many_arguments)]
    fn with_region(
        buffer_start: NonNull<u8>,
        byte_length: usize,
        max_byte_length: usize,
        allocation_length: usize,
        is_shared: bool,
        is_resizable: bool,
        is_wasm_memory: bool,
        free_on_destruct: bool,
        allocator: Option<Arc<dyn ArrayBufferAllocator>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_start,
            byte_length: AtomicUsize::new(byte_length),
            max_byte_length,
            allocation_length,
            is_shared,
            is_resizable,
            is_wasm_memory,
            free_on_destruct,
            allocator,
        })
    }

    /// Allocate a fixed-length store
    ///
    /// Returns `None` when the allocator refuses the request.
    pub fn allocate(
        allocator: &Arc<dyn ArrayBufferAllocator>,
        byte_length: usize,
        shared: SharedFlag,
        initialized: InitializedFlag,
    ) -> Option<Arc<Self>> {
        if byte_length == 0 {
            return Some(Self::empty(shared, ResizableFlag::NotResizable));
        }
        let start = match initialized {
            InitializedFlag::Zeroed => allocator.allocate(byte_length)?,
            InitializedFlag::Uninitialized => allocator.allocate_uninitialized(byte_length)?,
        };
        tracing::trace!(
            target: "otter::buffer",
            byte_length,
            shared = shared.is_shared(),
            "allocate backing store"
        );
        Some(Self::with_region(
            start,
            byte_length,
            byte_length,
            byte_length,
            shared.is_shared(),
            false,
            false,
            true,
            Some(Arc::clone(allocator)),
        ))
    }

    /// Allocate a resizable (or, when shared, growable) store
    ///
    /// The whole `max_byte_length` is reserved and zeroed.
    pub fn allocate_resizable(
        allocator: &Arc<dyn ArrayBufferAllocator>,
        byte_length: usize,
        max_byte_length: usize,
        shared: SharedFlag,
    ) -> Option<Arc<Self>> {
        assert!(byte_length <= max_byte_length);
        let start = if max_byte_length == 0 {
            empty_backing_store_buffer()
        } else {
            allocator.allocate(max_byte_length)?
        };
        tracing::trace!(
            target: "otter::buffer",
            byte_length,
            max_byte_length,
            shared = shared.is_shared(),
            "allocate resizable backing store"
        );
        Some(Self::with_region(
            start,
            byte_length,
            max_byte_length,
            max_byte_length,
            shared.is_shared(),
            true,
            false,
            max_byte_length != 0,
            Some(Arc::clone(allocator)),
        ))
    }

    /// Allocate a store for wasm linear memory
    ///
    /// Wasm memory grows through its own instructions rather than the buffer
    /// API, so the store is not script-resizable, but `byte_length` may be
    /// below `max_byte_length`. Buffers over it can never be detached by script.
    pub fn allocate_wasm_memory(
        allocator: &Arc<dyn ArrayBufferAllocator>,
        byte_length: usize,
        max_byte_length: usize,
        shared: SharedFlag,
    ) -> Option<Arc<Self>> {
        assert!(byte_length <= max_byte_length);
        let start = if max_byte_length == 0 {
            empty_backing_store_buffer()
        } else {
            allocator.allocate(max_byte_length)?
        };
        Some(Self::with_region(
            start,
            byte_length,
            max_byte_length,
            max_byte_length,
            shared.is_shared(),
            false,
            true,
            max_byte_length != 0,
            Some(Arc::clone(allocator)),
        ))
    }

    /// A zero-length store pointing at the empty sentinel
    pub fn empty(shared: SharedFlag, resizable: ResizableFlag) -> Arc<Self> {
        Self::with_region(
            empty_backing_store_buffer(),
            0,
            0,
            0,
            shared.is_shared(),
            resizable == ResizableFlag::Resizable,
            false,
            false,
            None,
        )
    }

    /// Wrap memory owned by someone else; it is never freed by the store
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `byte_length` bytes for as
    /// long as any handle to the returned store exists.
    pub unsafe fn from_external(
        ptr: NonNull<u8>,
        byte_length: usize,
        shared: SharedFlag,
    ) -> Arc<Self> {
        Self::with_region(
            ptr,
            byte_length,
            byte_length,
            0,
            shared.is_shared(),
            false,
            false,
            false,
            None,
        )
    }

    /// Start of the region
    pub fn buffer_start(&self) -> NonNull<u8> {
        self.buffer_start
    }

    /// Current length
    ///
    /// Relaxed; use [`BackingStore::byte_length_with`] with `SeqCst` when
    /// another thread may be growing a shared store.
    pub fn byte_length(&self) -> usize {
        self.byte_length.load(Ordering::Relaxed)
    }

    /// Current length loaded with `order`
    pub fn byte_length_with(&self, order: Ordering) -> usize {
        self.byte_length.load(order)
    }

    /// Upper bound fixed at allocation
    pub fn max_byte_length(&self) -> usize {
        self.max_byte_length
    }

    /// Whether the store can never hold a byte
    pub fn is_empty(&self) -> bool {
        self.max_byte_length == 0
    }

    /// Shared between execution contexts
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Resizable (non-shared) or growable (shared) by script
    pub fn is_resizable(&self) -> bool {
        self.is_resizable
    }

    /// Wasm linear memory
    pub fn is_wasm_memory(&self) -> bool {
        self.is_wasm_memory
    }

    /// Whether the store releases its region on drop
    pub fn free_on_destruct(&self) -> bool {
        self.free_on_destruct
    }

    /// Bytes charged to the isolate that attaches this store
    ///
    /// Shared memory is not charged to any one isolate, and memory the store
    /// does not own is charged by its real owner.
    pub fn per_isolate_accounting_length(&self) -> usize {
        if self.is_shared || !self.free_on_destruct {
            0
        } else {
            self.byte_length()
        }
    }

    /// Grow a shared growable store to `new_byte_length`
    ///
    /// Concurrent growers race through a SeqCst compare-exchange; the length
    /// never decreases.
    pub fn grow_shared(&self, new_byte_length: usize) -> VmResult<()> {
        assert!(self.is_shared && (self.is_resizable || self.is_wasm_memory));
        if new_byte_length > self.max_byte_length {
            return Err(VmError::range_error("Invalid length parameter"));
        }
        let mut current = self.byte_length.load(Ordering::SeqCst);
        loop {
            if new_byte_length < current {
                return Err(VmError::range_error("Invalid length parameter"));
            }
            if new_byte_length == current {
                return Ok(());
            }
            match self.byte_length.compare_exchange_weak(
                current,
                new_byte_length,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Resize a non-shared resizable store
    ///
    /// Bytes cut off by a shrink are zeroed so a later grow exposes zeros.
    pub fn resize(&self, new_byte_length: usize) -> VmResult<()> {
        assert!(self.is_resizable && !self.is_shared);
        if new_byte_length > self.max_byte_length {
            return Err(VmError::range_error("Invalid length parameter"));
        }
        let old_byte_length = self.byte_length();
        if new_byte_length < old_byte_length {
            // SAFETY: both bounds are within the reserved region.
            unsafe {
                std::ptr::write_bytes(
                    self.buffer_start.as_ptr().add(new_byte_length),
                    0,
                    old_byte_length - new_byte_length,
                );
            }
        }
        self.byte_length.store(new_byte_length, Ordering::Relaxed);
        Ok(())
    }

    /// Copy the first `byte_length` bytes out
    pub fn copy_contents(&self) -> Vec<u8> {
        let len = self.byte_length_with(Ordering::SeqCst);
        if len == 0 {
            return Vec::new();
        }
        // SAFETY: the region holds at least `byte_length` bytes.
        unsafe { std::slice::from_raw_parts(self.buffer_start.as_ptr(), len) }.to_vec()
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("buffer_start", &self.buffer_start)
            .field("byte_length", &self.byte_length())
            .field("max_byte_length", &self.max_byte_length)
            .field("is_shared", &self.is_shared)
            .field("is_resizable", &self.is_resizable)
            .field("is_wasm_memory", &self.is_wasm_memory)
            .field("free_on_destruct", &self.free_on_destruct)
            .finish()
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        if !self.free_on_destruct || self.allocation_length == 0 {
            return;
        }
        if let Some(allocator) = &self.allocator {
            tracing::trace!(
                target: "otter::buffer",
                bytes = self.allocation_length,
                "free backing store"
            );
            // SAFETY: the region came from this allocator with this length and
            // this is the last handle to it.
            unsafe { allocator.free(self.buffer_start, self.allocation_length) };
        }
    }
}
