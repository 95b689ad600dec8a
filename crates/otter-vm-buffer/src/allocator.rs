//! Array buffer memory allocators
//!
//! Backing store memory lives outside the managed heap and is requested from an
//! [`ArrayBufferAllocator`]. A null result is an allocation failure; callers
//! decide whether that is a script-visible `RangeError` or fatal.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Alignment of every backing store region (largest element width)
pub const BACKING_STORE_ALIGNMENT: usize = 8;

/// Region start used by zero-length stores and detached buffers
///
/// Never dereferenced and never freed.
pub fn empty_backing_store_buffer() -> NonNull<u8> {
    NonNull::<u64>::dangling().cast()
}

/// Source of backing store memory
pub trait ArrayBufferAllocator: Send + Sync {
    /// Allocate `len` zeroed bytes
    fn allocate(&self, len: usize) -> Option<NonNull<u8>>;

    /// Allocate `len` bytes without initializing them
    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>>;

    /// Release memory returned by this allocator
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` or `allocate_uninitialized` on this
    /// allocator with the same `len`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, len: usize);
}

/// Allocator backed by the global Rust allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    fn layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len, BACKING_STORE_ALIGNMENT).ok()
    }

    fn allocate_with(len: usize, zeroed: bool) -> Option<NonNull<u8>> {
        if len == 0 {
            return Some(empty_backing_store_buffer());
        }
        let layout = Self::layout(len)?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        NonNull::new(ptr)
    }
}

impl ArrayBufferAllocator for SystemAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        Self::allocate_with(len, true)
    }

    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>> {
        Self::allocate_with(len, false)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, len: usize) {
        if len == 0 {
            return;
        }
        if let Some(layout) = Self::layout(len) {
            // SAFETY: caller guarantees `ptr` came from `allocate_with(len, _)`,
            // which used this same layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Allocator that refuses to hold more than `limit` live bytes
///
/// Wraps another allocator and keeps counters so embedders (and tests) can see
/// how much external memory is live and whether it was released.
pub struct LimitedAllocator {
    inner: Arc<dyn ArrayBufferAllocator>,
    /// Maximum live bytes
    limit: usize,
    /// Bytes currently allocated
    allocated: AtomicUsize,
    /// Successful allocations
    allocation_count: AtomicUsize,
    /// Frees
    free_count: AtomicUsize,
}

impl LimitedAllocator {
    /// Limit the system allocator to `limit` live bytes
    pub fn new(limit: usize) -> Arc<Self> {
        Self::wrap(Arc::new(SystemAllocator), limit)
    }

    /// Limit `inner` to `limit` live bytes
    pub fn wrap(inner: Arc<dyn ArrayBufferAllocator>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            limit,
            allocated: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
        })
    }

    /// Bytes currently allocated
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Memory limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of successful allocations
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::SeqCst)
    }

    /// Number of frees
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::SeqCst)
    }

    fn reserve(&self, len: usize) -> bool {
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(len).filter(|&total| total <= self.limit)
            })
            .is_ok()
    }

    fn allocate_with(
        &self,
        len: usize,
        allocate: impl FnOnce(&dyn ArrayBufferAllocator) -> Option<NonNull<u8>>,
    ) -> Option<NonNull<u8>> {
        if !self.reserve(len) {
            tracing::debug!(
                target: "otter::buffer",
                requested = len,
                allocated = self.allocated(),
                limit = self.limit,
                "array buffer allocation denied"
            );
            return None;
        }
        match allocate(self.inner.as_ref()) {
            Some(ptr) => {
                self.allocation_count.fetch_add(1, Ordering::SeqCst);
                Some(ptr)
            }
            None => {
                self.allocated.fetch_sub(len, Ordering::SeqCst);
                None
            }
        }
    }
}

impl ArrayBufferAllocator for LimitedAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        self.allocate_with(len, |inner| inner.allocate(len))
    }

    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>> {
        self.allocate_with(len, |inner| inner.allocate_uninitialized(len))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, len: usize) {
        self.allocated.fetch_sub(len, Ordering::SeqCst);
        self.free_count.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded caller contract; `ptr` came from `inner`.
        unsafe { self.inner.free(ptr, len) };
    }
}
