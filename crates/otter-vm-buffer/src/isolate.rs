//! Isolate: the per-VM owner of the heap and the buffer allocator.
//!
//! Every buffer created in an isolate holds an `Arc<Isolate>`, which is how it
//! reaches the heap's extension registry, the allocator, and the configured
//! limits.

use std::fmt;
use std::sync::Arc;

use otter_vm_gc::{GcConfig, GcHeap, SweepScope, SweepStats};

use crate::allocator::{ArrayBufferAllocator, SystemAllocator};
use crate::extension::ArrayBufferExtension;

const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Largest `max_byte_length` an isolate accepts by default (2^53 - 1, clamped
/// to `isize::MAX`)
pub const DEFAULT_MAX_BYTE_LENGTH: usize = if MAX_SAFE_INTEGER < isize::MAX as u64 {
    MAX_SAFE_INTEGER as usize
} else {
    isize::MAX as usize
};

/// Configuration for creating a new Isolate.
#[derive(Clone)]
pub struct IsolateConfig {
    /// Heap configuration
    pub gc: GcConfig,
    /// Typed arrays with at most this many bytes start out on-heap
    pub typed_array_max_size_in_heap: usize,
    /// Largest buffer length (or max length) the constructors accept
    pub max_byte_length: usize,
    /// Source of backing store memory
    pub allocator: Arc<dyn ArrayBufferAllocator>,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            gc: GcConfig::default(),
            typed_array_max_size_in_heap: 64,
            max_byte_length: DEFAULT_MAX_BYTE_LENGTH,
            allocator: Arc::new(SystemAllocator),
        }
    }
}

impl fmt::Debug for IsolateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateConfig")
            .field("gc", &self.gc)
            .field(
                "typed_array_max_size_in_heap",
                &self.typed_array_max_size_in_heap,
            )
            .field("max_byte_length", &self.max_byte_length)
            .finish_non_exhaustive()
    }
}

/// An independent buffer-owning VM environment
pub struct Isolate {
    heap: Arc<GcHeap<ArrayBufferExtension>>,
    allocator: Arc<dyn ArrayBufferAllocator>,
    typed_array_max_size_in_heap: usize,
    max_byte_length: usize,
}

impl Isolate {
    /// Create a new isolate with the given configuration.
    pub fn new(config: IsolateConfig) -> Arc<Self> {
        Arc::new(Self {
            heap: GcHeap::with_config(config.gc),
            allocator: config.allocator,
            typed_array_max_size_in_heap: config.typed_array_max_size_in_heap,
            max_byte_length: config.max_byte_length,
        })
    }

    /// The isolate's heap
    pub fn heap(&self) -> &Arc<GcHeap<ArrayBufferExtension>> {
        &self.heap
    }

    /// The isolate's buffer allocator
    pub fn allocator(&self) -> &Arc<dyn ArrayBufferAllocator> {
        &self.allocator
    }

    /// On-heap threshold for typed arrays, in bytes
    pub fn typed_array_max_size_in_heap(&self) -> usize {
        self.typed_array_max_size_in_heap
    }

    /// Largest buffer length the constructors accept
    pub fn max_byte_length(&self) -> usize {
        self.max_byte_length
    }

    /// Free extensions the last tracing pass did not mark and no buffer holds
    pub fn sweep_array_buffer_extensions(&self, scope: SweepScope) -> SweepStats {
        self.heap.sweep_array_buffer_extensions(scope)
    }

    /// Terminate on unrecoverable allocation failure
    pub fn fatal_process_out_of_memory(&self, location: &str) -> ! {
        tracing::error!(target: "otter::buffer", location, "fatal process out of memory");
        self.heap.fatal_process_out_of_memory(location)
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("extensions", &self.heap.extension_count())
            .field("external_memory", &self.heap.external_memory())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IsolateConfig::default();
        assert_eq!(config.typed_array_max_size_in_heap, 64);
        assert_eq!(config.max_byte_length, DEFAULT_MAX_BYTE_LENGTH);
        assert!(DEFAULT_MAX_BYTE_LENGTH <= isize::MAX as usize);
    }

    #[test]
    fn test_isolate_starts_empty() {
        let isolate = Isolate::new(IsolateConfig::default());
        assert_eq!(isolate.heap().extension_count(), 0);
        let stats = isolate.sweep_array_buffer_extensions(SweepScope::Full);
        assert_eq!(stats, SweepStats::default());
    }
}
