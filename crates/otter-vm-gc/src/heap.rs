//! GC heap: extension registration, external-memory accounting and sweeping

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::marks::{Generation, SweepScope};
use crate::registry::{Extension, ExtensionRegistry, SweepStats};

/// Handler for unrecoverable allocation failure
pub type OomHandler = fn(&str) -> !;

/// Default [`OomHandler`]: report and abort the process
pub fn abort_on_oom(location: &str) -> ! {
    eprintln!("Fatal process out of memory: {location}");
    std::process::abort()
}

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Young external bytes above which a young sweep is due (default: 64MB)
    pub young_external_limit: usize,
    /// Called on fatal out-of-memory; must not return
    pub oom_handler: OomHandler,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            young_external_limit: 64 * 1024 * 1024, // 64MB
            oom_handler: abort_on_oom,
        }
    }
}

/// Heap-side state for external-memory extensions
///
/// Shared by every object of one isolate. Registration is serialized by a
/// lock; counters are atomics so statistics can be read from any thread.
pub struct GcHeap<E: Extension> {
    config: GcConfig,
    extensions: Mutex<ExtensionRegistry<E>>,
    /// Number of sweeps performed
    sweep_count: AtomicU64,
    /// Bytes released over the heap's lifetime
    total_freed_bytes: AtomicUsize,
}

impl<E: Extension> GcHeap<E> {
    /// Create new heap with default config
    pub fn new() -> Arc<Self> {
        Self::with_config(GcConfig::default())
    }

    /// Create new heap with custom config
    pub fn with_config(config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            extensions: Mutex::new(ExtensionRegistry::new()),
            sweep_count: AtomicU64::new(0),
            total_freed_bytes: AtomicUsize::new(0),
        })
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Register an extension so the sweeper will visit it
    pub fn append_array_buffer_extension(&self, extension: Arc<E>) {
        #[cfg(feature = "gc_logging")]
        tracing::trace!(
            target: "otter::gc",
            bytes = extension.accounting_length(),
            "append array buffer extension"
        );
        self.extensions.lock().append(extension);
    }

    /// Unregister an extension; its accounting bytes are released immediately
    pub fn detach_array_buffer_extension(&self, extension: &Arc<E>) -> Option<Generation> {
        #[cfg(feature = "gc_logging")]
        tracing::trace!(
            target: "otter::gc",
            bytes = extension.accounting_length(),
            "detach array buffer extension"
        );
        self.extensions.lock().detach(extension)
    }

    /// Re-charge an extension whose accounting length changed
    pub fn resize_array_buffer_extension(
        &self,
        extension: &Arc<E>,
        old_bytes: usize,
        new_bytes: usize,
    ) {
        self.extensions
            .lock()
            .resize(extension, old_bytes, new_bytes);
    }

    /// Generation the extension is registered in, if any
    pub fn extension_generation(&self, extension: &Arc<E>) -> Option<Generation> {
        self.extensions.lock().generation_of(extension)
    }

    /// Number of registered extensions
    pub fn extension_count(&self) -> usize {
        self.extensions.lock().len()
    }

    /// External bytes charged by all registered extensions
    pub fn external_memory(&self) -> usize {
        self.extensions.lock().external_bytes()
    }

    /// External bytes charged by young extensions
    pub fn young_external_memory(&self) -> usize {
        self.extensions.lock().young_bytes()
    }

    /// External bytes charged by old extensions
    pub fn old_external_memory(&self) -> usize {
        self.extensions.lock().old_bytes()
    }

    /// Whether young external memory exceeds the configured limit
    pub fn should_sweep_young(&self) -> bool {
        self.young_external_memory() > self.config.young_external_limit
    }

    /// Sweep extensions after a tracing pass has set their marks
    pub fn sweep_array_buffer_extensions(&self, scope: SweepScope) -> SweepStats {
        #[cfg(feature = "gc_logging")]
        let start = std::time::Instant::now();

        let stats = self.extensions.lock().sweep(scope);
        let sweep_num = self.sweep_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_freed_bytes
            .fetch_add(stats.freed_bytes, Ordering::Relaxed);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "otter::gc",
            sweep = sweep_num,
            ?scope,
            freed = stats.freed,
            freed_bytes = stats.freed_bytes,
            promoted = stats.promoted,
            surviving = stats.surviving,
            pause_us = start.elapsed().as_micros() as u64,
            "array buffer extension sweep complete"
        );
        #[cfg(not(feature = "gc_logging"))]
        let _ = sweep_num;

        stats
    }

    /// Number of sweeps performed
    pub fn sweep_count(&self) -> u64 {
        self.sweep_count.load(Ordering::Relaxed)
    }

    /// Bytes released by sweeps over the heap's lifetime
    pub fn total_freed_bytes(&self) -> usize {
        self.total_freed_bytes.load(Ordering::Relaxed)
    }

    /// Terminate on unrecoverable allocation failure
    pub fn fatal_process_out_of_memory(&self, location: &str) -> ! {
        #[cfg(feature = "gc_logging")]
        tracing::error!(target: "otter::gc", location, "fatal process out of memory");
        (self.config.oom_handler)(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marks::{ExtensionMarks, MarkScope};

    struct Record {
        marks: ExtensionMarks,
        bytes: usize,
    }

    impl Extension for Record {
        fn marks(&self) -> &ExtensionMarks {
            &self.marks
        }

        fn accounting_length(&self) -> usize {
            self.bytes
        }

        fn release(&self) {}
    }

    fn record(bytes: usize) -> Arc<Record> {
        Arc::new(Record {
            marks: ExtensionMarks::new(),
            bytes,
        })
    }

    fn panic_on_oom(location: &str) -> ! {
        panic!("oom: {location}")
    }

    #[test]
    fn test_heap_creation() {
        let heap = GcHeap::<Record>::new();
        assert_eq!(heap.extension_count(), 0);
        assert_eq!(heap.external_memory(), 0);
        assert_eq!(heap.sweep_count(), 0);
    }

    #[test]
    fn test_should_sweep_young() {
        let heap = GcHeap::with_config(GcConfig {
            young_external_limit: 100,
            ..GcConfig::default()
        });
        heap.append_array_buffer_extension(record(60));
        assert!(!heap.should_sweep_young());
        heap.append_array_buffer_extension(record(60));
        assert!(heap.should_sweep_young());
    }

    #[test]
    fn test_sweep_updates_totals() {
        let heap = GcHeap::new();
        let live = record(5);
        heap.append_array_buffer_extension(live.clone());
        heap.append_array_buffer_extension(record(7));
        live.marks().mark(MarkScope::Young);

        let stats = heap.sweep_array_buffer_extensions(SweepScope::Young);
        assert_eq!(stats.freed_bytes, 7);
        assert_eq!(heap.total_freed_bytes(), 7);
        assert_eq!(heap.sweep_count(), 1);
        assert_eq!(heap.external_memory(), 5);
        assert_eq!(heap.extension_generation(&live), Some(Generation::Young));
    }

    #[test]
    #[should_panic(expected = "oom: test site")]
    fn test_fatal_oom_calls_handler() {
        let heap = GcHeap::<Record>::with_config(GcConfig {
            oom_handler: panic_on_oom,
            ..GcConfig::default()
        });
        heap.fatal_process_out_of_memory("test site");
    }
}
