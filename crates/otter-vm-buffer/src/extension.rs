//! Array buffer extensions
//!
//! The collector never scans buffer contents. Instead each buffer that has
//! memory owns an `ArrayBufferExtension`, registered with the heap, which holds
//! the backing store handle and the mark bits the tracer sets. A sweep drops
//! the handles of extensions nobody marked once their buffer is gone; an
//! attached buffer keeps its extension alive.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use otter_vm_gc::{Extension, ExtensionMarks, MarkScope};

use crate::backing_store::BackingStore;

/// GC-visible record pairing a buffer with its backing store
#[derive(Debug, Default)]
pub struct ArrayBufferExtension {
    backing_store: Mutex<Option<Arc<BackingStore>>>,
    accounting_length: AtomicUsize,
    marks: ExtensionMarks,
}

impl ArrayBufferExtension {
    /// Create an extension holding `backing_store`
    pub fn new(backing_store: Option<Arc<BackingStore>>, accounting_length: usize) -> Arc<Self> {
        Arc::new(Self {
            backing_store: Mutex::new(backing_store),
            accounting_length: AtomicUsize::new(accounting_length),
            marks: ExtensionMarks::new(),
        })
    }

    /// Clone of the store handle, if any
    pub fn backing_store(&self) -> Option<Arc<BackingStore>> {
        self.backing_store.lock().clone()
    }

    /// Replace the store handle
    pub fn set_backing_store(&self, backing_store: Arc<BackingStore>) {
        *self.backing_store.lock() = Some(backing_store);
    }

    /// Take the store handle out, leaving the extension empty
    pub fn remove_backing_store(&self) -> Option<Arc<BackingStore>> {
        self.backing_store.lock().take()
    }

    /// Bytes charged for this extension
    pub fn accounting_length(&self) -> usize {
        self.accounting_length.load(Ordering::Relaxed)
    }

    /// Set the bytes charged for this extension
    pub fn set_accounting_length(&self, accounting_length: usize) {
        self.accounting_length
            .store(accounting_length, Ordering::Relaxed);
    }

    /// Mark bits
    pub fn marks(&self) -> &ExtensionMarks {
        &self.marks
    }

    /// Mark for a full collection
    pub fn mark(&self) {
        self.marks.mark(MarkScope::Full);
    }

    /// Mark for a young collection; the extension stays young
    pub fn young_mark(&self) {
        self.marks.mark(MarkScope::Young);
    }

    /// Mark for a young collection; the extension moves to the old list
    pub fn young_mark_promoted(&self) {
        self.marks.mark(MarkScope::YoungPromoted);
    }
}

impl Extension for ArrayBufferExtension {
    fn marks(&self) -> &ExtensionMarks {
        &self.marks
    }

    fn accounting_length(&self) -> usize {
        ArrayBufferExtension::accounting_length(self)
    }

    fn release(&self) {
        self.remove_backing_store();
    }
}
