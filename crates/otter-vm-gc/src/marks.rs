//! Generation-scoped mark bits for external side-table records
//!
//! The collector never scans the memory an extension points at. It only flips
//! these bits while tracing the owning object, and the sweeper reads them
//! afterwards to decide which records survive.

use std::sync::atomic::{AtomicU8, Ordering};

/// Which tracing pass set a mark
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkScope {
    /// Reached by a young-generation pass; the owner stays young
    Young = 0b001,
    /// Reached by a young-generation pass; the owner is being promoted
    YoungPromoted = 0b010,
    /// Reached by a full pass
    Full = 0b100,
}

/// Which lists a sweep visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    /// Only records in the young list
    Young,
    /// Young and old lists
    Full,
}

/// Generation a registered record currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Appended since the last young sweep that promoted it
    Young,
    /// Survived a promoting young sweep
    Old,
}

const YOUNG_BITS: u8 = MarkScope::Young as u8 | MarkScope::YoungPromoted as u8;

/// Mark bits carried by every extension record
#[derive(Debug, Default)]
pub struct ExtensionMarks {
    bits: AtomicU8,
}

impl ExtensionMarks {
    /// Create an unmarked set of bits
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
        }
    }

    /// Set the mark for `scope`
    ///
    /// Marking is idempotent and may race with other marker threads.
    #[inline]
    pub fn mark(&self, scope: MarkScope) {
        self.bits.fetch_or(scope as u8, Ordering::AcqRel);
    }

    /// Check whether `scope` has been marked since the last clear
    #[inline]
    pub fn is_marked(&self, scope: MarkScope) -> bool {
        self.bits.load(Ordering::Acquire) & scope as u8 != 0
    }

    /// Whether any young-generation pass reached the record
    #[inline]
    pub fn is_young_marked(&self) -> bool {
        self.bits.load(Ordering::Acquire) & YOUNG_BITS != 0
    }

    /// Clear the young-generation bits, keeping a pending full mark
    pub fn clear_young(&self) {
        self.bits.fetch_and(!YOUNG_BITS, Ordering::AcqRel);
    }

    /// Clear every bit
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}
