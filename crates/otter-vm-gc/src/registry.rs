//! Registry of external-memory extensions
//!
//! Objects that own memory outside the managed heap (array buffers) register a
//! small side record with the heap instead of being scanned themselves. The
//! registry keeps those records in a young and an old list, accounts for the
//! external bytes they hold, and frees the ones the last tracing pass did not
//! reach.
//!
//! ## Sweep rules
//!
//! - **Young sweep**: visits the young list only. `YoungPromoted` records move
//!   to the old list, `Young` records stay, unmarked records are freed.
//! - **Full sweep**: visits both lists. Records without a `Full` mark are
//!   freed, the rest keep their generation.
//!
//! A record that something besides the registry still holds is reachable
//! whatever its marks say: an unmarked young record keeps its generation, an
//! unmarked full-sweep record survives. Only records the registry owns alone
//! are ever released.
//!
//! Survivors have the bits of the swept scope cleared.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::marks::{ExtensionMarks, Generation, MarkScope, SweepScope};

/// A side record the registry can account for and free
pub trait Extension: Send + Sync {
    /// Mark bits flipped by the tracer
    fn marks(&self) -> &ExtensionMarks;

    /// Bytes charged to the owning heap while the record is registered
    fn accounting_length(&self) -> usize;

    /// Drop the external resource the record holds.
    ///
    /// Called exactly once by the sweeper when the record is freed.
    fn release(&self);
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Records freed
    pub freed: usize,
    /// External bytes released with the freed records
    pub freed_bytes: usize,
    /// Records moved from the young to the old list
    pub promoted: usize,
    /// Records still registered after the sweep
    pub surviving: usize,
}

/// Young and old extension lists keyed by record identity
pub struct ExtensionRegistry<E: Extension> {
    young: FxHashMap<usize, Arc<E>>,
    old: FxHashMap<usize, Arc<E>>,
    young_bytes: usize,
    old_bytes: usize,
}

#[inline]
fn identity<E>(extension: &Arc<E>) -> usize {
    Arc::as_ptr(extension) as *const () as usize
}

impl<E: Extension> ExtensionRegistry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            young: FxHashMap::default(),
            old: FxHashMap::default(),
            young_bytes: 0,
            old_bytes: 0,
        }
    }

    /// Register `extension` in the young list.
    ///
    /// Appending a record that is already registered re-reads its accounting
    /// length and moves it to the young list.
    pub fn append(&mut self, extension: Arc<E>) {
        self.detach(&extension);
        self.young_bytes += extension.accounting_length();
        self.young.insert(identity(&extension), extension);
    }

    /// Unregister `extension`, returning the generation it was found in
    pub fn detach(&mut self, extension: &Arc<E>) -> Option<Generation> {
        let key = identity(extension);
        if let Some(removed) = self.young.remove(&key) {
            self.young_bytes = self
                .young_bytes
                .saturating_sub(removed.accounting_length());
            return Some(Generation::Young);
        }
        if let Some(removed) = self.old.remove(&key) {
            self.old_bytes = self.old_bytes.saturating_sub(removed.accounting_length());
            return Some(Generation::Old);
        }
        None
    }

    /// Re-charge a registered record whose accounting length changed from
    /// `old_bytes` to `new_bytes`
    pub fn resize(&mut self, extension: &Arc<E>, old_bytes: usize, new_bytes: usize) {
        let key = identity(extension);
        let bytes = if self.young.contains_key(&key) {
            &mut self.young_bytes
        } else if self.old.contains_key(&key) {
            &mut self.old_bytes
        } else {
            return;
        };
        *bytes = bytes.saturating_sub(old_bytes) + new_bytes;
    }

    /// Generation `extension` is registered in, if any
    pub fn generation_of(&self, extension: &Arc<E>) -> Option<Generation> {
        let key = identity(extension);
        if self.young.contains_key(&key) {
            Some(Generation::Young)
        } else if self.old.contains_key(&key) {
            Some(Generation::Old)
        } else {
            None
        }
    }

    /// Whether `extension` is registered
    pub fn contains(&self, extension: &Arc<E>) -> bool {
        self.generation_of(extension).is_some()
    }

    /// Number of registered records
    pub fn len(&self) -> usize {
        self.young.len() + self.old.len()
    }

    /// Whether no record is registered
    pub fn is_empty(&self) -> bool {
        self.young.is_empty() && self.old.is_empty()
    }

    /// Number of records in the young list
    pub fn young_len(&self) -> usize {
        self.young.len()
    }

    /// Number of records in the old list
    pub fn old_len(&self) -> usize {
        self.old.len()
    }

    /// External bytes held by young records
    pub fn young_bytes(&self) -> usize {
        self.young_bytes
    }

    /// External bytes held by old records
    pub fn old_bytes(&self) -> usize {
        self.old_bytes
    }

    /// External bytes held by all records
    pub fn external_bytes(&self) -> usize {
        self.young_bytes + self.old_bytes
    }

    /// Free unmarked records and age the survivors
    pub fn sweep(&mut self, scope: SweepScope) -> SweepStats {
        let mut stats = SweepStats::default();
        match scope {
            SweepScope::Young => self.sweep_young(&mut stats),
            SweepScope::Full => self.sweep_full(&mut stats),
        }
        stats.surviving = self.len();
        stats
    }

    fn sweep_young(&mut self, stats: &mut SweepStats) {
        let young = std::mem::take(&mut self.young);
        self.young_bytes = 0;
        for (key, extension) in young {
            let marks = extension.marks();
            let bytes = extension.accounting_length();
            if marks.is_marked(MarkScope::YoungPromoted) {
                marks.clear_young();
                self.old_bytes += bytes;
                self.old.insert(key, extension);
                stats.promoted += 1;
            } else if marks.is_marked(MarkScope::Young) || Self::is_held_elsewhere(&extension) {
                marks.clear_young();
                self.young_bytes += bytes;
                self.young.insert(key, extension);
            } else {
                Self::free(extension, stats);
            }
        }
    }

    fn sweep_full(&mut self, stats: &mut SweepStats) {
        let (young_bytes, young) = Self::retain_full_marked(std::mem::take(&mut self.young), stats);
        let (old_bytes, old) = Self::retain_full_marked(std::mem::take(&mut self.old), stats);
        self.young = young;
        self.young_bytes = young_bytes;
        self.old = old;
        self.old_bytes = old_bytes;
    }

    fn retain_full_marked(
        list: FxHashMap<usize, Arc<E>>,
        stats: &mut SweepStats,
    ) -> (usize, FxHashMap<usize, Arc<E>>) {
        let mut bytes = 0;
        let mut kept = FxHashMap::default();
        for (key, extension) in list {
            if extension.marks().is_marked(MarkScope::Full)
                || Self::is_held_elsewhere(&extension)
            {
                extension.marks().clear();
                bytes += extension.accounting_length();
                kept.insert(key, extension);
            } else {
                Self::free(extension, stats);
            }
        }
        (bytes, kept)
    }

    /// An owner outside the registry keeps the record alive
    #[inline]
    fn is_held_elsewhere(extension: &Arc<E>) -> bool {
        Arc::strong_count(extension) > 1
    }

    fn free(extension: Arc<E>, stats: &mut SweepStats) {
        stats.freed += 1;
        stats.freed_bytes += extension.accounting_length();
        extension.marks().clear();
        extension.release();
    }
}

impl<E: Extension> Default for ExtensionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
