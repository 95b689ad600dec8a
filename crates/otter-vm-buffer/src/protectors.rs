//! Process-wide protectors
//!
//! A protector is an assumption optimized code may bake in ("no array buffer
//! was ever detached"). It starts intact and can only be invalidated, once.

use std::sync::atomic::{AtomicBool, Ordering};

/// One-way `intact -> invalidated` flag
#[derive(Debug)]
pub struct Protector {
    name: &'static str,
    intact: AtomicBool,
}

impl Protector {
    /// Create an intact protector
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            intact: AtomicBool::new(true),
        }
    }

    /// Protector name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the assumption still holds
    #[inline]
    pub fn is_intact(&self) -> bool {
        self.intact.load(Ordering::Acquire)
    }

    /// Invalidate the protector
    ///
    /// Returns `true` for the call that performed the transition; every later
    /// call is a no-op returning `false`.
    pub fn invalidate(&self) -> bool {
        let was_intact = self.intact.swap(false, Ordering::AcqRel);
        if was_intact {
            tracing::debug!(target: "otter::buffer", protector = self.name, "protector invalidated");
        }
        was_intact
    }
}

/// Intact until the first array buffer in the process is detached
pub static ARRAY_BUFFER_DETACHING: Protector = Protector::new("ArrayBufferDetaching");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_once() {
        let protector = Protector::new("Test");
        assert!(protector.is_intact());
        assert!(protector.invalidate());
        assert!(!protector.is_intact());
        assert!(!protector.invalidate());
        assert!(!protector.is_intact());
    }
}
