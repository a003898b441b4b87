//! Memory accounting
//!
//! The VM has no per-value collector: objects and strings live until VM
//! teardown, so allocation is bounded by booking every heap allocation
//! against a per-VM limit. Exhaustion surfaces as `MemoryError`.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{VmError, VmResult};

/// Default arena limit (64 MiB)
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Books heap allocations against a per-VM limit
pub struct MemoryTracker {
    /// Total bytes currently booked
    allocated: AtomicUsize,
    /// Maximum bytes allowed for this VM
    limit: usize,
}

impl MemoryTracker {
    /// Create a tracker with the given limit
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            limit,
        }
    }

    /// Tracker with an effectively unlimited budget (tests)
    pub fn unlimited() -> Self {
        Self::new(usize::MAX / 2)
    }

    /// Book `size` bytes; fails with `MemoryError` past the limit
    pub fn book(&self, size: usize) -> VmResult<()> {
        let current = self.allocated.load(Ordering::Relaxed);
        if current.saturating_add(size) > self.limit {
            return Err(VmError::memory(format!(
                "arena limit of {} bytes exceeded",
                self.limit
            )));
        }
        self.allocated.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    /// Release previously booked bytes (frame-pool reclamation)
    pub fn release(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Bytes currently booked
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// The configured limit
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking() {
        let tracker = MemoryTracker::new(1000);
        tracker.book(400).unwrap();
        tracker.book(400).unwrap();
        assert_eq!(tracker.allocated(), 800);
        assert!(tracker.book(400).is_err());
    }

    #[test]
    fn test_release() {
        let tracker = MemoryTracker::new(1000);
        tracker.book(900).unwrap();
        tracker.release(500);
        tracker.book(400).unwrap();
        assert_eq!(tracker.allocated(), 800);
    }

    #[test]
    fn test_exhaustion_is_memory_error() {
        let tracker = MemoryTracker::new(10);
        let err = tracker.book(100).unwrap_err();
        assert!(err.is_fatal());
    }
}
