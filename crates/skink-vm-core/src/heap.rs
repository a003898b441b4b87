//! Allocation facade
//!
//! All object and string creation funnels through here so every heap
//! allocation is booked against the VM's memory limit. There is no
//! per-value collector: the arena empties at VM teardown.

use std::sync::Arc;

use crate::error::VmResult;
use crate::memory::MemoryTracker;
use crate::object::{JsObject, ObjectKind};
use crate::string::JsString;
use crate::value::Value;

/// Approximate footprint of an object shell
const OBJECT_BASE_SIZE: usize = 128;
/// Approximate footprint of one array cell
const CELL_SIZE: usize = 16;

/// Books allocations and constructs heap values
pub struct Heap {
    tracker: MemoryTracker,
}

impl Heap {
    /// Create a heap with the given tracker
    pub fn new(tracker: MemoryTracker) -> Self {
        Self { tracker }
    }

    /// The underlying tracker
    pub fn tracker(&self) -> &MemoryTracker {
        &self.tracker
    }

    /// Allocate an object of a kind
    pub fn alloc_object(
        &self,
        kind: ObjectKind,
        prototype: Option<Arc<JsObject>>,
    ) -> VmResult<Arc<JsObject>> {
        self.tracker.book(OBJECT_BASE_SIZE)?;
        Ok(JsObject::new(kind, prototype))
    }

    /// Allocate a plain object
    pub fn alloc_plain(&self, prototype: Option<Arc<JsObject>>) -> VmResult<Arc<JsObject>> {
        self.alloc_object(ObjectKind::Plain, prototype)
    }

    /// Allocate an array of `len` hole cells
    pub fn alloc_array(
        &self,
        len: u32,
        prototype: Option<Arc<JsObject>>,
    ) -> VmResult<Arc<JsObject>> {
        self.tracker
            .book(OBJECT_BASE_SIZE + len as usize * CELL_SIZE)?;
        Ok(JsObject::array(len, prototype))
    }

    /// Allocate a string value
    pub fn alloc_string(&self, s: &str) -> VmResult<Value> {
        self.tracker.book(s.len().max(16))?;
        Ok(Value::string(JsString::new(s)))
    }

    /// Allocate a string value from an owned buffer
    pub fn alloc_string_owned(&self, s: String) -> VmResult<Value> {
        self.tracker.book(s.len().max(16))?;
        Ok(Value::string(JsString::from_string(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_booked() {
        let heap = Heap::new(MemoryTracker::new(1024));
        let before = heap.tracker().allocated();
        heap.alloc_plain(None).unwrap();
        assert!(heap.tracker().allocated() > before);
    }

    #[test]
    fn test_exhaustion() {
        let heap = Heap::new(MemoryTracker::new(256));
        assert!(heap.alloc_array(1024, None).is_err());
    }
}
