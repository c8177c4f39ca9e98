//! Runtime Interfaces - Callbacks, Crash Manager, Id Tracking
//!
//! The GC core treats the rest of the engine as a set of collaborators
//! behind these interfaces: the runtime walks its roots and owns the
//! symbol table; the crash manager receives diagnostic key/value pairs;
//! the id tracker hands out stable object identities for the inspector
//! and tests.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::heap::acceptors::Acceptor;
use crate::util::BitVector;
use crate::value::SymbolId;

/// Callbacks the heap manager makes into the host runtime.
pub trait GcCallbacks {
    /// Walk all mutator roots. `mark_long_lived` additionally visits roots
    /// that only matter when old-gen cells can move.
    fn mark_roots(&mut self, acceptor: &mut dyn Acceptor, mark_long_lived: bool);

    /// Walk roots that write barriers cannot cover (e.g. thread-local
    /// caches refreshed since barrier-start). Called during the
    /// complete-marking pause.
    fn mark_roots_for_complete_marking(&mut self, acceptor: &mut dyn Acceptor);

    /// Walk all weak roots held by the runtime.
    fn mark_weak_roots(&mut self, acceptor: &mut dyn Acceptor, mark_long_lived: bool);

    /// One past the highest symbol id allocated so far.
    fn symbols_end(&self) -> usize;

    /// Reset symbol liveness ahead of a collection.
    fn unmark_symbols(&mut self);

    /// Reclaim every symbol whose bit is clear in `live`.
    fn free_symbols(&mut self, live: &BitVector);

    fn is_symbol_live(&self, sym: SymbolId) -> bool;

    /// Mutator-external malloc'd memory, for heap info reporting.
    fn malloc_size(&self) -> usize {
        0
    }
}

/// Sink for crash-time diagnostics. The GC publishes its kind once and one
/// entry per live segment.
pub trait CrashManager: Send + Sync {
    fn set_custom_data(&self, key: &str, value: &str);
    fn set_contextual_custom_data(&self, key: &str, value: &str);
    fn remove_contextual_custom_data(&self, key: &str);
}

/// Crash manager that drops everything.
pub struct NopCrashManager;

impl CrashManager for NopCrashManager {
    fn set_custom_data(&self, _key: &str, _value: &str) {}
    fn set_contextual_custom_data(&self, _key: &str, _value: &str) {}
    fn remove_contextual_custom_data(&self, _key: &str) {}
}

/// Crash manager that records data in insertion order; used by tests and
/// embedders that snapshot the state themselves.
#[derive(Default)]
pub struct InMemoryCrashManager {
    custom: Mutex<IndexMap<String, String>>,
    contextual: Mutex<IndexMap<String, String>>,
}

impl InMemoryCrashManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn custom_data(&self) -> IndexMap<String, String> {
        self.custom.lock().clone()
    }

    pub fn contextual_data(&self) -> IndexMap<String, String> {
        self.contextual.lock().clone()
    }
}

impl CrashManager for InMemoryCrashManager {
    fn set_custom_data(&self, key: &str, value: &str) {
        self.custom.lock().insert(key.to_string(), value.to_string());
    }

    fn set_contextual_custom_data(&self, key: &str, value: &str) {
        self.contextual
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    fn remove_contextual_custom_data(&self, key: &str) {
        self.contextual.lock().shift_remove(key);
    }
}

/// Ids reserved for runtime singletons. Tests and serializers rely on
/// these being stable, so they occupy a small contiguous range below every
/// dynamically assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ReservedObjectId {
    Undefined = 1,
    Null = 2,
    True = 3,
    False = 4,
    Empty = 5,
    FirstNumber = 6,
}

/// One past the reserved range (a few slots are kept spare for future
/// singletons).
pub const FIRST_DYNAMIC_OBJECT_ID: u64 = 64;

/// Assigns stable ids to cells. Ids survive evacuation and compaction via
/// `move_object`, and die with the cell via `untrack`.
pub struct IdTracker {
    next_id: u64,
    by_addr: HashMap<usize, u64>,
    by_id: HashMap<u64, usize>,
}

impl IdTracker {
    pub fn new() -> Self {
        IdTracker {
            next_id: FIRST_DYNAMIC_OBJECT_ID,
            by_addr: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// The id for the cell at `addr`, assigning one on first use.
    pub fn object_id(&mut self, addr: usize) -> u64 {
        if let Some(&id) = self.by_addr.get(&addr) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_addr.insert(addr, id);
        self.by_id.insert(id, addr);
        id
    }

    pub fn object_for_id(&self, id: u64) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// The cell moved; its id follows it.
    pub fn move_object(&mut self, from: usize, to: usize) {
        if let Some(id) = self.by_addr.remove(&from) {
            self.by_addr.insert(to, id);
            self.by_id.insert(id, to);
        }
    }

    /// The cell died; forget its id.
    pub fn untrack(&mut self, addr: usize) {
        if let Some(id) = self.by_addr.remove(&addr) {
            self.by_id.remove(&id);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.by_addr.len()
    }
}

impl Default for IdTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of heap counters, as reported by `heap_info`.
#[derive(Debug, Clone, Default)]
pub struct HeapInfo {
    pub allocated_bytes: u64,
    pub heap_size: u64,
    pub external_bytes: u64,
    pub total_allocated_bytes: u64,
    pub num_young_collections: u64,
    pub num_old_collections: u64,
    pub num_compactions: u64,
    pub num_collected_objects: u64,
    pub num_large_allocations: u64,
    pub malloc_size: u64,
}

/// Context handed to the heap-size tripwire callback. The callback must
/// not allocate on the GC heap.
#[derive(Debug, Clone)]
pub struct TripwireContext {
    pub used_bytes: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_tracker_round_trip() {
        let mut ids = IdTracker::new();
        let a = ids.object_id(0x1000);
        let b = ids.object_id(0x2000);
        assert_ne!(a, b);
        assert!(a >= FIRST_DYNAMIC_OBJECT_ID);
        // Stable on repeat queries.
        assert_eq!(ids.object_id(0x1000), a);
        assert_eq!(ids.object_for_id(a), Some(0x1000));

        ids.move_object(0x1000, 0x3000);
        assert_eq!(ids.object_id(0x3000), a);
        assert_eq!(ids.object_for_id(a), Some(0x3000));

        ids.untrack(0x3000);
        assert_eq!(ids.object_for_id(a), None);
        // The address can be reused with a fresh id.
        assert_ne!(ids.object_id(0x3000), a);
    }

    #[test]
    fn test_in_memory_crash_manager() {
        let mgr = InMemoryCrashManager::new();
        mgr.set_custom_data("HermesGC", "hades");
        mgr.set_contextual_custom_data("HadesGC:HeapSegment:YG", "0x400000");
        mgr.set_contextual_custom_data("HadesGC:HeapSegment:1", "0x800000");
        mgr.remove_contextual_custom_data("HadesGC:HeapSegment:1");
        assert_eq!(mgr.custom_data().get("HermesGC").unwrap(), "hades");
        assert!(mgr.contextual_data().contains_key("HadesGC:HeapSegment:YG"));
        assert!(!mgr.contextual_data().contains_key("HadesGC:HeapSegment:1"));
    }
}
