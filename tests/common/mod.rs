//! Shared test fixture: a minimal runtime with explicit roots, a toy
//! symbol table, and convenience helpers for allocating test objects.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use hades_gc::cell::{DummyObject, GcCell};
use hades_gc::heap::acceptors::Acceptor;
use hades_gc::pointer::WeakRoot;
use hades_gc::util::BitVector;
use hades_gc::{GcCallbacks, GcConfig, HadesGc, HermesValue, SymbolId};

/// A stand-in for the engine runtime: owns the roots the GC traces from.
#[derive(Default)]
pub struct DummyRuntime {
    pub roots: Vec<HermesValue>,
    pub weak_roots: Vec<WeakRoot<GcCell>>,
    /// Weak-ref slots this runtime holds alive (like live JSWeakRef
    /// objects would); marked during root marking.
    pub weak_refs: Vec<u32>,
    /// Toy symbol table: true = live.
    pub symbols: Vec<bool>,
}

impl GcCallbacks for DummyRuntime {
    fn mark_roots(&mut self, acceptor: &mut dyn Acceptor, _mark_long_lived: bool) {
        for root in &mut self.roots {
            acceptor.accept_root_hv(root as *mut HermesValue);
        }
        for &slot in &self.weak_refs {
            acceptor.accept_weak_slot(slot);
        }
    }

    fn mark_roots_for_complete_marking(&mut self, acceptor: &mut dyn Acceptor) {
        // This runtime has no barrier-less caches; remarking everything is
        // a safe superset.
        for root in &mut self.roots {
            acceptor.accept_root_hv(root as *mut HermesValue);
        }
    }

    fn mark_weak_roots(&mut self, acceptor: &mut dyn Acceptor, _mark_long_lived: bool) {
        for weak in &mut self.weak_roots {
            acceptor.accept_weak_root(weak.location());
        }
    }

    fn symbols_end(&self) -> usize {
        self.symbols.len()
    }

    fn unmark_symbols(&mut self) {}

    fn free_symbols(&mut self, live: &BitVector) {
        for (idx, slot) in self.symbols.iter_mut().enumerate() {
            if !live.at(idx) {
                *slot = false;
            }
        }
    }

    fn is_symbol_live(&self, sym: SymbolId) -> bool {
        self.symbols.get(sym.index()).copied().unwrap_or(false)
    }
}

impl DummyRuntime {
    pub fn new_symbol(&mut self) -> SymbolId {
        self.symbols.push(true);
        SymbolId((self.symbols.len() - 1) as u32)
    }
}

/// GC plus runtime, wired together for a test.
pub struct GcFixture {
    pub gc: HadesGc,
    pub rt: DummyRuntime,
}

impl GcFixture {
    /// Deterministic configuration: incremental (non-concurrent) old-gen
    /// collection, small heap.
    pub fn with_defaults() -> Self {
        Self::with_config(GcConfig {
            max_heap_size: 128 * 1024 * 1024,
            concurrent: false,
            ..Default::default()
        })
    }

    pub fn with_config(config: GcConfig) -> Self {
        GcFixture {
            gc: HadesGc::new(config).expect("failed to create GC"),
            rt: DummyRuntime::default(),
        }
    }

    /// Register a root and return its index, so the (possibly moved)
    /// object can be re-read after collections.
    pub fn root(&mut self, cell: *mut GcCell) -> usize {
        self.rt
            .roots
            .push(HermesValue::encode_object_value(cell));
        self.rt.roots.len() - 1
    }

    pub fn root_ptr(&self, idx: usize) -> *mut GcCell {
        self.rt.roots[idx].get_pointer()
    }

    pub fn unroot(&mut self, idx: usize) {
        self.rt.roots[idx] = HermesValue::encode_undefined_value();
    }

    pub fn alloc_dummy(&mut self) -> *mut DummyObject {
        DummyObject::create(&mut self.gc, &mut self.rt)
    }

    /// Allocate a dummy object wired to a finalize counter.
    pub fn alloc_dummy_with_probe(&mut self) -> (*mut DummyObject, Arc<AtomicUsize>) {
        let obj = DummyObject::create(&mut self.gc, &mut self.rt);
        let probe = Arc::new(AtomicUsize::new(0));
        unsafe { DummyObject::set_finalize_probe(obj, Arc::clone(&probe)) };
        (obj, probe)
    }

    /// Create a weak reference whose slot the runtime keeps alive, like a
    /// live JSWeakRef object would.
    pub fn new_weak_ref<T>(&mut self, cell: *mut T) -> hades_gc::WeakRef<T> {
        let weak = hades_gc::WeakRef::new(cell, &mut self.gc);
        self.rt.weak_refs.push(weak.slot_index());
        weak
    }

    /// Force a single young collection.
    pub fn young_collect(&mut self) {
        let GcFixture { gc, rt } = self;
        gc.young_collection(rt, "test");
    }

    /// Force a full (young + old, compacting) collection.
    pub fn collect(&mut self) {
        let GcFixture { gc, rt } = self;
        gc.collect(rt, "test");
    }
}
