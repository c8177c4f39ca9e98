//! Acceptors - Slot Visitors for Evacuation and Marking
//!
//! An [`Acceptor`] is handed every reference-bearing slot of a cell (or
//! root). Three implementations drive the collector:
//! - [`EvacAcceptor`]: young collection. Forwards young/compactee cells
//!   into the old gen, threading newly copied cells onto a copy list.
//! - [`MarkAcceptor`]: old-gen marking. Sets mark bits and grows the local
//!   worklist; defers weak maps for the ephemeron pass.
//! - [`ClearWeakRootsAcceptor`]: complete-marking pass that nulls weak
//!   roots whose referents did not survive.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::cell::{CellKind, CopyListCell, GcCell};
use crate::heap::worklist::CellPtr;
use crate::heap::MarkState;
use crate::heap::old::OldGen;
use crate::pointer::{CompressedPointer, PointerBase, WeakSlotTable};
use crate::runtime::IdTracker;
use crate::segment::{self, card_table};
use crate::value::{HermesValue, SmallHermesValue, SymbolId};

/// Visitor over the typed slots of cells and roots.
///
/// Heap-slot methods receive the address of the slot so relocating
/// acceptors can write the new location back and barrier-like acceptors
/// can find the covering card. Root methods visit locations outside the
/// heap.
pub trait Acceptor {
    fn accept_ptr(&mut self, loc: *mut CompressedPointer);
    fn accept_hv(&mut self, loc: *mut HermesValue);
    fn accept_shv(&mut self, loc: *mut SmallHermesValue);
    fn accept_sym(&mut self, sym: SymbolId);
    fn accept_weak_root(&mut self, loc: *mut CompressedPointer);
    fn accept_weak_slot(&mut self, slot: u32);

    /// A root holding a full value (e.g. a handle).
    fn accept_root_hv(&mut self, loc: *mut HermesValue);
}

/// Read a slot the mutator may be writing concurrently. Fields are at most
/// 64 bits, so an atomic relaxed load observes either the old or the new
/// value; the write barrier guarantees the old value is already enqueued.
#[inline]
pub(crate) unsafe fn concurrent_read_u32(loc: *const u32) -> u32 {
    (*(loc as *const AtomicU32)).load(Ordering::Relaxed)
}

#[inline]
pub(crate) unsafe fn concurrent_read_u64(loc: *const u64) -> u64 {
    (*(loc as *const AtomicU64)).load(Ordering::Relaxed)
}

/// Sentinel for "no compactee": a non-null address that can never be a
/// segment start.
pub const INVALID_COMPACTEE: usize = 0x1;

/// Evacuates young-gen (and optionally compactee) cells into the old gen.
pub struct EvacAcceptor<'a> {
    pub old: &'a mut OldGen,
    pub ids: &'a mut IdTracker,
    pub pb: &'a PointerBase,
    pub yg_base: usize,
    /// Segment marked for compaction (or `INVALID_COMPACTEE`).
    pub compactee_start: usize,
    /// Segment actively being evacuated (or `INVALID_COMPACTEE`).
    pub compactee_evac_start: usize,
    pub compaction_enabled: bool,
    /// Base of the segment currently being card-scanned; slots visited
    /// outside a card scan resolve their own base.
    pub scan_base: usize,
    copy_list: CompressedPointer,
    pub evacuated_bytes: u64,
}

impl<'a> EvacAcceptor<'a> {
    pub fn new(
        old: &'a mut OldGen,
        ids: &'a mut IdTracker,
        pb: &'a PointerBase,
        yg_base: usize,
        compactee_start: usize,
        compactee_evac_start: usize,
    ) -> Self {
        EvacAcceptor {
            old,
            ids,
            pb,
            yg_base,
            compactee_start,
            compactee_evac_start,
            compaction_enabled: compactee_start != INVALID_COMPACTEE,
            scan_base: 0,
            copy_list: CompressedPointer::NULL,
            evacuated_bytes: 0,
        }
    }

    #[inline]
    fn should_forward(&self, ptr: *const GcCell) -> bool {
        let base = segment::storage_start(ptr as usize);
        base == self.yg_base || (self.compaction_enabled && base == self.compactee_evac_start)
    }

    /// Forward `cell`, copying it into the old generation on first
    /// discovery.
    unsafe fn forward_cell(&mut self, cell: *mut GcCell) -> *mut GcCell {
        if (*cell).has_marked_forwarding_pointer() {
            return (*cell).marked_forwarding_pointer().get_non_null(self.pb);
        }
        debug_assert!((*cell).is_valid(), "forwarding an invalid cell");
        let size = (*cell).allocated_size();
        let new_cell = match self.old.alloc(size) {
            Ok(ptr) => ptr,
            Err(err) => crate::heap::oom(err),
        };
        debug_assert!(
            segment::mark_bits::get_cell_mark_bit(new_cell),
            "evacuated cell must be marked by the old-gen allocator"
        );
        std::ptr::copy_nonoverlapping(cell as *const u8, new_cell as *mut u8, size);
        self.ids.move_object(cell as usize, new_cell as usize);
        let fwd = self.pb.compress(new_cell);
        (*cell).set_marked_forwarding_pointer(fwd);
        self.evacuated_bytes += size as u64;
        // Thread the source onto the copy list through its first payload
        // word.
        let copy = cell as *mut CopyListCell;
        (*copy).next = self.copy_list;
        self.copy_list = self.pb.compress(cell);
        new_cell
    }

    /// Pop the next newly evacuated cell off the copy list.
    pub fn pop_copy_list(&mut self) -> Option<*mut GcCell> {
        if self.copy_list.is_null() {
            return None;
        }
        unsafe {
            let copy = self.copy_list.get_non_null(self.pb) as *mut CopyListCell;
            self.copy_list = (*copy).next;
            Some(copy as *mut GcCell)
        }
    }

    unsafe fn accept_heap_ptr(&mut self, ptr: *mut GcCell, loc: usize) -> *mut GcCell {
        if self.should_forward(ptr) {
            debug_assert!(
                segment::mark_bits::get_cell_mark_bit(ptr),
                "should only evacuate marked objects"
            );
            return self.forward_cell(ptr);
        }
        if self.compaction_enabled
            && segment::storage_start(ptr as usize) == self.compactee_start
        {
            // A compaction is being prepared; dirty the card so the next
            // young collection rediscovers this pointer when it evacuates
            // the compactee.
            let base = if self.scan_base != 0 {
                self.scan_base
            } else {
                segment::storage_start(loc)
            };
            card_table::dirty_card_for_address(base, loc);
        }
        ptr
    }
}

impl Acceptor for EvacAcceptor<'_> {
    fn accept_ptr(&mut self, loc: *mut CompressedPointer) {
        unsafe {
            let cp = *loc;
            if cp.is_null() {
                return;
            }
            let ptr = cp.get_non_null(self.pb);
            let fwd = self.accept_heap_ptr(ptr, loc as usize);
            if fwd != ptr {
                *loc = self.pb.compress(fwd);
            }
        }
    }

    fn accept_hv(&mut self, loc: *mut HermesValue) {
        unsafe {
            let hv = *loc;
            if !hv.is_pointer() {
                return;
            }
            let ptr = hv.get_pointer();
            let fwd = self.accept_heap_ptr(ptr, loc as usize);
            if fwd != ptr {
                *loc = hv.update_pointer(fwd);
            }
        }
    }

    fn accept_shv(&mut self, loc: *mut SmallHermesValue) {
        unsafe {
            let shv = *loc;
            if !shv.is_pointer() {
                return;
            }
            let ptr = shv.get_pointer().get_non_null(self.pb);
            let fwd = self.accept_heap_ptr(ptr, loc as usize);
            if fwd != ptr {
                *loc = shv.update_pointer(self.pb.compress(fwd));
            }
        }
    }

    // Young collections do not track symbol liveness.
    fn accept_sym(&mut self, _sym: SymbolId) {}

    fn accept_weak_root(&mut self, loc: *mut CompressedPointer) {
        unsafe {
            let cp = *loc;
            if cp.is_null() {
                return;
            }
            let ptr = cp.get_non_null(self.pb);
            if !self.should_forward(ptr) {
                return;
            }
            // Forward if the referent survived; otherwise the weak
            // reference dies with it.
            *loc = if (*ptr).has_marked_forwarding_pointer() {
                (*ptr).marked_forwarding_pointer()
            } else {
                CompressedPointer::NULL
            };
        }
    }

    // Weak-ref slots live in the slot table, which is updated wholesale
    // through its payloads during the weak-root pass.
    fn accept_weak_slot(&mut self, _slot: u32) {}

    fn accept_root_hv(&mut self, loc: *mut HermesValue) {
        unsafe {
            let hv = *loc;
            if !hv.is_pointer() {
                return;
            }
            let ptr = hv.get_pointer();
            if self.should_forward(ptr) {
                let fwd = self.forward_cell(ptr);
                *loc = hv.update_pointer(fwd);
            }
        }
    }
}

/// Marks the old generation. Newly discovered cells go onto the local
/// worklist; weak maps are deferred to the ephemeron pass.
pub struct MarkAcceptor<'a> {
    pub state: &'a mut MarkState,
    pub weak_slots: &'a mut WeakSlotTable,
    pub pb: &'a PointerBase,
    pub yg_base: usize,
    pub compactee_start: usize,
    /// Base of the segment owning the cell currently being scanned.
    pub scan_base: usize,
    /// The ephemeron scan pass ignores weak refs; see
    /// `heap::weakmap_marking`.
    pub skip_weak: bool,
}

impl<'a> MarkAcceptor<'a> {
    pub fn new(
        state: &'a mut MarkState,
        weak_slots: &'a mut WeakSlotTable,
        pb: &'a PointerBase,
        yg_base: usize,
        compactee_start: usize,
    ) -> Self {
        MarkAcceptor {
            state,
            weak_slots,
            pb,
            yg_base,
            compactee_start,
            scan_base: 0,
            skip_weak: false,
        }
    }

    /// Mark `cell` and queue it for scanning. Weak maps are set aside for
    /// complete marking instead.
    pub fn push(&mut self, cell: *mut GcCell) {
        unsafe {
            debug_assert!(
                !segment::mark_bits::get_cell_mark_bit(cell),
                "a marked object should never be pushed onto a worklist"
            );
            debug_assert!(
                segment::storage_start(cell as usize) != self.yg_base,
                "young cells are never pushed onto the old-gen worklist"
            );
            segment::mark_bits::set_cell_mark_bit(cell);
            // The mutator never changes a cell's kind after construction,
            // so this unsynchronized read is safe.
            if (*cell).kind() == CellKind::WeakMap {
                self.state.reachable_weak_maps.push(CellPtr(cell));
            } else {
                self.state.local_worklist.push(CellPtr(cell));
            }
        }
    }

    pub fn accept_root_cell(&mut self, cell: *mut GcCell) {
        unsafe {
            if !segment::mark_bits::get_cell_mark_bit(cell) {
                self.push(cell);
            }
        }
    }

    unsafe fn accept_heap_cell(&mut self, cell: *mut GcCell, loc: usize) {
        if segment::storage_start(cell as usize) == self.compactee_start
            && segment::storage_start(loc) != self.compactee_start
        {
            // Heap pointer into the compactee: dirty the covering card so
            // the evacuating young collection finds it.
            let base = if self.scan_base != 0 {
                self.scan_base
            } else {
                segment::storage_start(loc)
            };
            card_table::dirty_card_for_address(base, loc);
        }
        if segment::mark_bits::get_cell_mark_bit(cell) {
            return;
        }
        debug_assert!((*cell).is_valid(), "encountered an invalid cell");
        self.push(cell);
    }
}

impl Acceptor for MarkAcceptor<'_> {
    fn accept_ptr(&mut self, loc: *mut CompressedPointer) {
        unsafe {
            let cp = CompressedPointer::from_raw(concurrent_read_u32(loc as *const u32));
            if cp.is_null() {
                return;
            }
            self.accept_heap_cell(cp.get_non_null(self.pb), loc as usize);
        }
    }

    fn accept_hv(&mut self, loc: *mut HermesValue) {
        unsafe {
            let hv = HermesValue::from_raw(concurrent_read_u64(loc as *const u64));
            if hv.is_pointer() {
                self.accept_heap_cell(hv.get_pointer(), loc as usize);
            } else if hv.is_symbol() {
                self.accept_sym(hv.get_symbol());
            }
        }
    }

    fn accept_shv(&mut self, loc: *mut SmallHermesValue) {
        unsafe {
            let shv = SmallHermesValue::from_raw(concurrent_read_u32(loc as *const u32));
            if shv.is_pointer() {
                let cell = shv.get_pointer().get_non_null(self.pb);
                self.accept_heap_cell(cell, loc as usize);
            } else if shv.is_symbol() {
                self.accept_sym(shv.get_symbol());
            }
        }
    }

    fn accept_sym(&mut self, sym: SymbolId) {
        if sym.is_invalid() {
            return;
        }
        // Out-of-range symbols were allocated after the collection began
        // and are treated as live by the symbol table.
        self.state.marked_symbols.set(sym.index());
    }

    // Weak roots are only cleared once liveness is known, at complete
    // marking.
    fn accept_weak_root(&mut self, _loc: *mut CompressedPointer) {}

    fn accept_weak_slot(&mut self, slot: u32) {
        if self.skip_weak {
            return;
        }
        let slot = self.weak_slots.slot(slot);
        debug_assert!(
            slot.state() != crate::pointer::WeakSlotState::Free,
            "marking a freed weak ref slot"
        );
        if slot.state() == crate::pointer::WeakSlotState::Unmarked {
            slot.mark();
        }
    }

    fn accept_root_hv(&mut self, loc: *mut HermesValue) {
        // Roots cannot live in the heap, so there is no concurrent access
        // and no compactee card to dirty.
        unsafe {
            let hv = *loc;
            if hv.is_pointer() {
                self.accept_root_cell(hv.get_pointer());
            } else if hv.is_symbol() {
                self.accept_sym(hv.get_symbol());
            }
        }
    }
}

/// Complete-marking pass that clears weak roots whose referents are
/// unmarked. Run with the world stopped.
pub struct ClearWeakRootsAcceptor<'a> {
    pub pb: &'a PointerBase,
}

impl Acceptor for ClearWeakRootsAcceptor<'_> {
    fn accept_ptr(&mut self, _loc: *mut CompressedPointer) {}
    fn accept_hv(&mut self, _loc: *mut HermesValue) {}
    fn accept_shv(&mut self, _loc: *mut SmallHermesValue) {}
    fn accept_sym(&mut self, _sym: SymbolId) {}

    fn accept_weak_root(&mut self, loc: *mut CompressedPointer) {
        unsafe {
            let cp = *loc;
            if cp.is_null() {
                return;
            }
            let cell = cp.get_non_null(self.pb);
            if !segment::mark_bits::get_cell_mark_bit(cell) {
                *loc = CompressedPointer::NULL;
            }
        }
    }

    fn accept_weak_slot(&mut self, _slot: u32) {}
    fn accept_root_hv(&mut self, _loc: *mut HermesValue) {}
}
