//! DummyObject - Test Cell Exercising Every Slot Type
//!
//! A fixed-size object carrying one slot of each flavour the marker knows
//! about: a strong pointer, a full value, a small value, a symbol, and an
//! optional weak-ref slot. A shared finalize probe lets tests count
//! finalizer runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cell::{fixed_cell_size, CellKind, GcCell};
use crate::heap::acceptors::Acceptor;
use crate::heap::HadesGc;
use crate::pointer::gc_pointer::GcPointer;
use crate::pointer::weak::NO_WEAK_SLOT;
use crate::runtime::GcCallbacks;
use crate::value::{HermesValue, SmallHermesValue, SymbolId};

#[repr(C)]
pub struct DummyObject {
    cell: GcCell,
    pub hv: HermesValue,
    finalize_probe: Option<Arc<AtomicUsize>>,
    pub other: GcPointer<DummyObject>,
    pub shv: SmallHermesValue,
    pub sym: SymbolId,
    weak_slot: u32,
    _pad: u32,
}

impl DummyObject {
    pub const ALLOCATION_SIZE: usize = fixed_cell_size::<DummyObject>();

    /// Allocate in the young generation.
    pub fn create(gc: &mut HadesGc, rt: &mut dyn GcCallbacks) -> *mut DummyObject {
        Self::create_impl(gc, rt, false)
    }

    /// Allocate directly in the old generation.
    pub fn create_long_lived(gc: &mut HadesGc, rt: &mut dyn GcCallbacks) -> *mut DummyObject {
        Self::create_impl(gc, rt, true)
    }

    fn create_impl(
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
        long_lived: bool,
    ) -> *mut DummyObject {
        let cell = gc.alloc_cell(rt, Self::ALLOCATION_SIZE, CellKind::DummyObject, long_lived);
        let this = cell as *mut DummyObject;
        unsafe {
            std::ptr::addr_of_mut!((*this).hv).write(HermesValue::encode_undefined_value());
            std::ptr::addr_of_mut!((*this).finalize_probe).write(None);
            std::ptr::addr_of_mut!((*this).other).write(GcPointer::null());
            std::ptr::addr_of_mut!((*this).shv).write(SmallHermesValue::encode_undefined_value());
            std::ptr::addr_of_mut!((*this).sym).write(SymbolId::INVALID);
            (*this).weak_slot = NO_WEAK_SLOT;
            (*this)._pad = 0;
        }
        this
    }

    /// Attach a probe that is incremented when this object is finalized.
    ///
    /// # Safety
    /// `this` must be a live `DummyObject`.
    pub unsafe fn set_finalize_probe(this: *mut DummyObject, probe: Arc<AtomicUsize>) {
        (*this).finalize_probe = Some(probe);
    }

    /// Point this object's weak-ref slot at `target`.
    ///
    /// # Safety
    /// `this` and `target` must be live cells.
    pub unsafe fn set_weak_ref(this: *mut DummyObject, target: *mut GcCell, gc: &mut HadesGc) {
        (*this).weak_slot = gc.alloc_weak_slot(target);
    }

    /// # Safety
    /// `this` must be a live `DummyObject`.
    pub unsafe fn weak_slot(this: *const DummyObject) -> Option<u32> {
        let slot = (*this).weak_slot;
        (slot != NO_WEAK_SLOT).then_some(slot)
    }
}

pub(crate) unsafe fn visit_slots<A: Acceptor>(
    this: *mut DummyObject,
    acceptor: &mut A,
    range: Option<(usize, usize)>,
) {
    let in_range = |addr: usize| match range {
        None => true,
        Some((begin, end)) => addr >= begin && addr < end,
    };
    let other = (*this).other.slot_ptr();
    if in_range(other as usize) {
        acceptor.accept_ptr(other);
    }
    let hv = std::ptr::addr_of_mut!((*this).hv);
    if in_range(hv as usize) {
        acceptor.accept_hv(hv);
    }
    let shv = std::ptr::addr_of_mut!((*this).shv);
    if in_range(shv as usize) {
        acceptor.accept_shv(shv);
    }
    if !(*this).sym.is_invalid() && range.is_none() {
        acceptor.accept_sym((*this).sym);
    }
    if (*this).weak_slot != NO_WEAK_SLOT && range.is_none() {
        acceptor.accept_weak_slot((*this).weak_slot);
    }
}

pub(crate) unsafe fn finalize(this: *mut DummyObject) {
    // Take the probe out of the dying cell so the Arc is released exactly
    // once.
    let probe = std::ptr::addr_of_mut!((*this).finalize_probe).read();
    if let Some(probe) = probe {
        probe.fetch_add(1, Ordering::Relaxed);
    }
}
