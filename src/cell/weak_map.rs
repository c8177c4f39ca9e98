//! JsWeakMap - Ephemeron Map Cell
//!
//! A weak map holds entries of (weak key, value index). Keys are slots in
//! the GC-owned weak-slot table, so young evacuation and slot reclamation
//! update them through the normal weak machinery. Values live in a
//! separate `ArrayStorage` pointed to by `value_storage`; that indirection
//! is what the ephemeron marking pass relies on when it temporarily nulls
//! the field to avoid retaining values of unreachable keys.
//!
//! The map and its value storage are allocated directly in the old
//! generation so that inserts (which may grow the storage) never move the
//! map out from under the caller.

use crate::cell::{fixed_cell_size, ArrayStorage, CellKind, GcCell};
use crate::heap::acceptors::Acceptor;
use crate::heap::HadesGc;
use crate::pointer::weak::NO_WEAK_SLOT;
use crate::pointer::CompressedPointer;
use crate::runtime::GcCallbacks;
use crate::value::HermesValue;

/// One (weak key, value) association.
#[derive(Debug, Clone, Copy)]
pub struct WeakMapEntry {
    /// Index of the key's slot in the weak-slot table.
    pub key_slot: u32,
    /// Index of the mapped value in the value storage.
    pub value_index: u32,
}

#[repr(C)]
pub struct JsWeakMap {
    cell: GcCell,
    /// The value storage array. Temporarily nulled during ephemeron
    /// marking; see `heap::weakmap_marking`.
    value_storage: CompressedPointer,
    next_value_index: u32,
    _pad: u32,
    /// Dense entry set, stored natively in the cell. Dropped by the
    /// finalizer.
    entries: Vec<WeakMapEntry>,
}

const INITIAL_CAPACITY: usize = 8;

impl JsWeakMap {
    pub const ALLOCATION_SIZE: usize = fixed_cell_size::<JsWeakMap>();

    /// Allocate an empty weak map (old generation, finalizable).
    pub fn create(gc: &mut HadesGc, rt: &mut dyn GcCallbacks) -> *mut JsWeakMap {
        let cell = gc.alloc_cell(rt, Self::ALLOCATION_SIZE, CellKind::WeakMap, true);
        let this = cell as *mut JsWeakMap;
        unsafe {
            (*this).value_storage = CompressedPointer::NULL;
            (*this).next_value_index = 0;
            (*this)._pad = 0;
            std::ptr::addr_of_mut!((*this).entries).write(Vec::new());
        }
        this
    }

    /// Insert or update the association for `key`.
    ///
    /// # Safety
    /// `this` must be a live, rooted `JsWeakMap`; `key` a live cell.
    pub unsafe fn insert(
        this: *mut JsWeakMap,
        key: *mut GcCell,
        value: HermesValue,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) {
        if let Some(idx) = Self::lookup_entry(this, key, gc) {
            let storage = Self::storage(this, gc);
            let value_index = (&(*this).entries)[idx].value_index as usize;
            ArrayStorage::set(storage, value_index, value, gc);
            return;
        }

        Self::ensure_capacity(this, gc, rt);
        let storage = Self::storage(this, gc);
        let value_index = (*this).next_value_index;
        (*this).next_value_index += 1;
        ArrayStorage::set(storage, value_index as usize, value, gc);

        let key_slot = gc.alloc_weak_slot(key);
        (*this).entries.push(WeakMapEntry {
            key_slot,
            value_index,
        });
    }

    /// The mapped value for `key`, if the key is present and alive.
    ///
    /// # Safety
    /// `this` must be a live `JsWeakMap`.
    pub unsafe fn get(
        this: *mut JsWeakMap,
        key: *mut GcCell,
        gc: &mut HadesGc,
    ) -> Option<HermesValue> {
        let idx = Self::lookup_entry(this, key, gc)?;
        let storage = Self::storage(this, gc);
        let value = ArrayStorage::at(storage, (&(*this).entries)[idx].value_index as usize);
        (!value.is_empty()).then_some(value)
    }

    /// # Safety
    /// `this` must be a live `JsWeakMap`.
    pub unsafe fn has(this: *mut JsWeakMap, key: *mut GcCell, gc: &mut HadesGc) -> bool {
        Self::lookup_entry(this, key, gc).is_some()
    }

    /// Number of live entries.
    ///
    /// # Safety
    /// `this` must be a live `JsWeakMap`.
    pub unsafe fn size(this: *mut JsWeakMap, gc: &mut HadesGc) -> usize {
        (0..(*this).entries.len())
            .filter(|&i| {
                let slot = (&(*this).entries)[i].key_slot;
                gc.read_weak_slot(slot).is_some()
            })
            .count()
    }

    unsafe fn lookup_entry(
        this: *mut JsWeakMap,
        key: *mut GcCell,
        gc: &mut HadesGc,
    ) -> Option<usize> {
        (0..(*this).entries.len()).find(|&i| {
            let slot = (&(*this).entries)[i].key_slot;
            gc.read_weak_slot(slot) == Some(key)
        })
    }

    unsafe fn storage(this: *mut JsWeakMap, gc: &HadesGc) -> *mut ArrayStorage {
        debug_assert!(!(*this).value_storage.is_null());
        (*this).value_storage.get_non_null(gc.pointer_base()) as *mut ArrayStorage
    }

    /// Grow (or create) the value storage so one more value fits. The
    /// storage is old-gen allocated, so nothing moves.
    unsafe fn ensure_capacity(this: *mut JsWeakMap, gc: &mut HadesGc, rt: &mut dyn GcCallbacks) {
        let needed = (*this).next_value_index as usize + 1;
        if !(*this).value_storage.is_null() {
            let storage = Self::storage(this, gc);
            if needed <= ArrayStorage::capacity(storage) {
                if needed > ArrayStorage::len(storage) {
                    ArrayStorage::resize_within_capacity(storage, needed);
                }
                return;
            }
        }

        let new_capacity = (needed * 2).max(INITIAL_CAPACITY);
        let new_storage = ArrayStorage::create_long_lived(new_capacity, gc, rt);
        ArrayStorage::resize_within_capacity(new_storage, needed);
        if !(*this).value_storage.is_null() {
            let old_storage = Self::storage(this, gc);
            for idx in 0..ArrayStorage::len(old_storage) {
                ArrayStorage::set(new_storage, idx, ArrayStorage::at(old_storage, idx), gc);
            }
        }
        let loc = std::ptr::addr_of_mut!((*this).value_storage);
        gc.write_barrier_ptr(loc, new_storage as *mut GcCell);
        *loc = gc.pointer_base().compress(new_storage as *mut GcCell);
    }

    // === Collector interface ===

    pub(crate) unsafe fn value_storage_slot(this: *mut JsWeakMap) -> *mut CompressedPointer {
        std::ptr::addr_of_mut!((*this).value_storage)
    }

    pub(crate) unsafe fn entries(this: *mut JsWeakMap) -> &'static [WeakMapEntry] {
        &(*this).entries
    }

    /// Clear the entry at `idx`: empty out the stored value and drop the
    /// entry. Only the collector calls this, with the world stopped.
    pub(crate) unsafe fn clear_entry_in_gc(
        this: *mut JsWeakMap,
        idx: usize,
        pb: &crate::pointer::PointerBase,
    ) {
        let entry = (&(*this).entries)[idx];
        if !(*this).value_storage.is_null() {
            let storage = (*this).value_storage.get_non_null(pb) as *mut ArrayStorage;
            ArrayStorage::data(storage)
                .add(entry.value_index as usize)
                .write(HermesValue::encode_empty_value());
        }
        (*this).entries.swap_remove(idx);
    }
}

pub(crate) unsafe fn visit_slots<A: Acceptor>(
    this: *mut JsWeakMap,
    acceptor: &mut A,
    range: Option<(usize, usize)>,
) {
    let storage_slot = std::ptr::addr_of_mut!((*this).value_storage);
    let in_range = match range {
        None => true,
        Some((begin, end)) => (storage_slot as usize) >= begin && (storage_slot as usize) < end,
    };
    if in_range && !(*storage_slot).is_null() {
        acceptor.accept_ptr(storage_slot);
    }
    if range.is_none() {
        for entry in &(*this).entries {
            if entry.key_slot != NO_WEAK_SLOT {
                acceptor.accept_weak_slot(entry.key_slot);
            }
        }
    }
}

pub(crate) unsafe fn finalize(this: *mut JsWeakMap) {
    // Drop the native entry vector owned by the dying cell.
    std::ptr::addr_of_mut!((*this).entries).drop_in_place();
}
