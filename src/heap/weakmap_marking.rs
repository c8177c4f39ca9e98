//! Ephemeron Marking - Weak-Map Fixpoint
//!
//! A weak map's value must be retained iff its key is reachable without
//! going through the map. Marking therefore defers reachable weak maps and
//! resolves them here, during the complete-marking pause:
//!
//! 1. Scan each newly reachable map with its value-storage field
//!    temporarily nulled out (and weak refs ignored), so everything else
//!    the map points at (hidden structure, entry bookkeeping) is marked
//!    without retaining any values.
//! 2. For every entry whose key is marked, mark the value. Repeat 1 and 2
//!    until a full pass marks nothing new, since marking a value can make
//!    more keys reachable.
//! 3. Clear entries whose keys stayed unmarked (their stored value becomes
//!    empty), then scan each map normally so the value-storage array
//!    itself is marked.

use std::collections::HashSet;

use crate::cell::{self, JsWeakMap};
use crate::heap::acceptors::{Acceptor, MarkAcceptor};
use crate::heap::worklist::MarkWorklist;
use crate::heap::{drain_some_work, OldState};
use crate::pointer::{CompressedPointer, PointerBase};
use crate::segment::mark_bits;
use crate::value::HermesValue;

/// Run the ephemeron fixpoint over every reachable weak map. Requires the
/// world to be stopped with the mark worklists otherwise drained.
pub(crate) fn complete_weak_map_marking(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
) {
    let mut scanned: HashSet<usize> = HashSet::new();
    loop {
        let mut newly_marked = false;
        // The list may grow while we iterate: scanning a map can reach
        // other weak maps.
        let mut i = 0;
        while i < g.mark.as_ref().map_or(0, |m| m.reachable_weak_maps.len()) {
            let map = g.mark.as_ref().unwrap().reachable_weak_maps[i].0 as *mut JsWeakMap;
            i += 1;

            if scanned.insert(map as usize) {
                unsafe { scan_map_without_values(g, pb, global, yg_base, map) };
                newly_marked = true;
            }
            if unsafe { mark_values_of_marked_keys(g, pb, global, yg_base, map) } {
                newly_marked = true;
            }
        }
        if !newly_marked {
            break;
        }
    }

    // Convergence: anything not marked now is unreachable. Clear the dead
    // entries, then scan the maps normally to mark the value storage.
    let maps = std::mem::take(&mut g.mark.as_mut().unwrap().reachable_weak_maps);
    for map_ptr in &maps {
        let map = map_ptr.0 as *mut JsWeakMap;
        unsafe { clear_unreachable_entries(g, pb, map) };
    }
    for map_ptr in &maps {
        let map = map_ptr.0 as *mut JsWeakMap;
        unsafe {
            mark_cell_and_drain(g, pb, global, yg_base, map as *mut cell::GcCell, false);
        }
    }
}

/// Scan `map` with its value storage hidden, so values are not retained
/// through the storage array.
unsafe fn scan_map_without_values(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
    map: *mut JsWeakMap,
) {
    let storage_slot = JsWeakMap::value_storage_slot(map);
    let saved = *storage_slot;
    *storage_slot = CompressedPointer::NULL;
    mark_cell_and_drain(g, pb, global, yg_base, map as *mut cell::GcCell, true);
    *storage_slot = saved;
}

/// Mark the value of every entry whose key is marked. Returns true when a
/// previously unmarked value was marked.
unsafe fn mark_values_of_marked_keys(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
    map: *mut JsWeakMap,
) -> bool {
    let mut newly_marked = false;
    let entries = JsWeakMap::entries(map);
    for entry in entries {
        let slot = g.weak_slots.slot(entry.key_slot);
        if !slot.has_value() {
            continue;
        }
        let key = slot.value().get_non_null(pb);
        if !mark_bits::get_cell_mark_bit(key) {
            continue;
        }
        // Key is independently reachable; its value must be preserved.
        let storage_slot = JsWeakMap::value_storage_slot(map);
        debug_assert!(!(*storage_slot).is_null(), "entries without storage");
        let storage = (*storage_slot).get_non_null(pb) as *mut cell::ArrayStorage;
        let value_loc = cell::ArrayStorage::data(storage).add(entry.value_index as usize);
        let value: HermesValue = *value_loc;
        if value.is_pointer() && !mark_bits::get_cell_mark_bit(value.get_pointer()) {
            mark_value_and_drain(g, pb, global, yg_base, value_loc);
            newly_marked = true;
        }
    }
    newly_marked
}

/// Clear every entry of `map` whose key is dead or unmarked.
unsafe fn clear_unreachable_entries(g: &mut OldState, pb: &PointerBase, map: *mut JsWeakMap) {
    let mut idx = 0;
    loop {
        let entries = JsWeakMap::entries(map);
        if idx >= entries.len() {
            break;
        }
        let entry = entries[idx];
        let slot = g.weak_slots.slot(entry.key_slot);
        let dead = !slot.has_value() || {
            let key = slot.value().get_non_null(pb);
            !mark_bits::get_cell_mark_bit(key)
        };
        if dead {
            JsWeakMap::clear_entry_in_gc(map, idx, pb);
            // swap_remove moved another entry into `idx`; revisit it.
        } else {
            idx += 1;
        }
    }
}

unsafe fn mark_cell_and_drain(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
    cell: *mut cell::GcCell,
    skip_weak: bool,
) {
    {
        let compactee_start = g.compactee.start;
        let OldState {
            mark, weak_slots, ..
        } = &mut *g;
        let state = mark.as_mut().expect("marking must be active");
        let mut acceptor =
            MarkAcceptor::new(state, weak_slots, pb, yg_base, compactee_start);
        acceptor.skip_weak = skip_weak;
        acceptor.scan_base = crate::segment::storage_start(cell as usize);
        cell::mark_cell(cell, &mut acceptor);
    }
    drain_some_work(g, pb, global, yg_base, usize::MAX);
}

unsafe fn mark_value_and_drain(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
    value_loc: *mut HermesValue,
) {
    {
        let compactee_start = g.compactee.start;
        let OldState {
            mark, weak_slots, ..
        } = &mut *g;
        let state = mark.as_mut().expect("marking must be active");
        let mut acceptor =
            MarkAcceptor::new(state, weak_slots, pb, yg_base, compactee_start);
        acceptor.scan_base = crate::segment::storage_start(value_loc as usize);
        acceptor.accept_hv(value_loc);
    }
    drain_some_work(g, pb, global, yg_base, usize::MAX);
}
