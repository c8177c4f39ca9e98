//! ArrayStorage - Variable-Size Value Array
//!
//! A resizable-within-capacity array of `HermesValue`s. The capacity is
//! derived from the allocated size, so sweep-time trimming (which shrinks
//! the allocation down to the live length) is visible as a capacity drop.
//! Arrays larger than a segment are allocated in jumbo segments.

use crate::cell::{
    allocated_size_allow_large, CellKind, GcCell, CELL_HEADER_SIZE, MIN_ALLOCATION_SIZE,
};
use crate::heap::acceptors::Acceptor;
use crate::heap::HadesGc;
use crate::runtime::GcCallbacks;
use crate::util::heap_align_size;
use crate::value::HermesValue;

#[repr(C)]
pub struct ArrayStorage {
    cell: GcCell,
    len: u32,
    _pad: u32,
    // `capacity` HermesValues follow.
}

/// Byte offset of the element array.
pub const DATA_OFFSET: usize = CELL_HEADER_SIZE + 8;

const ELEMENT_SIZE: usize = std::mem::size_of::<HermesValue>();

impl ArrayStorage {
    /// Allocation size for a capacity-`capacity` array.
    pub const fn allocation_size(capacity: usize) -> usize {
        let size = heap_align_size(DATA_OFFSET + capacity * ELEMENT_SIZE);
        if size < MIN_ALLOCATION_SIZE {
            MIN_ALLOCATION_SIZE
        } else {
            size
        }
    }

    /// Allocate an array of `capacity` slots in the young generation, with
    /// length 0.
    pub fn create(
        capacity: usize,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) -> *mut ArrayStorage {
        let cell = gc.alloc_cell(
            rt,
            Self::allocation_size(capacity),
            CellKind::ArrayStorage,
            false,
        );
        unsafe { Self::init(cell) }
    }

    /// Allocate directly in the old generation. Does not move any existing
    /// cell.
    pub fn create_long_lived(
        capacity: usize,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) -> *mut ArrayStorage {
        let cell = gc.alloc_cell(
            rt,
            Self::allocation_size(capacity),
            CellKind::ArrayStorage,
            true,
        );
        unsafe { Self::init(cell) }
    }

    /// Allocate an array that may exceed the normal cell maximum, in which
    /// case it gets a jumbo segment. With `may_fail`, allocation failure
    /// returns `None` instead of being fatal.
    pub fn create_large(
        capacity: usize,
        may_fail: bool,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) -> Option<*mut ArrayStorage> {
        let cell = gc.alloc_cell_can_be_large(
            rt,
            Self::allocation_size(capacity),
            CellKind::ArrayStorage,
            may_fail,
        )?;
        Some(unsafe { Self::init(cell) })
    }

    unsafe fn init(cell: *mut GcCell) -> *mut ArrayStorage {
        let this = cell as *mut ArrayStorage;
        (*this).len = 0;
        (*this)._pad = 0;
        this
    }

    /// # Safety
    /// `this` must be a live `ArrayStorage` cell.
    #[inline]
    pub unsafe fn capacity(this: *const ArrayStorage) -> usize {
        (allocated_size_allow_large(this as *const GcCell) - DATA_OFFSET) / ELEMENT_SIZE
    }

    #[inline]
    pub unsafe fn len(this: *const ArrayStorage) -> usize {
        (*this).len as usize
    }

    #[inline]
    pub unsafe fn data(this: *mut ArrayStorage) -> *mut HermesValue {
        (this as *mut u8).add(DATA_OFFSET) as *mut HermesValue
    }

    /// Grow or shrink the length within the existing capacity. New slots
    /// are empty; no barrier is needed for them since empty is not a
    /// pointer and the slots were unreachable.
    ///
    /// # Safety
    /// `this` must be a live `ArrayStorage` cell.
    pub unsafe fn resize_within_capacity(this: *mut ArrayStorage, new_len: usize) {
        debug_assert!(new_len <= Self::capacity(this));
        let old_len = Self::len(this);
        let data = Self::data(this);
        for idx in old_len..new_len {
            data.add(idx).write(HermesValue::encode_empty_value());
        }
        (*this).len = new_len as u32;
    }

    /// # Safety
    /// `this` must be a live `ArrayStorage` cell and `idx < len`.
    #[inline]
    pub unsafe fn at(this: *mut ArrayStorage, idx: usize) -> HermesValue {
        debug_assert!(idx < Self::len(this));
        Self::data(this).add(idx).read()
    }

    /// Store `value` at `idx`, running the write barrier.
    ///
    /// # Safety
    /// `this` must be a live `ArrayStorage` cell and `idx < len`.
    pub unsafe fn set(this: *mut ArrayStorage, idx: usize, value: HermesValue, gc: &mut HadesGc) {
        debug_assert!(idx < Self::len(this));
        let loc = Self::data(this).add(idx);
        if (*(this as *const GcCell)).size_field() == 0 {
            // Jumbo arrays span storage units; the barrier needs the owning
            // cell to find the card table.
            gc.write_barrier_hv_for_large_obj(this as *const GcCell, loc, value);
        } else {
            gc.write_barrier_hv(loc, value);
        }
        loc.write(value);
    }

    /// Bytes actually needed: header plus `len` elements.
    pub(crate) unsafe fn trimmed_size(this: *const ArrayStorage) -> usize {
        Self::allocation_size(Self::len(this))
    }
}

pub(crate) unsafe fn visit_slots<A: Acceptor>(
    this: *mut ArrayStorage,
    acceptor: &mut A,
    range: Option<(usize, usize)>,
) {
    let len = ArrayStorage::len(this);
    let data = ArrayStorage::data(this);
    let (first, last) = match range {
        None => (0, len),
        Some((begin, end)) => {
            // Clip the element range to [begin, end).
            let data_addr = data as usize;
            let first = begin.saturating_sub(data_addr) / ELEMENT_SIZE;
            let last = end
                .saturating_sub(data_addr)
                .div_ceil(ELEMENT_SIZE)
                .min(len);
            (first.min(len), last)
        }
    };
    for idx in first..last {
        acceptor.accept_hv(data.add(idx));
    }
}
