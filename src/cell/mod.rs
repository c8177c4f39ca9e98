//! Heap Cells - Headers, Kinds, and Slot Dispatch
//!
//! Every heap object begins with a 64-bit [`GcCell`] header:
//!
//! ```text
//! 63           41  40  39      32 31                               0
//! ┌──────────────┬────┬──────────┬──────────────────────────────────┐
//! │    unused    │ Fw │   Kind   │        Size / Forwarding         │
//! └──────────────┴────┴──────────┴──────────────────────────────────┘
//! ```
//!
//! A cell's kind and size are fixed at construction. Cells too large for a
//! unit segment store 0 in the size field and recover their real size from
//! the jumbo segment metadata. During young evacuation the low 32 bits are
//! reused for the compressed forwarding pointer, with bit 40 set; the
//! original size is then recovered from the forwarded copy.
//!
//! Dispatch over kinds is an exhaustive match (`mark_cell`,
//! `finalize_cell`, `trimmed_size`), the moral equivalent of a per-kind
//! metadata table.

pub mod array_storage;
pub mod boxed_double;
pub mod dummy;
pub mod weak_map;

pub use array_storage::ArrayStorage;
pub use boxed_double::BoxedDouble;
pub use dummy::DummyObject;
pub use weak_map::JsWeakMap;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::heap::acceptors::Acceptor;
use crate::pointer::CompressedPointer;
use crate::segment;
use crate::util::heap_align_size;

/// Size of the uniform cell header.
pub const CELL_HEADER_SIZE: usize = 8;

/// Smallest allocatable cell: header plus one pointer-size payload word,
/// enough for a freelist cell or a copy-list link.
pub const MIN_ALLOCATION_SIZE: usize = 16;

const SIZE_MASK: u64 = 0xFFFF_FFFF;
const KIND_SHIFT: u32 = 32;
const KIND_MASK: u64 = 0xFF << KIND_SHIFT;
const FORWARDED_BIT: u64 = 1 << 40;

/// Every kind of cell the collector can encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellKind {
    /// A span of free old-gen memory on a freelist.
    Freelist = 0,
    /// Dead filler produced by sweep-time trimming.
    Filler = 1,
    /// A heap-boxed double backing a non-inlineable `SmallHermesValue`.
    BoxedDouble = 2,
    /// Variable-size array of values; also used as weak-map value storage.
    ArrayStorage = 3,
    /// JavaScript WeakMap with ephemeron semantics.
    WeakMap = 4,
    /// Test object exercising every slot type.
    DummyObject = 5,
}

const NUM_CELL_KINDS: u8 = 6;

impl CellKind {
    #[inline]
    pub fn from_u8(raw: u8) -> Option<CellKind> {
        if raw < NUM_CELL_KINDS {
            // Values below NUM_CELL_KINDS are exactly the enum discriminants.
            Some(unsafe { std::mem::transmute::<u8, CellKind>(raw) })
        } else {
            None
        }
    }

    /// Kinds whose cells need a finalizer call when they die.
    #[inline]
    pub fn has_finalizer(self) -> bool {
        matches!(self, CellKind::WeakMap | CellKind::DummyObject)
    }
}

/// The uniform cell header.
#[repr(C)]
pub struct GcCell {
    bits: AtomicU64,
}

impl GcCell {
    /// Initialize the header in place.
    ///
    /// # Safety
    /// `ptr` must point at writable cell storage of at least `size` bytes
    /// (or the jumbo cell size when `size` is 0).
    pub unsafe fn set_kind_and_size(ptr: *mut GcCell, kind: CellKind, size: usize) {
        debug_assert!(size <= SIZE_MASK as usize);
        (*ptr)
            .bits
            .store(((kind as u64) << KIND_SHIFT) | size as u64, Ordering::Release);
    }

    #[inline]
    pub fn kind(&self) -> CellKind {
        let raw = ((self.bits.load(Ordering::Relaxed) & KIND_MASK) >> KIND_SHIFT) as u8;
        debug_assert!(raw < NUM_CELL_KINDS, "corrupt cell header");
        CellKind::from_u8(raw).expect("corrupt cell header")
    }

    /// Header size field. Zero for jumbo cells.
    #[inline]
    pub fn size_field(&self) -> usize {
        (self.bits.load(Ordering::Relaxed) & SIZE_MASK) as usize
    }

    /// Allocated size of a normal cell. Must not be called on jumbo cells;
    /// use [`allocated_size_allow_large`] for those.
    #[inline]
    pub fn allocated_size(&self) -> usize {
        let size = self.size_field();
        debug_assert!(size != 0, "allocated_size called on a jumbo cell");
        size
    }

    /// Cheap structural validity check, used in debug assertions.
    #[inline]
    pub fn is_valid(&self) -> bool {
        let bits = self.bits.load(Ordering::Relaxed);
        ((bits & KIND_MASK) >> KIND_SHIFT) < NUM_CELL_KINDS as u64
    }

    #[inline]
    pub fn has_marked_forwarding_pointer(&self) -> bool {
        self.bits.load(Ordering::Relaxed) & FORWARDED_BIT != 0
    }

    /// Install a forwarding pointer, overwriting the size field. Only the
    /// evacuator does this; the original size lives on in the copy.
    pub fn set_marked_forwarding_pointer(&self, fwd: CompressedPointer) {
        let bits = self.bits.load(Ordering::Relaxed);
        self.bits.store(
            (bits & KIND_MASK) | FORWARDED_BIT | fwd.raw() as u64,
            Ordering::Release,
        );
    }

    #[inline]
    pub fn marked_forwarding_pointer(&self) -> CompressedPointer {
        debug_assert!(self.has_marked_forwarding_pointer());
        CompressedPointer::from_raw((self.bits.load(Ordering::Relaxed) & SIZE_MASK) as u32)
    }
}

/// Allocated size of any cell, consulting the jumbo segment metadata when
/// the header size field is zero.
///
/// # Safety
/// `cell` must be a valid cell-start address.
#[inline]
pub unsafe fn allocated_size_allow_large(cell: *const GcCell) -> usize {
    let size = (*cell).size_field();
    if size != 0 {
        return size;
    }
    let base = segment::storage_start(cell as usize);
    (*segment::segment_info(base)).jumbo_cell_size as usize
}

/// View of a forwarded young cell: the copy list is threaded through the
/// first payload word of each evacuated source cell.
#[repr(C)]
pub struct CopyListCell {
    pub cell: GcCell,
    pub next: CompressedPointer,
}

/// A span of free old-gen memory. `next` chains cells of the same
/// (segment, bucket) freelist.
#[repr(C)]
pub struct FreelistCell {
    pub cell: GcCell,
    pub next: CompressedPointer,
}

impl FreelistCell {
    /// Initialize a freelist cell covering `size` bytes at `addr`.
    ///
    /// # Safety
    /// `addr` must point at `size` writable bytes inside a segment.
    pub unsafe fn init(addr: usize, size: usize) -> *mut FreelistCell {
        debug_assert!(size >= MIN_ALLOCATION_SIZE);
        let cell = addr as *mut FreelistCell;
        GcCell::set_kind_and_size(cell as *mut GcCell, CellKind::Freelist, size);
        (*cell).next = CompressedPointer::NULL;
        cell
    }

    /// Shrink this cell by carving `size` bytes off its tail, returning the
    /// carved region.
    ///
    /// # Safety
    /// The cell must currently span at least `size + MIN_ALLOCATION_SIZE`
    /// bytes.
    pub unsafe fn carve(this: *mut FreelistCell, size: usize) -> *mut GcCell {
        let old_size = (*this).cell.allocated_size();
        debug_assert!(old_size >= size + MIN_ALLOCATION_SIZE);
        let new_size = old_size - size;
        GcCell::set_kind_and_size(this as *mut GcCell, CellKind::Freelist, new_size);
        (this as *mut u8).add(new_size) as *mut GcCell
    }
}

/// Write a filler cell over `size` dead bytes.
///
/// # Safety
/// `addr` must point at `size` writable bytes inside a segment.
pub unsafe fn init_filler(addr: usize, size: usize) {
    debug_assert!(size >= MIN_ALLOCATION_SIZE);
    GcCell::set_kind_and_size(addr as *mut GcCell, CellKind::Filler, size);
}

// === Kind dispatch ===

/// Visit every reference-bearing slot of `cell` with `acceptor`.
///
/// # Safety
/// `cell` must be a valid, fully constructed cell.
pub unsafe fn mark_cell<A: Acceptor>(cell: *mut GcCell, acceptor: &mut A) {
    visit_cell_slots(cell, acceptor, None);
}

/// Visit only the slots of `cell` that lie within `[begin, end)`. Used for
/// dirty-card scanning, where a cell may straddle the card run.
///
/// # Safety
/// As for [`mark_cell`].
pub unsafe fn mark_cell_within_range<A: Acceptor>(
    cell: *mut GcCell,
    acceptor: &mut A,
    begin: usize,
    end: usize,
) {
    visit_cell_slots(cell, acceptor, Some((begin, end)));
}

unsafe fn visit_cell_slots<A: Acceptor>(
    cell: *mut GcCell,
    acceptor: &mut A,
    range: Option<(usize, usize)>,
) {
    match (*cell).kind() {
        CellKind::Freelist | CellKind::Filler | CellKind::BoxedDouble => {}
        CellKind::ArrayStorage => {
            array_storage::visit_slots(cell as *mut ArrayStorage, acceptor, range)
        }
        CellKind::WeakMap => weak_map::visit_slots(cell as *mut JsWeakMap, acceptor, range),
        CellKind::DummyObject => dummy::visit_slots(cell as *mut DummyObject, acceptor, range),
    }
}

/// Run the finalizer for `cell` if its kind has one. Must be called at
/// most once per dead cell.
///
/// # Safety
/// `cell` must be a valid cell that will never be used again.
pub unsafe fn finalize_cell(cell: *mut GcCell) {
    match (*cell).kind() {
        CellKind::Freelist
        | CellKind::Filler
        | CellKind::BoxedDouble
        | CellKind::ArrayStorage => {}
        CellKind::WeakMap => weak_map::finalize(cell as *mut JsWeakMap),
        CellKind::DummyObject => dummy::finalize(cell as *mut DummyObject),
    }
}

/// How many bytes of `cell` are actually needed. Sweep turns any trimmable
/// tail into a filler cell.
///
/// # Safety
/// `cell` must be a valid cell of `allocated` bytes.
pub unsafe fn trimmed_size(cell: *const GcCell, allocated: usize) -> usize {
    match (*cell).kind() {
        CellKind::ArrayStorage => {
            let trimmed = ArrayStorage::trimmed_size(cell as *const ArrayStorage);
            debug_assert!(trimmed >= MIN_ALLOCATION_SIZE);
            trimmed.min(allocated)
        }
        _ => allocated,
    }
}

/// Heap-aligned allocation size for a fixed-size cell type.
pub const fn fixed_cell_size<T>() -> usize {
    heap_align_size(std::mem::size_of::<T>())
}
