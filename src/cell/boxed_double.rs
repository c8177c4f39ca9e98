//! BoxedDouble - Heap-Allocated Double
//!
//! Backing cell for a `SmallHermesValue` holding a double whose bit
//! pattern cannot be stored inline. Immutable after construction and
//! reference-free, so the marker has nothing to visit.

use crate::cell::{fixed_cell_size, CellKind, GcCell};
use crate::heap::HadesGc;
use crate::pointer::CompressedPointer;
use crate::runtime::GcCallbacks;

#[repr(C)]
pub struct BoxedDouble {
    cell: GcCell,
    value: f64,
}

impl BoxedDouble {
    pub const ALLOCATION_SIZE: usize = fixed_cell_size::<BoxedDouble>();

    /// Allocate a boxed double holding `value` and return its compressed
    /// pointer.
    pub fn create(
        value: f64,
        gc: &mut HadesGc,
        rt: &mut dyn GcCallbacks,
    ) -> CompressedPointer {
        let cell = gc.alloc_cell(rt, Self::ALLOCATION_SIZE, CellKind::BoxedDouble, false);
        unsafe {
            (*(cell as *mut BoxedDouble)).value = value;
        }
        gc.pointer_base().compress(cell)
    }

    /// Read the payload of a boxed double cell.
    ///
    /// # Safety
    /// `cell` must be a live `BoxedDouble` cell.
    #[inline]
    pub unsafe fn value(cell: *mut GcCell) -> f64 {
        debug_assert_eq!((*cell).kind(), CellKind::BoxedDouble);
        (*(cell as *mut BoxedDouble)).value
    }
}
