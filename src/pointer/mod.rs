//! Pointer Abstractions - Compressed and Raw Cell References
//!
//! In-heap references are 32-bit [`CompressedPointer`] values decoded
//! against a [`PointerBase`] segment table. Three ownership flavours wrap
//! them:
//! - [`GcPointer`]: strong, inside the heap, write-barriered.
//! - [`WeakRoot`]: weak, outside the heap, read-barriered.
//! - [`WeakRef`]: weak, through a managed [`WeakRefSlot`].

pub mod gc_pointer;
pub mod weak;

pub use gc_pointer::GcPointer;
pub use weak::{WeakRef, WeakRefSlot, WeakRoot, WeakSlotState, WeakSlotTable};

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cell::GcCell;
use crate::segment::{self, LOG_SEGMENT_SIZE, MAX_SEGMENTS, SEGMENT_SIZE};

/// A 32-bit reference to a heap cell: `segment_index << 22 | offset`. The
/// low three bits are always zero (cells are 8-byte aligned), which is what
/// lets `SmallHermesValue` use them as a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CompressedPointer(u32);

impl CompressedPointer {
    pub const NULL: CompressedPointer = CompressedPointer(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        CompressedPointer(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The segment-index part, used for O(1) same-segment checks.
    #[inline]
    pub const fn segment_index(self) -> u32 {
        self.0 >> LOG_SEGMENT_SIZE as u32
    }

    #[inline]
    pub const fn offset(self) -> usize {
        (self.0 as usize) & (SEGMENT_SIZE - 1)
    }

    /// Decode a non-null pointer.
    #[inline]
    pub fn get_non_null(self, pb: &PointerBase) -> *mut GcCell {
        debug_assert!(!self.is_null());
        (pb.base_of(self.segment_index()) + self.offset()) as *mut GcCell
    }

    /// Decode, mapping null to null.
    #[inline]
    pub fn get(self, pb: &PointerBase) -> *mut GcCell {
        if self.is_null() {
            std::ptr::null_mut()
        } else {
            self.get_non_null(pb)
        }
    }
}

/// Maps segment indices to segment base addresses. Entries are written when
/// a segment is created (under the GC mutex) and read lock-free everywhere
/// else; index 0 is reserved so that a zero raw value means null.
pub struct PointerBase {
    bases: Vec<AtomicUsize>,
}

impl PointerBase {
    pub fn new() -> Self {
        let mut bases = Vec::with_capacity(MAX_SEGMENTS);
        bases.resize_with(MAX_SEGMENTS, || AtomicUsize::new(0));
        PointerBase { bases }
    }

    pub fn set_segment(&self, index: u32, base: usize) {
        debug_assert!(index != 0, "segment index 0 is reserved for null");
        self.bases[index as usize].store(base, Ordering::Release);
    }

    pub fn clear_segment(&self, index: u32) {
        self.bases[index as usize].store(0, Ordering::Release);
    }

    #[inline]
    pub fn base_of(&self, index: u32) -> usize {
        let base = self.bases[index as usize].load(Ordering::Acquire);
        debug_assert!(base != 0, "decoding a pointer into an unmapped segment");
        base
    }

    /// Compress a raw cell pointer. The cell's segment index is read from
    /// the segment metadata at the start of its storage.
    #[inline]
    pub fn compress(&self, ptr: *const GcCell) -> CompressedPointer {
        if ptr.is_null() {
            return CompressedPointer::NULL;
        }
        let addr = ptr as usize;
        let base = segment::storage_start(addr);
        let index = unsafe { (*segment::segment_info(base)).index };
        debug_assert_eq!(self.bases[index as usize].load(Ordering::Relaxed), base);
        CompressedPointer(((index as u32) << LOG_SEGMENT_SIZE) | (addr - base) as u32)
    }
}

impl Default for PointerBase {
    fn default() -> Self {
        Self::new()
    }
}
