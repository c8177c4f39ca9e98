//! Mark Bit Arrays
//!
//! One bit per alignment unit, stored in the segment metadata block. The
//! concurrent marker sets bits while the mutator runs, so words are
//! atomic. A jumbo segment's single cell uses the one-flag shortcut in its
//! `SegmentInfo` instead.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::cell::GcCell;
use crate::segment::{self, MARK_BITS_OFFSET, MARK_BITS_SIZE};
use crate::util::LOG_HEAP_ALIGN;

const WORD_BYTES: usize = std::mem::size_of::<u64>();
const WORD_BITS: usize = 64;

#[inline]
unsafe fn mark_word(base: usize, word_idx: usize) -> *const AtomicU64 {
    (base + MARK_BITS_OFFSET + word_idx * WORD_BYTES) as *const AtomicU64
}

/// Set the mark bit for `cell`.
///
/// # Safety
/// `cell` must be a cell-start address in a live segment.
#[inline]
pub unsafe fn set_cell_mark_bit(cell: *const GcCell) {
    let addr = cell as usize;
    let base = segment::storage_start(addr);
    let info = segment::segment_info(base);
    if (*info).jumbo_cell_size != 0 {
        (*info).jumbo_mark.store(1, Ordering::Release);
        return;
    }
    let bit = (addr - base) >> LOG_HEAP_ALIGN;
    (*mark_word(base, bit / WORD_BITS)).fetch_or(1u64 << (bit % WORD_BITS), Ordering::Relaxed);
}

/// Read the mark bit for `cell`.
///
/// # Safety
/// `cell` must be a cell-start address in a live segment.
#[inline]
pub unsafe fn get_cell_mark_bit(cell: *const GcCell) -> bool {
    let addr = cell as usize;
    let base = segment::storage_start(addr);
    let info = segment::segment_info(base);
    if (*info).jumbo_cell_size != 0 {
        return (*info).jumbo_mark.load(Ordering::Acquire) != 0;
    }
    let bit = (addr - base) >> LOG_HEAP_ALIGN;
    (*mark_word(base, bit / WORD_BITS)).load(Ordering::Relaxed) & (1u64 << (bit % WORD_BITS)) != 0
}

/// Clear every mark bit of the unit segment at `base`.
///
/// # Safety
/// `base` must be the base of a live unit segment.
pub unsafe fn clear(base: usize) {
    for word_idx in 0..MARK_BITS_SIZE / WORD_BYTES {
        (*mark_word(base, word_idx)).store(0, Ordering::Relaxed);
    }
}

/// Set every mark bit of the unit segment at `base`. The young generation
/// keeps its segment in this state so young-gen barrier checks always see
/// "marked".
///
/// # Safety
/// `base` must be the base of a live unit segment.
pub unsafe fn mark_all(base: usize) {
    for word_idx in 0..MARK_BITS_SIZE / WORD_BYTES {
        (*mark_word(base, word_idx)).store(u64::MAX, Ordering::Relaxed);
    }
}

/// True when every bit of the unit segment at `base` is set.
///
/// # Safety
/// `base` must be the base of a live unit segment.
pub unsafe fn all_marked(base: usize) -> bool {
    (0..MARK_BITS_SIZE / WORD_BYTES)
        .all(|word_idx| (*mark_word(base, word_idx)).load(Ordering::Relaxed) == u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{FixedSizeSegment, SEGMENT_SIZE};
    use crate::storage::{StorageProvider, VmStorageProvider};

    #[test]
    fn test_mark_bits_round_trip() {
        let mut provider = VmStorageProvider::new();
        let seg =
            FixedSizeSegment::new(provider.create("mark-test", SEGMENT_SIZE).unwrap(), 1);
        let base = seg.base();
        unsafe {
            // New segments come fully marked.
            assert!(all_marked(base));
            clear(base);
            assert!(!all_marked(base));

            let cell = seg.start() as *const GcCell;
            assert!(!get_cell_mark_bit(cell));
            set_cell_mark_bit(cell);
            assert!(get_cell_mark_bit(cell));

            let other = (seg.start() + 4096) as *const GcCell;
            assert!(!get_cell_mark_bit(other));

            mark_all(base);
            assert!(get_cell_mark_bit(other));
        }
    }
}
