//! Heap Segments - Aligned Storage Units
//!
//! The heap is built out of segment-size-aligned storage regions. Each
//! region starts with a metadata block, followed by the allocation region:
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────┬──────────────┬─────────┐
//! │ SegmentInfo  │  Card table  │  Cell heads   │  Mark bits   │  Cells  │
//! │   64 bytes   │ 1 B / card   │  1 B / card   │ 1 bit / 8 B  │   ...   │
//! └──────────────┴──────────────┴───────────────┴──────────────┴─────────┘
//! ```
//!
//! Because regions are aligned, masking any cell address down to the
//! segment size lands on the metadata block; that is what makes the
//! `in_young_gen` check and the write-barrier card lookups O(1).
//!
//! Two kinds exist:
//! - [`FixedSizeSegment`]: one unit, many cells, bump- or freelist-managed.
//! - [`JumboSegment`]: several units, exactly one cell. Its card table
//!   covers every unit; its mark state is a single flag in the metadata.

pub mod card_table;
pub mod mark_bits;

use std::sync::atomic::{AtomicU8, Ordering};

use crate::cell::GcCell;
use crate::storage::Storage;
use crate::util::{align_up, LOG_HEAP_ALIGN};

/// Log2 of the unit segment size.
pub const LOG_SEGMENT_SIZE: usize = 22;

/// Unit segment size: 4 MiB.
pub const SEGMENT_SIZE: usize = 1 << LOG_SEGMENT_SIZE;

/// Maximum number of segments addressable by a compressed pointer.
pub const MAX_SEGMENTS: usize = 1 << (32 - LOG_SEGMENT_SIZE);

/// Log2 of the card size.
pub const LOG_CARD_SIZE: usize = 9;

/// Card granularity: 512 bytes.
pub const CARD_SIZE: usize = 1 << LOG_CARD_SIZE;

/// Cards covering one unit segment.
pub const CARDS_PER_SEGMENT: usize = SEGMENT_SIZE / CARD_SIZE;

/// Metadata block offsets within a unit segment.
pub const SEGMENT_INFO_SIZE: usize = 64;
pub const CARD_TABLE_OFFSET: usize = SEGMENT_INFO_SIZE;
pub const BOUNDARIES_OFFSET: usize = CARD_TABLE_OFFSET + CARDS_PER_SEGMENT;
pub const MARK_BITS_OFFSET: usize = BOUNDARIES_OFFSET + CARDS_PER_SEGMENT;
pub const MARK_BITS_SIZE: usize = SEGMENT_SIZE / (8 << LOG_HEAP_ALIGN);

/// First usable byte of a unit segment, aligned to a card boundary so the
/// allocation region starts exactly at a card.
pub const ALLOC_START_OFFSET: usize = align_up(MARK_BITS_OFFSET + MARK_BITS_SIZE, CARD_SIZE);

/// The largest allocation a unit segment can hold; anything bigger goes to
/// a jumbo segment.
pub const MAX_NORMAL_ALLOC_SIZE: usize = SEGMENT_SIZE - ALLOC_START_OFFSET;

/// Per-segment metadata, placed at the segment base.
#[repr(C)]
pub struct SegmentInfo {
    /// Index into the pointer base's segment table.
    pub index: u32,
    /// Number of unit-size pieces this region spans (1 for unit segments).
    pub units: u32,
    /// Actual cell size for a jumbo segment; 0 for unit segments. The one
    /// jumbo cell stores 0 in its header size field and recovers its real
    /// size from here.
    pub jumbo_cell_size: u64,
    /// The single mark bit of a jumbo segment's cell.
    pub jumbo_mark: AtomicU8,
}

/// Mask an address down to its storage base. Valid for any address in a
/// unit segment and for cell-start addresses in jumbo segments (the cell
/// head always lives in the first unit).
#[inline]
pub fn storage_start(addr: usize) -> usize {
    addr & !(SEGMENT_SIZE - 1)
}

/// The metadata block of the storage containing `base`.
///
/// # Safety
/// `base` must be the base address of a live segment.
#[inline]
pub unsafe fn segment_info(base: usize) -> *mut SegmentInfo {
    base as *mut SegmentInfo
}

/// A single-unit heap segment with a bump pointer. Used directly by the
/// young generation and as the building block of the old generation.
pub struct FixedSizeSegment {
    // Held only to keep the mapping alive.
    _storage: Storage,
    base: usize,
    level: usize,
    effective_end: usize,
}

impl FixedSizeSegment {
    /// Wrap freshly created storage. Writes the metadata block and sets
    /// every mark bit: new segments start fully marked, which is the young
    /// generation's standing invariant and harmless for old segments
    /// (mark bits are cleared when an old collection begins).
    pub fn new(storage: Storage, index: u32) -> Self {
        let base = storage.base();
        debug_assert_eq!(storage.size(), SEGMENT_SIZE);
        unsafe {
            let info = segment_info(base);
            (*info).index = index;
            (*info).units = 1;
            (*info).jumbo_cell_size = 0;
            (*info).jumbo_mark = AtomicU8::new(0);
            mark_bits::mark_all(base);
        }
        FixedSizeSegment {
            _storage: storage,
            base,
            level: base + ALLOC_START_OFFSET,
            effective_end: base + SEGMENT_SIZE,
        }
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn index(&self) -> u32 {
        unsafe { (*segment_info(self.base)).index }
    }

    /// First allocatable address.
    #[inline]
    pub fn start(&self) -> usize {
        self.base + ALLOC_START_OFFSET
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.base + SEGMENT_SIZE
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn effective_end(&self) -> usize {
        self.effective_end
    }

    /// Shrink or grow the allocation limit. Used for the young-gen pause
    /// throttle and external-memory pressure.
    pub fn set_effective_end(&mut self, end: usize) {
        debug_assert!(end >= self.level && end <= self.end());
        self.effective_end = end;
    }

    /// Remove any external-memory charge by restoring the full segment.
    pub fn clear_external_memory_charge(&mut self) {
        self.effective_end = self.end();
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.level - self.start()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.effective_end - self.level
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        storage_start(addr) == self.base
    }

    /// Bump-allocate `size` bytes. Returns the cell address or `None` when
    /// the segment is full. Does not touch the cell-head table; old-gen
    /// callers do that themselves, the young gen never needs it.
    #[inline]
    pub fn bump_alloc(&mut self, size: usize) -> Option<usize> {
        debug_assert_eq!(size & ((1 << LOG_HEAP_ALIGN) - 1), 0);
        if self.level + size > self.effective_end {
            return None;
        }
        let addr = self.level;
        self.level += size;
        Some(addr)
    }

    /// Reset the bump pointer to the start of the segment.
    pub fn reset_level(&mut self) {
        self.level = self.start();
    }

    /// Call `callback` on every cell in `[start, level)`, including
    /// freelist and filler cells.
    ///
    /// # Safety
    /// The segment must be parseable: every cell header in the walked range
    /// valid, with accurate sizes.
    pub unsafe fn for_each_cell(&self, mut callback: impl FnMut(*mut GcCell)) {
        let mut cur = self.start();
        while cur < self.level {
            let cell = cur as *mut GcCell;
            let size = (*cell).allocated_size();
            callback(cell);
            cur += size;
        }
    }

    /// Call `callback` on every cell that does NOT have a forwarding
    /// pointer (i.e. that did not survive an evacuation). Forwarded cells
    /// recover their size from the forwarded copy.
    ///
    /// # Safety
    /// As for `for_each_cell`; additionally `pb` must be able to decode
    /// every forwarding pointer in the segment.
    pub unsafe fn for_compacted_objs(
        &self,
        pb: &crate::pointer::PointerBase,
        mut callback: impl FnMut(*mut GcCell),
    ) {
        let mut cur = self.start();
        while cur < self.level {
            let cell = cur as *mut GcCell;
            let size = if (*cell).has_marked_forwarding_pointer() {
                let fwd = (*cell).marked_forwarding_pointer().get_non_null(pb);
                (*fwd).allocated_size()
            } else {
                callback(cell);
                (*cell).allocated_size()
            };
            cur += size;
        }
    }
}

/// A multi-unit segment holding exactly one oversized cell.
pub struct JumboSegment {
    storage: Storage,
    base: usize,
    units: usize,
    cell_size: usize,
}

/// First usable byte of a jumbo segment spanning `units` units: the
/// metadata block plus a card table covering every unit.
#[inline]
pub const fn jumbo_alloc_offset(units: usize) -> usize {
    align_up(SEGMENT_INFO_SIZE + units * CARDS_PER_SEGMENT, CARD_SIZE)
}

/// Number of units needed for a jumbo cell of `cell_size` bytes.
pub fn jumbo_units_for(cell_size: usize) -> usize {
    let mut units = cell_size.div_ceil(SEGMENT_SIZE).max(2);
    while units * SEGMENT_SIZE - jumbo_alloc_offset(units) < cell_size {
        units += 1;
    }
    units
}

impl JumboSegment {
    /// Wrap freshly created multi-unit storage for a cell of `cell_size`
    /// bytes.
    pub fn new(storage: Storage, index: u32, cell_size: usize) -> Self {
        let base = storage.base();
        let units = storage.size() / SEGMENT_SIZE;
        debug_assert!(units >= 2);
        debug_assert!(jumbo_alloc_offset(units) + cell_size <= storage.size());
        unsafe {
            let info = segment_info(base);
            (*info).index = index;
            (*info).units = units as u32;
            (*info).jumbo_cell_size = cell_size as u64;
            (*info).jumbo_mark = AtomicU8::new(1);
        }
        JumboSegment {
            storage,
            base,
            units,
            cell_size,
        }
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn index(&self) -> u32 {
        unsafe { (*segment_info(self.base)).index }
    }

    #[inline]
    pub fn units(&self) -> usize {
        self.units
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.storage.size()
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// The one cell in this segment.
    #[inline]
    pub fn cell(&self) -> *mut GcCell {
        (self.base + jumbo_alloc_offset(self.units)) as *mut GcCell
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        unsafe { (*segment_info(self.base)).jumbo_mark.load(Ordering::Acquire) != 0 }
    }

    pub fn clear_mark(&self) {
        unsafe { (*segment_info(self.base)).jumbo_mark.store(0, Ordering::Release) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageProvider, VmStorageProvider};

    #[test]
    fn test_layout_constants() {
        // The allocation region starts at a card boundary.
        assert_eq!(ALLOC_START_OFFSET % CARD_SIZE, 0);
        assert!(MAX_NORMAL_ALLOC_SIZE > SEGMENT_SIZE - 2 * ALLOC_START_OFFSET);
        assert!(std::mem::size_of::<SegmentInfo>() <= SEGMENT_INFO_SIZE);
    }

    #[test]
    fn test_bump_alloc() {
        let mut provider = VmStorageProvider::new();
        let storage = provider.create("seg", SEGMENT_SIZE).unwrap();
        let mut seg = FixedSizeSegment::new(storage, 1);
        let start = seg.start();
        assert_eq!(seg.bump_alloc(64), Some(start));
        assert_eq!(seg.bump_alloc(32), Some(start + 64));
        assert_eq!(seg.used(), 96);
        seg.reset_level();
        assert_eq!(seg.used(), 0);
        assert_eq!(seg.bump_alloc(64), Some(start));
    }

    #[test]
    fn test_effective_end_throttle() {
        let mut provider = VmStorageProvider::new();
        let storage = provider.create("seg", SEGMENT_SIZE).unwrap();
        let mut seg = FixedSizeSegment::new(storage, 1);
        let level = seg.level();
        seg.set_effective_end(level + 64);
        assert!(seg.bump_alloc(128).is_none());
        assert!(seg.bump_alloc(64).is_some());
        seg.clear_external_memory_charge();
        assert!(seg.bump_alloc(128).is_some());
    }

    #[test]
    fn test_jumbo_sizing() {
        let units = jumbo_units_for(SEGMENT_SIZE + 1);
        assert_eq!(units, 2);
        let big = jumbo_units_for(3 * SEGMENT_SIZE);
        assert!(big >= 4 || 3 * SEGMENT_SIZE <= big * SEGMENT_SIZE - jumbo_alloc_offset(big));
    }
}
