//! Old Generation - Freelist Spaces and Jumbo Segments
//!
//! The old gen is an ordered list of unit segments plus a list of jumbo
//! segments. Free space is tracked per segment in size-class buckets:
//!
//! ```text
//! |       Small section       |     Large section     |
//! +----+----+----+     +------+------+------+   +-----+
//! | 0  | 8  | 16 | ... | 248  | 256  | 512  |...| 4MiB|
//! +----+----+----+     +------+------+------+   +-----+
//! ```
//!
//! 32 small buckets cover one alignment step each; large buckets cover
//! powers of two. A global bit array records which buckets have any free
//! cell anywhere, and per-bucket lists of segment nodes give O(1) access
//! to the first segment with space in a bucket. Small-bucket hits are
//! exact-fit pops; everything else is a first-fit walk that carves tails
//! off larger cells.

use std::sync::Arc;

use log::{debug, trace};

use crate::cell::{self, CellKind, FreelistCell, GcCell, MIN_ALLOCATION_SIZE};
use crate::error::{GcError, Result};
use crate::pointer::{CompressedPointer, PointerBase};
use crate::runtime::{CrashManager, IdTracker};
use crate::segment::{
    self, card_table, jumbo_units_for, FixedSizeSegment, JumboSegment, LOG_SEGMENT_SIZE,
    SEGMENT_SIZE,
};
use crate::storage::StorageProvider;
use crate::util::{BitArray, ExponentialMovingAverage, LOG_HEAP_ALIGN};

/// Small buckets cover one alignment step each.
pub const LOG_NUM_SMALL_BUCKETS: usize = 5;
pub const NUM_SMALL_BUCKETS: usize = 1 << LOG_NUM_SMALL_BUCKETS;

/// Sizes at or above this go in the power-of-two section.
pub const LOG_MIN_SIZE_FOR_LARGE_BLOCK: usize = LOG_NUM_SMALL_BUCKETS + LOG_HEAP_ALIGN;
pub const MIN_SIZE_FOR_LARGE_BLOCK: usize = 1 << LOG_MIN_SIZE_FOR_LARGE_BLOCK;

pub const NUM_LARGE_BUCKETS: usize = LOG_SEGMENT_SIZE - LOG_MIN_SIZE_FOR_LARGE_BLOCK + 1;
pub const NUM_BUCKETS: usize = NUM_SMALL_BUCKETS + NUM_LARGE_BUCKETS;

/// Bucket index for a free cell of `size` bytes.
#[inline]
pub fn freelist_bucket(size: usize) -> usize {
    if size < MIN_SIZE_FOR_LARGE_BLOCK {
        return size >> LOG_HEAP_ALIGN;
    }
    let bucket =
        NUM_SMALL_BUCKETS + (usize::BITS - 1 - size.leading_zeros()) as usize
            - LOG_MIN_SIZE_FOR_LARGE_BLOCK;
    debug_assert!(bucket < NUM_BUCKETS, "size outside the freelist range");
    bucket
}

/// "No segment" sentinel in the per-bucket segment lists.
const NO_SEG: u32 = u32::MAX;

/// A node in the segment-level freelist for one (segment, bucket) pair.
/// Linked into the global per-bucket list exactly when `head` is non-null.
#[derive(Clone, Copy)]
struct SegmentBucket {
    prev: u32,
    next: u32,
    head: CompressedPointer,
}

impl SegmentBucket {
    const EMPTY: SegmentBucket = SegmentBucket {
        prev: NO_SEG,
        next: NO_SEG,
        head: CompressedPointer::NULL,
    };
}

type SegmentBuckets = [SegmentBucket; NUM_BUCKETS];

/// Progress of an incremental sweep, walking segments back to front.
#[derive(Default)]
pub struct SweepIterator {
    pub seg_number: usize,
    pub swept_bytes: u64,
    pub swept_external_bytes: u64,
    pub collected_cells: u64,
}

pub struct OldGen {
    segments: Vec<FixedSizeSegment>,
    segment_buckets: Vec<SegmentBuckets>,
    jumbo_segments: Vec<JumboSegment>,

    /// First segment (by position) with free cells per bucket.
    bucket_heads: [u32; NUM_BUCKETS],
    /// Bit `b` set iff `bucket_heads[b]` has a non-empty list.
    freelist_bucket_bits: BitArray,

    allocated_bytes: u64,
    external_bytes: u64,
    allocated_large_bytes: u64,
    num_large_allocations: u64,
    target_size: ExponentialMovingAverage,
    pub sweep_iter: SweepIterator,

    // Segment creation context.
    provider: Box<dyn StorageProvider>,
    pb: Arc<PointerBase>,
    crash_mgr: Arc<dyn CrashManager>,
    pub max_heap_size: usize,
    pub occupancy_target: f64,
    name: String,

    /// Units mapped across the whole heap (young, old, compactee, jumbo).
    total_units: usize,
    next_segment_index: u32,
    recycled_indices: Vec<u32>,
}

impl OldGen {
    pub fn new(
        provider: Box<dyn StorageProvider>,
        pb: Arc<PointerBase>,
        crash_mgr: Arc<dyn CrashManager>,
        max_heap_size: usize,
        occupancy_target: f64,
        init_heap_size: usize,
        name: String,
    ) -> Self {
        OldGen {
            segments: Vec::new(),
            segment_buckets: Vec::new(),
            jumbo_segments: Vec::new(),
            bucket_heads: [NO_SEG; NUM_BUCKETS],
            freelist_bucket_bits: BitArray::new(NUM_BUCKETS),
            allocated_bytes: 0,
            external_bytes: 0,
            allocated_large_bytes: 0,
            num_large_allocations: 0,
            target_size: ExponentialMovingAverage::new(0.5, init_heap_size as f64),
            sweep_iter: SweepIterator::default(),
            provider,
            pb,
            crash_mgr,
            max_heap_size,
            occupancy_target,
            name,
            total_units: 0,
            next_segment_index: 0,
            recycled_indices: Vec::new(),
        }
    }

    // === Accounting ===

    #[inline]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn num_jumbo_segments(&self) -> usize {
        self.jumbo_segments.len()
    }

    pub fn segment(&self, pos: usize) -> &FixedSizeSegment {
        &self.segments[pos]
    }

    pub fn jumbo_segment(&self, pos: usize) -> &JumboSegment {
        &self.jumbo_segments[pos]
    }

    /// Bytes in use by old-gen cells, excluding freelist entries.
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn allocated_large_object_bytes(&self) -> u64 {
        self.allocated_large_bytes
    }

    pub fn num_large_allocations(&self) -> u64 {
        self.num_large_allocations
    }

    pub fn increment_allocated_bytes(&mut self, incr: i64) {
        self.allocated_bytes = self
            .allocated_bytes
            .checked_add_signed(incr)
            .expect("allocated byte accounting underflow");
    }

    #[inline]
    pub fn external_bytes(&self) -> u64 {
        self.external_bytes
    }

    pub fn credit_external_memory(&mut self, size: usize) {
        self.external_bytes += size as u64;
    }

    pub fn debit_external_memory(&mut self, size: usize) {
        debug_assert!(self.external_bytes >= size as u64);
        self.external_bytes -= size as u64;
    }

    /// Total bytes in old-gen storage, counting freelist entries and any
    /// pending compactee (which also occupies a unit).
    pub fn size(&self) -> u64 {
        let jumbo_bytes: usize = self.jumbo_segments.iter().map(|j| j.size()).sum();
        (self.segments.len() * SEGMENT_SIZE + jumbo_bytes) as u64
    }

    pub fn target_size_bytes(&self) -> u64 {
        self.target_size.get() as u64
    }

    pub fn update_target_size(&mut self, live_bytes: u64) {
        let target = (live_bytes as f64 / self.occupancy_target).min(self.max_heap_size as f64);
        self.target_size.update(target);
    }

    /// Bytes of mapped segment storage heap-wide, including metadata.
    pub fn segment_footprint(&self) -> u64 {
        (self.total_units * SEGMENT_SIZE) as u64
    }

    // === Segment creation ===

    fn take_segment_index(&mut self) -> u32 {
        if let Some(idx) = self.recycled_indices.pop() {
            return idx;
        }
        self.next_segment_index += 1;
        self.next_segment_index
    }

    fn publish_segment_extent(&self, extra_name: &str, base: usize) {
        let key = format!("{}:HeapSegment:{}", self.name, extra_name);
        self.crash_mgr
            .set_contextual_custom_data(&key, &format!("{base:#x}"));
    }

    pub fn remove_segment_extent(&self, extra_name: &str) {
        let key = format!("{}:HeapSegment:{}", self.name, extra_name);
        self.crash_mgr.remove_contextual_custom_data(&key);
    }

    /// Republish a segment under a different name (e.g. "YG").
    pub fn publish_segment_as(&self, extra_name: &str, base: usize) {
        self.publish_segment_extent(extra_name, base);
    }

    /// Map a fresh unit segment, to be used by either generation.
    pub fn create_segment(&mut self) -> Result<FixedSizeSegment> {
        if self.heap_footprint_with(1) > self.max_heap_size as u64 {
            return Err(GcError::OutOfMemory {
                requested: SEGMENT_SIZE,
                max_heap: self.max_heap_size,
            });
        }
        let storage = self.provider.create("hades-segment", SEGMENT_SIZE)?;
        let index = self.take_segment_index();
        let seg = FixedSizeSegment::new(storage, index);
        self.pb.set_segment(index, seg.base());
        self.total_units += 1;
        self.publish_segment_extent(&index.to_string(), seg.base());
        trace!("created segment {} at {:#x}", index, seg.base());
        Ok(seg)
    }

    fn heap_footprint_with(&self, extra_units: usize) -> u64 {
        ((self.total_units + extra_units) * SEGMENT_SIZE) as u64 + self.external_bytes
    }

    /// Release a unit segment's identity (the storage dies with the
    /// returned segment).
    pub fn release_segment(&mut self, seg: FixedSizeSegment) {
        let index = seg.index();
        self.pb.clear_segment(index);
        self.recycled_indices.push(index);
        self.total_units -= 1;
        self.remove_segment_extent(&index.to_string());
    }

    /// Take ownership of `seg`, putting its unused tail on the freelist.
    /// Bytes already bump-allocated into it count as allocated.
    pub fn add_segment(&mut self, mut seg: FixedSizeSegment) {
        seg.clear_external_memory_charge();
        self.allocated_bytes += seg.used() as u64;
        let tail = seg.end() - seg.level();
        let pos = self.segments.len() as u32;
        self.segment_buckets.push([SegmentBucket::EMPTY; NUM_BUCKETS]);
        if tail >= MIN_ALLOCATION_SIZE {
            let addr = seg.bump_alloc(tail).expect("tail must fit");
            self.segments.push(seg);
            unsafe { self.add_cell_to_freelist(addr, tail, pos) };
        } else {
            self.segments.push(seg);
        }
    }

    /// Remove the last segment (for compaction). Its free cells leave the
    /// freelists.
    pub fn pop_segment(&mut self) -> FixedSizeSegment {
        let pos = (self.segments.len() - 1) as u32;
        for bucket in 0..NUM_BUCKETS {
            if !self.segment_buckets[pos as usize][bucket].head.is_null() {
                self.unlink_segment_bucket(pos, bucket);
                self.segment_buckets[pos as usize][bucket].head = CompressedPointer::NULL;
                self.freelist_bucket_bits
                    .set(bucket, self.bucket_heads[bucket] != NO_SEG);
            }
        }
        self.segment_buckets.pop();
        self.segments.pop().expect("pop_segment on empty old gen")
    }

    // === Segment-bucket list management ===

    fn link_segment_bucket(&mut self, pos: u32, bucket: usize) {
        let first = self.bucket_heads[bucket];
        self.segment_buckets[pos as usize][bucket].prev = NO_SEG;
        self.segment_buckets[pos as usize][bucket].next = first;
        if first != NO_SEG {
            self.segment_buckets[first as usize][bucket].prev = pos;
        }
        self.bucket_heads[bucket] = pos;
    }

    fn unlink_segment_bucket(&mut self, pos: u32, bucket: usize) {
        let SegmentBucket { prev, next, .. } = self.segment_buckets[pos as usize][bucket];
        if prev != NO_SEG {
            self.segment_buckets[prev as usize][bucket].next = next;
        } else {
            debug_assert_eq!(self.bucket_heads[bucket], pos);
            self.bucket_heads[bucket] = next;
        }
        if next != NO_SEG {
            self.segment_buckets[next as usize][bucket].prev = prev;
        }
        self.segment_buckets[pos as usize][bucket].prev = NO_SEG;
        self.segment_buckets[pos as usize][bucket].next = NO_SEG;
    }

    // === Cell-level freelist management ===

    /// Turn `[addr, addr + size)` into a freelist cell in segment `pos`.
    unsafe fn add_cell_to_freelist(&mut self, addr: usize, size: usize, pos: u32) {
        let bucket = freelist_bucket(size);
        let cell = FreelistCell::init(addr, size);
        card_table::update_boundaries(segment::storage_start(addr), addr, size);
        let cp = self.pb.compress(cell as *mut GcCell);
        let head = &mut self.segment_buckets[pos as usize][bucket].head;
        let was_empty = head.is_null();
        (*cell).next = *head;
        *head = cp;
        if was_empty {
            self.link_segment_bucket(pos, bucket);
        }
        self.freelist_bucket_bits.set(bucket, true);
    }

    /// Unlink the cell pointed to by `prev_loc`.
    ///
    /// # Safety
    /// `prev_loc` must point at a live link (a segment-bucket head or a
    /// freelist cell's `next`) in segment `pos`, bucket `bucket`.
    unsafe fn remove_cell_from_freelist(
        &mut self,
        prev_loc: *mut CompressedPointer,
        bucket: usize,
        pos: u32,
    ) -> *mut FreelistCell {
        let cell = (*prev_loc).get_non_null(&self.pb) as *mut FreelistCell;
        *prev_loc = (*cell).next;
        if self.segment_buckets[pos as usize][bucket].head.is_null() {
            self.unlink_segment_bucket(pos, bucket);
            self.freelist_bucket_bits
                .set(bucket, self.bucket_heads[bucket] != NO_SEG);
        }
        cell
    }

    /// Bookkeeping common to every successful old-gen allocation: the cell
    /// is born marked (so an in-progress collection never sweeps it) and
    /// covered by the cell-head table.
    fn finish_alloc(&mut self, cell: *mut GcCell, size: usize) -> *mut GcCell {
        unsafe {
            segment::mark_bits::set_cell_mark_bit(cell);
            card_table::update_boundaries(
                segment::storage_start(cell as usize),
                cell as usize,
                size,
            );
        }
        self.allocated_bytes += size as u64;
        cell
    }

    /// Search the freelists for `size` bytes. Exact-fit on small buckets,
    /// then first-fit with carving.
    pub fn search(&mut self, size: usize) -> Option<*mut GcCell> {
        let mut bucket = freelist_bucket(size);
        if bucket < NUM_SMALL_BUCKETS {
            let pos = self.bucket_heads[bucket];
            if pos != NO_SEG {
                debug_assert!(self.freelist_bucket_bits.at(bucket));
                unsafe {
                    let head =
                        &mut self.segment_buckets[pos as usize][bucket].head as *mut CompressedPointer;
                    let cell = self.remove_cell_from_freelist(head, bucket, pos);
                    debug_assert_eq!((*cell).cell.allocated_size(), size);
                    return Some(self.finish_alloc(cell as *mut GcCell, size));
                }
            }
            // No exact fit; start searching at the smallest bucket whose
            // cells can be carved without leaving a sub-minimum remainder.
            bucket = freelist_bucket(size + MIN_ALLOCATION_SIZE);
        }

        let mut bucket = self.freelist_bucket_bits.find_next_set_bit_from(bucket);
        while bucket < NUM_BUCKETS {
            let mut pos = self.bucket_heads[bucket];
            while pos != NO_SEG {
                unsafe {
                    let mut prev_loc =
                        &mut self.segment_buckets[pos as usize][bucket].head as *mut CompressedPointer;
                    let mut cur = *prev_loc;
                    while !cur.is_null() {
                        let cell = cur.get_non_null(&self.pb) as *mut FreelistCell;
                        debug_assert_eq!((*cell).cell.kind(), CellKind::Freelist);
                        let cell_size = (*cell).cell.allocated_size();
                        debug_assert_eq!(freelist_bucket(cell_size), bucket);
                        if cell_size >= size + MIN_ALLOCATION_SIZE {
                            // Carve a tail off; the remainder may drop to a
                            // smaller bucket.
                            let carved = FreelistCell::carve(cell, size);
                            let new_size = (*cell).cell.allocated_size();
                            let new_bucket = freelist_bucket(new_size);
                            debug_assert!(new_bucket <= bucket);
                            if new_bucket != bucket {
                                self.remove_cell_from_freelist(prev_loc, bucket, pos);
                                self.add_cell_to_freelist(cell as usize, new_size, pos);
                            }
                            return Some(self.finish_alloc(carved, size));
                        } else if cell_size == size {
                            self.remove_cell_from_freelist(prev_loc, bucket, pos);
                            return Some(self.finish_alloc(cell as *mut GcCell, size));
                        }
                        // Too small, or would leave a sub-minimum remainder.
                        prev_loc = &mut (*cell).next as *mut CompressedPointer;
                        cur = (*cell).next;
                    }
                    pos = self.segment_buckets[pos as usize][bucket].next;
                }
            }
            bucket = self.freelist_bucket_bits.find_next_set_bit_from(bucket + 1);
        }
        None
    }

    /// Allocate `size` bytes in the old gen. The returned space must be
    /// initialized before the GC mutex is released.
    pub fn alloc(&mut self, size: usize) -> Result<*mut GcCell> {
        debug_assert!(size >= MIN_ALLOCATION_SIZE);
        debug_assert!(size <= segment::MAX_NORMAL_ALLOC_SIZE);
        if let Some(cell) = self.search(size) {
            return Ok(cell);
        }
        // Grow by a segment rather than blocking on any in-progress
        // collection.
        match self.create_segment() {
            Ok(mut seg) => {
                let addr = seg.bump_alloc(size).expect("fresh segment fits any cell");
                let cell = addr as *mut GcCell;
                unsafe {
                    segment::mark_bits::set_cell_mark_bit(cell);
                    card_table::update_boundaries(seg.base(), addr, size);
                }
                // add_segment counts the bumped bytes as allocated and puts
                // the remainder on the freelist.
                self.add_segment(seg);
                Ok(cell)
            }
            Err(err) => {
                // Retry in case something was freed in the meantime.
                if let Some(cell) = self.search(size) {
                    return Ok(cell);
                }
                debug!("old gen allocation of {size} bytes failed: {err}");
                Err(err)
            }
        }
    }

    /// Allocate a cell too large for a unit segment in a dedicated jumbo
    /// segment. Returns `Ok(None)` when `may_fail` and memory runs out.
    pub fn alloc_large(&mut self, size: usize, may_fail: bool) -> Result<Option<*mut GcCell>> {
        let units = jumbo_units_for(size);
        let oom = || GcError::OutOfMemory {
            requested: size,
            max_heap: self.max_heap_size,
        };
        if self.heap_footprint_with(units) > self.max_heap_size as u64 {
            return if may_fail { Ok(None) } else { Err(oom()) };
        }
        let storage = match self.provider.create("hades-jumbo", units * SEGMENT_SIZE) {
            Ok(storage) => storage,
            Err(err) if may_fail => {
                debug!("jumbo allocation of {size} bytes failed: {err}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let index = self.take_segment_index();
        let seg = JumboSegment::new(storage, index, size);
        self.pb.set_segment(index, seg.base());
        self.publish_segment_extent(&index.to_string(), seg.base());
        self.total_units += units;
        self.allocated_bytes += size as u64;
        self.allocated_large_bytes += size as u64;
        self.num_large_allocations += 1;
        let cell = seg.cell();
        self.jumbo_segments.push(seg);
        Ok(Some(cell))
    }

    // === Collection support ===

    /// Clear the mark state of every old-gen segment, fixed and jumbo.
    pub fn clear_all_mark_bits(&self) {
        unsafe {
            for seg in &self.segments {
                segment::mark_bits::clear(seg.base());
            }
        }
        for jumbo in &self.jumbo_segments {
            jumbo.clear_mark();
        }
    }

    pub fn initialize_sweep(&mut self) {
        debug_assert!(
            self.sweep_iter.seg_number == 0 && self.sweep_iter.swept_bytes == 0,
            "sweep already in progress"
        );
        self.sweep_iter = SweepIterator {
            seg_number: self.segments.len(),
            ..SweepIterator::default()
        };
    }

    pub fn sweep_segments_remaining(&self) -> usize {
        self.sweep_iter.seg_number
    }

    /// Sweep one segment: coalesce dead and free space into freelist
    /// cells, finalize dead cells, and rebuild this segment's freelist
    /// links. Returns false when no segments were left to sweep.
    pub fn sweep_next_segment(&mut self, background: bool, ids: &mut IdTracker) -> bool {
        if self.sweep_iter.seg_number == 0 {
            return false;
        }
        self.sweep_iter.seg_number -= 1;
        let pos = self.sweep_iter.seg_number;

        // Drop this segment's buckets out of the global freelist; they are
        // rebuilt below. The bucket bits stay stale until then, which is
        // fine because the GC mutex is held throughout.
        for bucket in 0..NUM_BUCKETS {
            if !self.segment_buckets[pos][bucket].head.is_null() {
                self.unlink_segment_bucket(pos as u32, bucket);
                self.segment_buckets[pos][bucket].head = CompressedPointer::NULL;
            }
        }

        let seg_base = self.segments[pos].base();
        let start = self.segments[pos].start();
        let level = self.segments[pos].level();
        let mut swept_bytes = 0u64;
        let mut collected = 0u64;
        let mut free_start = 0usize;
        let mut free_end = 0usize;

        unsafe {
            let mut cur = start;
            while cur < level {
                let cell = cur as *mut GcCell;
                debug_assert!((*cell).is_valid(), "invalid cell in sweep");
                let size = (*cell).allocated_size();

                if segment::mark_bits::get_cell_mark_bit(cell) {
                    // Live. Trim any unused tail into a filler, which the
                    // next iteration folds into a free run. Trimming
                    // resizes the cell, so it cannot race the mutator and
                    // is skipped on the background thread.
                    if !background {
                        let trimmed = cell::trimmed_size(cell, size);
                        let trimmable = size - trimmed;
                        if trimmable >= MIN_ALLOCATION_SIZE {
                            let kind = (*cell).kind();
                            crate::cell::GcCell::set_kind_and_size(cell, kind, trimmed);
                            cell::init_filler(cur + trimmed, trimmable);
                            card_table::update_boundaries(seg_base, cur + trimmed, trimmable);
                            cur += trimmed;
                            continue;
                        }
                    }
                    cur += size;
                    continue;
                }

                // Dead or already free: extend the current run.
                if free_end != cur {
                    if free_start != 0 {
                        self.add_cell_to_freelist(free_start, free_end - free_start, pos as u32);
                    }
                    free_start = cur;
                    free_end = cur;
                }
                free_end += size;

                if (*cell).kind() != CellKind::Freelist {
                    swept_bytes += size as u64;
                    cell::finalize_cell(cell);
                    if (*cell).kind() != CellKind::Filler {
                        ids.untrack(cur);
                        collected += 1;
                    }
                }
                cur += size;
            }
            if free_start != 0 {
                self.add_cell_to_freelist(free_start, free_end - free_start, pos as u32);
            }
        }

        // add_cell_to_freelist re-linked any bucket that gained cells;
        // refresh the bits for buckets this segment previously served.
        for bucket in 0..NUM_BUCKETS {
            self.freelist_bucket_bits
                .set(bucket, self.bucket_heads[bucket] != NO_SEG);
        }

        self.increment_allocated_bytes(-(swept_bytes as i64));
        self.sweep_iter.swept_bytes += swept_bytes;
        self.sweep_iter.collected_cells += collected;
        true
    }

    /// Free every jumbo segment whose cell did not get marked. Runs at the
    /// end of sweeping.
    pub fn free_unused_jumbo_segments(&mut self, ids: &mut IdTracker) {
        let mut pos = 0;
        while pos < self.jumbo_segments.len() {
            if self.jumbo_segments[pos].is_marked() {
                pos += 1;
                continue;
            }
            let seg = self.jumbo_segments.swap_remove(pos);
            let cell = seg.cell();
            unsafe {
                cell::finalize_cell(cell);
            }
            ids.untrack(cell as usize);
            let cell_size = seg.cell_size() as u64;
            self.increment_allocated_bytes(-(cell_size as i64));
            self.allocated_large_bytes -= cell_size;
            self.sweep_iter.swept_bytes += cell_size;
            self.sweep_iter.collected_cells += 1;
            self.total_units -= seg.units();
            let index = seg.index();
            self.pb.clear_segment(index);
            self.recycled_indices.push(index);
            self.remove_segment_extent(&index.to_string());
        }
    }

    /// Check the freelist invariants: every listed cell has freelist kind,
    /// an accurate size for its bucket, and chains within its segment;
    /// the global bits match the lists.
    pub fn verify_freelists(&self) {
        for bucket in 0..NUM_BUCKETS {
            let mut pos = self.bucket_heads[bucket];
            assert_eq!(
                self.freelist_bucket_bits.at(bucket),
                pos != NO_SEG,
                "freelist bit out of sync for bucket {bucket}"
            );
            while pos != NO_SEG {
                let seg_base = self.segments[pos as usize].base();
                let mut cur = self.segment_buckets[pos as usize][bucket].head;
                assert!(!cur.is_null(), "linked segment bucket with empty list");
                unsafe {
                    while !cur.is_null() {
                        let cell = cur.get_non_null(&self.pb);
                        assert_eq!((*cell).kind(), CellKind::Freelist);
                        let size = (*cell).allocated_size();
                        assert_eq!(freelist_bucket(size), bucket);
                        assert_eq!(segment::storage_start(cell as usize), seg_base);
                        cur = (*(cell as *mut FreelistCell)).next;
                    }
                }
                pos = self.segment_buckets[pos as usize][bucket].next;
            }
        }
    }
}
