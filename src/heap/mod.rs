//! Hades Heap - Generational, Mostly-Concurrent Collection
//!
//! The mutator allocates into a bump-pointer young generation; young
//! collections evacuate every live young cell into the freelist-managed
//! old generation. Old collections run in four phases:
//!
//! ```text
//!        ┌──────┐   worklist    ┌──────────────────┐        ┌───────┐
//!  None ─▶ Mark │──── empty ───▶│ CompleteMarking  │──STW──▶│ Sweep │─▶ None
//!        └──────┘               │  (weak updates)  │        └───────┘
//!            ▲                  └──────────────────┘
//!   snapshot barriers feed the global worklist
//! ```
//!
//! Marking and sweeping run on a background thread (64-bit targets) or
//! interleave with young collections (incremental mode). The mutator and
//! the background thread share one mutex plus a pause flag: the mutator
//! never waits behind long background work, and the background yields at
//! every step boundary. Optionally, one old segment per cycle is marked
//! for compaction and evacuated by the next young collection.

pub mod acceptors;
pub mod executor;
pub mod old;
pub mod weakmap_marking;
pub mod worklist;
pub mod young;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cell::{self, CellKind, GcCell, MIN_ALLOCATION_SIZE};
use crate::config::GcConfig;
use crate::error::{GcError, Result};
use crate::pointer::{CompressedPointer, PointerBase, WeakSlotState, WeakSlotTable};
use crate::runtime::{
    CrashManager, GcCallbacks, HeapInfo, IdTracker, NopCrashManager, TripwireContext,
};
use crate::segment::{
    self, card_table, mark_bits, FixedSizeSegment, CARDS_PER_SEGMENT, MAX_NORMAL_ALLOC_SIZE,
    SEGMENT_SIZE,
};
use crate::stats::{CollectionStats, CumulativeStats, GcAnalyticsEvent};
use crate::storage::{StorageProvider, VmStorageProvider};
use crate::util::{heap_align_size, BitVector, ExponentialMovingAverage};
use crate::value::HermesValue;

use acceptors::{Acceptor, ClearWeakRootsAcceptor, EvacAcceptor, MarkAcceptor, INVALID_COMPACTEE};
use executor::Executor;
use old::OldGen;
use worklist::{CellPtr, MarkWorklist, BARRIER_CHUNK_SIZE};
use young::YoungGen;

/// Bytes drained per background marking step before re-checking the pause
/// flag.
const CONCURRENT_MARK_LIMIT: usize = 8192;

/// Floor for the incremental drain rate, so collections always terminate.
const BYTE_DRAIN_RATE_MIN: usize = 8192;

/// Phase of the concurrent old-gen collection. The main difference between
/// phases is their effect on the barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Mark,
    CompleteMarking,
    Sweep,
}

/// State that exists only while the old gen is being marked.
pub struct MarkState {
    /// Worklist private to the marking thread; when empty, the global
    /// worklist (fed by barriers) must be consulted.
    pub local_worklist: Vec<CellPtr>,
    /// Weak maps found reachable; resolved by the ephemeron pass.
    pub reachable_weak_maps: Vec<CellPtr>,
    /// Symbols proven live so far. Indexed by symbol id; symbols allocated
    /// after the collection began are live by fiat.
    pub marked_symbols: BitVector,
    /// Bytes to mark per incremental step.
    pub byte_drain_rate: usize,
    pub marked_bytes: u64,
}

impl MarkState {
    fn new(num_symbols: usize) -> Self {
        MarkState {
            local_worklist: Vec::new(),
            reachable_weak_maps: Vec::new(),
            marked_symbols: BitVector::new(num_symbols),
            byte_drain_rate: BYTE_DRAIN_RATE_MIN,
            marked_bytes: 0,
        }
    }
}

/// Tracks the segment chosen for compaction. `start` is set when marking
/// begins (so barriers record pointers into it); `evac_start` is armed at
/// complete marking, making the next young collection evacuate it.
pub(crate) struct CompacteeState {
    pub segment: Option<FixedSizeSegment>,
    pub start: usize,
    pub evac_start: usize,
}

impl CompacteeState {
    fn empty() -> Self {
        CompacteeState {
            segment: None,
            start: INVALID_COMPACTEE,
            evac_start: INVALID_COMPACTEE,
        }
    }

    #[inline]
    pub fn evac_active(&self) -> bool {
        self.evac_start != INVALID_COMPACTEE
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.segment.is_none()
            && self.start == INVALID_COMPACTEE
            && self.evac_start == INVALID_COMPACTEE
    }
}

/// Everything shared between the mutator and the background collector,
/// guarded by the one GC mutex.
pub(crate) struct OldState {
    pub old_gen: OldGen,
    pub phase: Phase,
    pub mark: Option<MarkState>,
    pub compactee: CompacteeState,
    pub weak_slots: WeakSlotTable,
    pub id_tracker: IdTracker,
    pub og_stats: Option<CollectionStats>,
    /// Occupied fraction of the target size at which to start collecting.
    pub og_threshold: ExponentialMovingAverage,
}

impl OldState {
    /// Sweep the next segment; on the last one, free dead jumbo segments
    /// and retune the target size. Returns false when sweeping is done.
    fn sweep_next(&mut self, background: bool) -> bool {
        let external_before = self.old_gen.external_bytes();
        if !self.old_gen.sweep_next_segment(background, &mut self.id_tracker) {
            return false;
        }
        self.old_gen.sweep_iter.swept_external_bytes +=
            external_before - self.old_gen.external_bytes();
        if self.old_gen.sweep_segments_remaining() > 0 {
            return true;
        }

        // Last segment swept: finish the collection's bookkeeping.
        self.old_gen
            .free_unused_jumbo_segments(&mut self.id_tracker);
        if let Some(stats) = self.og_stats.as_mut() {
            // Trimming can free bytes allocated after the collection
            // started; clamp so the stats stay meaningful.
            stats.swept_bytes = self
                .old_gen
                .sweep_iter
                .swept_bytes
                .min(stats.before_allocated);
            stats.swept_external_bytes = self.old_gen.sweep_iter.swept_external_bytes;
            stats.collected_cells = self.old_gen.sweep_iter.collected_cells;
        }
        let live = self.old_gen.allocated_bytes() + self.old_gen.external_bytes();
        self.old_gen.update_target_size(live);
        self.old_gen.sweep_iter = Default::default();
        false
    }
}

pub(crate) struct GcShared {
    state: Mutex<OldState>,
    pause_cv: Condvar,
    og_paused: AtomicBool,
    pub global_worklist: MarkWorklist,
    pub yg_base: AtomicUsize,
    pub compactee_start: AtomicUsize,
    pub compactee_evac_start: AtomicUsize,
}

impl GcShared {
    /// Acquire the GC mutex with priority over the background thread: the
    /// pause flag makes the background yield at its next step boundary
    /// instead of grabbing the mutex back.
    fn pause_and_lock(&self) -> MutexGuard<'_, OldState> {
        self.og_paused.store(true, Ordering::Relaxed);
        let guard = self.state.lock();
        self.og_paused.store(false, Ordering::Relaxed);
        self.pause_cv.notify_one();
        guard
    }
}

/// Fatal allocation failure. The process cannot continue safely.
pub(crate) fn oom(err: GcError) -> ! {
    log::error!("fatal heap error: {err}");
    panic!("HadesGC OOM: {err}");
}

/// Drain marking work: pull barrier entries from the global worklist, then
/// mark up to `limit` bytes from the local worklist. Returns true while
/// local work remains.
pub(crate) fn drain_some_work(
    g: &mut OldState,
    pb: &PointerBase,
    global: &MarkWorklist,
    yg_base: usize,
    limit: usize,
) -> bool {
    let compactee_start = g.compactee.start;
    let OldState {
        mark, weak_slots, ..
    } = &mut *g;
    let Some(state) = mark.as_mut() else {
        return false;
    };
    let mut acceptor = MarkAcceptor::new(state, weak_slots, pb, yg_base, compactee_start);

    for cell in global.drain() {
        unsafe {
            debug_assert!((*cell.0).is_valid(), "invalid cell on the global worklist");
            if !mark_bits::get_cell_mark_bit(cell.0) {
                acceptor.push(cell.0);
            }
        }
    }

    let mut marked = 0usize;
    while marked < limit {
        let Some(cell) = acceptor.state.local_worklist.pop() else {
            break;
        };
        unsafe {
            debug_assert!(mark_bits::get_cell_mark_bit(cell.0), "unmarked cell popped");
            let size = cell::allocated_size_allow_large(cell.0);
            marked += size;
            acceptor.scan_base = segment::storage_start(cell.0 as usize);
            cell::mark_cell(cell.0, &mut acceptor);
        }
    }
    acceptor.state.marked_bytes += marked as u64;
    !acceptor.state.local_worklist.is_empty()
}

/// One background step of the collection. Returns false when the
/// background thread should exit its loop (the mutator takes over at
/// complete marking and restarts it for sweeping).
fn background_step(g: &mut OldState, pb: &PointerBase, shared: &GcShared) -> bool {
    match g.phase {
        Phase::None | Phase::CompleteMarking => false,
        Phase::Mark => {
            let yg_base = shared.yg_base.load(Ordering::Relaxed);
            if !drain_some_work(g, pb, &shared.global_worklist, yg_base, CONCURRENT_MARK_LIMIT) {
                g.phase = Phase::CompleteMarking;
            }
            g.phase == Phase::Mark
        }
        Phase::Sweep => {
            if !g.sweep_next(true) {
                if let Some(stats) = g.og_stats.as_mut() {
                    stats.set_end(g.old_gen.segment_footprint());
                }
                g.phase = Phase::None;
                false
            } else {
                true
            }
        }
    }
}

/// An extent of heap to scan for dirty cards.
struct SegExtent {
    base: usize,
    scan_start: usize,
    scan_end: usize,
    n_cards: usize,
    /// For jumbo segments, the one cell (there is no cell-head table).
    jumbo_cell: Option<*mut GcCell>,
}

/// Scan every maximal run of dirty cards in `extents`, visiting the
/// overlapping cells. Cards are cleared afterwards unless a compaction is
/// being prepared (the marker still needs them).
unsafe fn scan_dirty_cards(
    acceptor: &mut EvacAcceptor<'_>,
    extents: &[SegExtent],
    clear: bool,
    visit_unmarked: bool,
) {
    for extent in extents {
        if extent.scan_end <= extent.scan_start {
            continue;
        }
        acceptor.scan_base = extent.base;
        let base = extent.base;
        let to = card_table::card_index(base, extent.scan_end - 1) + 1;
        let mut from = card_table::card_index(base, extent.scan_start);
        while let Some(begin_idx) = card_table::find_next_dirty_card(base, from, to) {
            let end_idx = card_table::find_next_clean_card(base, begin_idx, to).unwrap_or(to);
            let begin = card_table::card_boundary(base, begin_idx);
            let end = card_table::card_boundary(base, end_idx);
            let boundary = end.min(extent.scan_end);

            let first = match extent.jumbo_cell {
                Some(cell) => cell,
                None => card_table::first_cell_head(base, begin_idx) as *mut GcCell,
            };
            let mut obj = first;
            if visit_unmarked || mark_bits::get_cell_mark_bit(obj) {
                cell::mark_cell_within_range(obj, acceptor, begin, end);
            }
            let mut next = (obj as usize + cell::allocated_size_allow_large(obj)) as *mut GcCell;
            obj = next;
            if (obj as usize) < boundary {
                // Interior cells are fully inside the run; the last one is
                // visited with respect to the run boundaries again.
                next = (obj as usize + (*obj).allocated_size()) as *mut GcCell;
                while (next as usize) < boundary {
                    if visit_unmarked || mark_bits::get_cell_mark_bit(obj) {
                        cell::mark_cell(obj, acceptor);
                    }
                    obj = next;
                    next = (obj as usize + (*obj).allocated_size()) as *mut GcCell;
                }
                if visit_unmarked || mark_bits::get_cell_mark_bit(obj) {
                    cell::mark_cell_within_range(obj, acceptor, begin, end);
                }
            }
            from = end_idx;
        }
        if clear {
            card_table::clear_cards(base, extent.n_cards);
        }
    }
    acceptor.scan_base = 0;
}

type TripwireCallback = Box<dyn FnMut(&TripwireContext) -> anyhow::Result<()>>;
type AnalyticsCallback = Box<dyn FnMut(&GcAnalyticsEvent)>;

/// The heap manager handle. Owned by the mutator; exactly one exists per
/// runtime.
pub struct HadesGc {
    config: GcConfig,
    /// Concurrent marking is compiled out on 32-bit targets, where 64-bit
    /// values cannot be read in one instruction.
    concurrent: bool,
    shared: Arc<GcShared>,
    pb: Arc<PointerBase>,
    crash_mgr: Arc<dyn CrashManager>,
    young: YoungGen,

    /// True from the start of old-gen marking to the start of the
    /// complete-marking pause; gates the snapshot barriers.
    og_marking_barriers: bool,
    barrier_chunk: Vec<CellPtr>,
    write_barrier_symbols: BitVector,

    executor: Option<Executor>,
    promote_yg_to_og: bool,
    yg_average_survival: ExponentialMovingAverage,
    total_allocated: u64,
    cum: CumulativeStats,
    tripwire: Option<TripwireCallback>,
    tripwire_fired: bool,
    analytics: Option<AnalyticsCallback>,
}

impl HadesGc {
    /// Create a heap with the default mmap-backed storage provider and no
    /// crash manager.
    pub fn new(config: GcConfig) -> Result<HadesGc> {
        Self::with_provider(
            config,
            Box::new(VmStorageProvider::new()),
            Arc::new(NopCrashManager),
        )
    }

    pub fn with_provider(
        config: GcConfig,
        provider: Box<dyn StorageProvider>,
        crash_mgr: Arc<dyn CrashManager>,
    ) -> Result<HadesGc> {
        config.validate().map_err(GcError::Configuration)?;
        let concurrent = config.concurrent && cfg!(target_pointer_width = "64");
        let pb = Arc::new(PointerBase::new());

        let mut old_gen = OldGen::new(
            provider,
            Arc::clone(&pb),
            Arc::clone(&crash_mgr),
            config.max_heap_size,
            config.occupancy_target,
            config.init_heap_size,
            config.name.clone(),
        );
        let yg_segment = old_gen.create_segment()?;
        old_gen.publish_segment_as("YG", yg_segment.base());
        crash_mgr.set_custom_data("HermesGC", "hades");

        let young = YoungGen::new(yg_segment);
        let shared = Arc::new(GcShared {
            state: Mutex::new(OldState {
                old_gen,
                phase: Phase::None,
                mark: None,
                compactee: CompacteeState::empty(),
                weak_slots: WeakSlotTable::new(),
                id_tracker: IdTracker::new(),
                og_stats: None,
                og_threshold: ExponentialMovingAverage::new(0.5, 0.75),
            }),
            pause_cv: Condvar::new(),
            og_paused: AtomicBool::new(false),
            global_worklist: MarkWorklist::new(),
            yg_base: AtomicUsize::new(young.base()),
            compactee_start: AtomicUsize::new(INVALID_COMPACTEE),
            compactee_evac_start: AtomicUsize::new(INVALID_COMPACTEE),
        });

        let promote_yg_to_og = !config.alloc_in_young || config.revert_to_yg_at_tti;
        Ok(HadesGc {
            concurrent,
            shared,
            pb,
            crash_mgr,
            young,
            og_marking_barriers: false,
            barrier_chunk: Vec::with_capacity(BARRIER_CHUNK_SIZE),
            write_barrier_symbols: BitVector::new(0),
            executor: concurrent.then(Executor::new),
            promote_yg_to_og,
            yg_average_survival: ExponentialMovingAverage::new(
                0.5,
                0.3 * MAX_NORMAL_ALLOC_SIZE as f64,
            ),
            total_allocated: 0,
            cum: CumulativeStats::default(),
            tripwire: None,
            tripwire_fired: false,
            analytics: None,
            config,
        })
    }

    pub fn set_tripwire_callback(&mut self, cb: TripwireCallback) {
        self.tripwire = Some(cb);
    }

    pub fn set_analytics_callback(&mut self, cb: AnalyticsCallback) {
        self.analytics = Some(cb);
    }

    #[inline]
    pub fn pointer_base(&self) -> &PointerBase {
        &self.pb
    }

    pub fn kind_as_str(&self) -> &'static str {
        "hades"
    }

    /// The current phase of the old-gen collection.
    pub fn concurrent_phase(&self) -> Phase {
        self.shared.pause_and_lock().phase
    }

    /// O(1): does `addr` point into the young generation?
    #[inline]
    pub fn in_young_gen(&self, addr: usize) -> bool {
        segment::storage_start(addr) == self.young.base()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a cell of `size` bytes (rounded up to the heap alignment).
    /// `long_lived` cells go straight to the old generation.
    pub fn alloc_cell(
        &mut self,
        rt: &mut dyn GcCallbacks,
        size: usize,
        kind: CellKind,
        long_lived: bool,
    ) -> *mut GcCell {
        let size = heap_align_size(size.max(MIN_ALLOCATION_SIZE));
        assert!(
            size <= MAX_NORMAL_ALLOC_SIZE,
            "normal allocation exceeds the segment size; use a large allocation"
        );
        self.total_allocated += size as u64;
        if long_lived {
            let shared = Arc::clone(&self.shared);
            let mut guard = shared.pause_and_lock();
            match guard.old_gen.alloc(size) {
                Ok(cell) => {
                    unsafe { GcCell::set_kind_and_size(cell, kind, size) };
                    cell
                }
                Err(err) => oom(err),
            }
        } else {
            let cell = self.young_alloc(rt, size);
            unsafe { GcCell::set_kind_and_size(cell, kind, size) };
            if kind.has_finalizer() {
                self.young.finalizables.push(CellPtr(cell));
            }
            cell
        }
    }

    /// Allocate a cell that may exceed the normal maximum; oversized cells
    /// get a jumbo segment and a zero header size. With `may_fail`, a
    /// failed large allocation returns `None` instead of being fatal.
    pub fn alloc_cell_can_be_large(
        &mut self,
        rt: &mut dyn GcCallbacks,
        size: usize,
        kind: CellKind,
        may_fail: bool,
    ) -> Option<*mut GcCell> {
        let size = heap_align_size(size.max(MIN_ALLOCATION_SIZE));
        if size <= MAX_NORMAL_ALLOC_SIZE {
            return Some(self.alloc_cell(rt, size, kind, true));
        }
        assert!(
            !kind.has_finalizer(),
            "large-allocable kinds must not require finalizers"
        );
        self.total_allocated += size as u64;
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        match guard.old_gen.alloc_large(size, may_fail) {
            Ok(Some(cell)) => {
                unsafe { GcCell::set_kind_and_size(cell, kind, 0) };
                Some(cell)
            }
            Ok(None) => None,
            Err(err) => oom(err),
        }
    }

    /// Allocate two cells with one bump so no collection can run between
    /// them. Both must be non-finalizable and fit the young gen together.
    pub fn make2_young_gen_unsafe(
        &mut self,
        rt: &mut dyn GcCallbacks,
        size1: usize,
        kind1: CellKind,
        size2: usize,
        kind2: CellKind,
    ) -> (*mut GcCell, *mut GcCell) {
        assert!(!kind1.has_finalizer() && !kind2.has_finalizer());
        let size1 = heap_align_size(size1.max(MIN_ALLOCATION_SIZE));
        let size2 = heap_align_size(size2.max(MIN_ALLOCATION_SIZE));
        let total = size1 + size2;
        assert!(total <= MAX_NORMAL_ALLOC_SIZE);
        let addr = self.young_alloc(rt, total) as usize;
        self.total_allocated += total as u64;
        let first = addr as *mut GcCell;
        let second = (addr + size1) as *mut GcCell;
        unsafe {
            GcCell::set_kind_and_size(first, kind1, size1);
            GcCell::set_kind_and_size(second, kind2, size2);
        }
        debug_assert!(self.in_young_gen(first as usize) && self.in_young_gen(second as usize));
        (first, second)
    }

    #[inline]
    fn young_alloc(&mut self, rt: &mut dyn GcCallbacks, size: usize) -> *mut GcCell {
        if let Some(addr) = self.young.segment.bump_alloc(size) {
            return addr as *mut GcCell;
        }
        self.young_alloc_slow(rt, size)
    }

    #[cold]
    fn young_alloc_slow(&mut self, rt: &mut dyn GcCallbacks, size: usize) -> *mut GcCell {
        self.young_gen_collection(rt, "young alloc failure", false);
        if let Some(addr) = self.young.segment.bump_alloc(size) {
            return addr as *mut GcCell;
        }
        // Perhaps the young gen was throttled by external memory; give the
        // allocation the full segment.
        self.young.segment.clear_external_memory_charge();
        if let Some(addr) = self.young.segment.bump_alloc(size) {
            return addr as *mut GcCell;
        }
        // A young collection fully empties the segment, so this size can
        // never be satisfied.
        oom(GcError::SuperSegmentAlloc(size));
    }

    // =========================================================================
    // Write barriers
    // =========================================================================

    #[inline]
    pub fn write_barrier_hv(&mut self, loc: *mut HermesValue, value: HermesValue) {
        if self.in_young_gen(loc as usize) {
            return;
        }
        self.write_barrier_hv_slow(loc, value);
    }

    fn write_barrier_hv_slow(&mut self, loc: *mut HermesValue, value: HermesValue) {
        if self.og_marking_barriers {
            self.snapshot_barrier_hv(unsafe { *loc });
        }
        if value.is_pointer() {
            self.relocation_write_barrier(loc as usize, value.get_pointer() as usize);
        }
    }

    #[inline]
    pub fn write_barrier_shv(
        &mut self,
        loc: *mut crate::value::SmallHermesValue,
        value: crate::value::SmallHermesValue,
    ) {
        if self.in_young_gen(loc as usize) {
            return;
        }
        if self.og_marking_barriers {
            let old = unsafe { *loc };
            if old.is_pointer() {
                let cell = old.get_pointer().get_non_null(&self.pb);
                self.snapshot_barrier_ptr(cell);
            } else if old.is_symbol() {
                self.write_barrier_symbols.set(old.get_symbol().index());
            }
        }
        if value.is_pointer() {
            let cell = value.get_pointer().get_non_null(&self.pb);
            self.relocation_write_barrier(loc as usize, cell as usize);
        }
    }

    #[inline]
    pub fn write_barrier_ptr(&mut self, loc: *const CompressedPointer, value: *mut GcCell) {
        if self.in_young_gen(loc as usize) {
            return;
        }
        let old = unsafe { *loc };
        if !old.is_null() && self.og_marking_barriers {
            let cell = old.get_non_null(&self.pb);
            self.snapshot_barrier_ptr(cell);
        }
        self.relocation_write_barrier(loc as usize, value as usize);
    }

    /// Constructor barriers skip the snapshot step: the previous slot
    /// contents were uninitialized.
    #[inline]
    pub fn constructor_write_barrier_ptr(
        &mut self,
        loc: *const CompressedPointer,
        value: *mut GcCell,
    ) {
        if self.in_young_gen(loc as usize) {
            return;
        }
        self.relocation_write_barrier(loc as usize, value as usize);
    }

    #[inline]
    pub fn constructor_write_barrier_hv(&mut self, loc: *mut HermesValue, value: HermesValue) {
        if self.in_young_gen(loc as usize) {
            return;
        }
        if value.is_pointer() {
            self.relocation_write_barrier(loc as usize, value.get_pointer() as usize);
        }
    }

    /// Range constructor barrier: dirty every card the range covers and
    /// let the next collection scan it, rather than tagging per slot.
    pub fn constructor_write_barrier_range(&mut self, start: *mut HermesValue, count: usize) {
        if count == 0 || self.in_young_gen(start as usize) {
            return;
        }
        let begin = start as usize;
        let end = begin + count * std::mem::size_of::<HermesValue>();
        unsafe {
            card_table::dirty_cards_for_range(segment::storage_start(begin), begin, end);
        }
    }

    /// Barrier for a slot inside a cell that spans storage units (a jumbo
    /// cell): masking the slot address cannot find the card table, so the
    /// owning cell is passed explicitly.
    pub fn write_barrier_hv_for_large_obj(
        &mut self,
        owning: *const GcCell,
        loc: *mut HermesValue,
        value: HermesValue,
    ) {
        // Jumbo cells are never in the young gen, so no fast exit.
        if self.og_marking_barriers {
            self.snapshot_barrier_hv(unsafe { *loc });
        }
        if value.is_pointer() {
            let value_addr = value.get_pointer() as usize;
            let owner_base = segment::storage_start(owning as usize);
            let value_base = segment::storage_start(value_addr);
            if value_base != owner_base
                && (value_base == self.young.base()
                    || value_base == self.shared.compactee_start.load(Ordering::Relaxed))
            {
                unsafe { card_table::dirty_card_for_address(owner_base, loc as usize) };
            }
        }
    }

    fn relocation_write_barrier(&mut self, loc: usize, value_addr: usize) {
        debug_assert!(!self.in_young_gen(loc));
        let loc_base = segment::storage_start(loc);
        let value_base = segment::storage_start(value_addr);
        // Pointers within one segment need no card: the segment is either
        // scanned in full (young, compactee) or not relocated at all.
        if loc_base == value_base {
            return;
        }
        if value_base == self.young.base()
            || value_base == self.shared.compactee_start.load(Ordering::Relaxed)
        {
            unsafe { card_table::dirty_card_for_address(loc_base, loc) };
        }
    }

    fn snapshot_barrier_hv(&mut self, old: HermesValue) {
        if old.is_pointer() {
            self.snapshot_barrier_ptr(old.get_pointer());
        } else if old.is_symbol() {
            self.write_barrier_symbols.set(old.get_symbol().index());
        }
    }

    fn snapshot_barrier_ptr(&mut self, old: *mut GcCell) {
        // Young cells are scanned wholesale every young collection; the
        // snapshot only needs old-gen pre-images.
        if !self.in_young_gen(old as usize) {
            self.barrier_enqueue(old);
        }
    }

    fn barrier_enqueue(&mut self, cell: *mut GcCell) {
        self.barrier_chunk.push(CellPtr(cell));
        if self.barrier_chunk.len() >= BARRIER_CHUNK_SIZE {
            self.flush_barrier_chunk();
        }
    }

    fn flush_barrier_chunk(&mut self) {
        self.shared.global_worklist.enqueue_chunk(&self.barrier_chunk);
        self.barrier_chunk.clear();
    }

    /// Read barrier for weak references: while the marker is active, a
    /// value observed through a weak reference must be treated as live.
    pub fn weak_ref_read_barrier(&mut self, value: *mut GcCell) {
        if self.og_marking_barriers {
            self.snapshot_barrier_ptr(value);
        }
    }

    // =========================================================================
    // Weak slots
    // =========================================================================

    /// Allocate a weak-ref slot pointing at `cell`. Starts `Marked` while
    /// a collection is marking, since the holder may already have been
    /// scanned.
    pub fn alloc_weak_slot(&mut self, cell: *mut GcCell) -> u32 {
        let cp = self.pb.compress(cell);
        let marking = self.og_marking_barriers;
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        guard.weak_slots.alloc(cp, marking)
    }

    /// Read a weak slot's referent, with the read barrier. `None` once the
    /// referent has been collected.
    pub fn read_weak_slot(&mut self, slot: u32) -> Option<*mut GcCell> {
        let cell = {
            let shared = Arc::clone(&self.shared);
            let guard = shared.pause_and_lock();
            let slot = guard.weak_slots.slot(slot);
            if slot.state() == WeakSlotState::Free || !slot.has_value() {
                None
            } else {
                Some(slot.value().get_non_null(&self.pb))
            }
        };
        if let Some(cell) = cell {
            self.weak_ref_read_barrier(cell);
        }
        cell
    }

    pub fn weak_slot_state(&self, slot: u32) -> WeakSlotState {
        self.shared.pause_and_lock().weak_slots.slot(slot).state()
    }

    // =========================================================================
    // External memory
    // =========================================================================

    /// Charge `size` bytes of external (malloc) memory to `cell`'s
    /// generation, shrinking the young gen's effective size to keep total
    /// memory pressure bounded.
    pub fn credit_external_memory(&mut self, cell: *const GcCell, size: usize) {
        if self.in_young_gen(cell as usize) {
            self.young.external_bytes += size;
            let adj = size.min(self.young.segment.available());
            let end = self.young.segment.effective_end() - adj;
            self.young.segment.set_effective_end(end);
        } else {
            let shared = Arc::clone(&self.shared);
            let mut guard = shared.pause_and_lock();
            guard.old_gen.credit_external_memory(size);
            let total = guard.old_gen.allocated_bytes() + guard.old_gen.external_bytes();
            if total > guard.old_gen.target_size_bytes() {
                let level = self.young.segment.level();
                self.young.segment.set_effective_end(level);
            }
        }
    }

    pub fn debit_external_memory(&mut self, cell: *const GcCell, size: usize) {
        if self.in_young_gen(cell as usize) {
            debug_assert!(self.young.external_bytes >= size);
            self.young.external_bytes -= size;
        } else {
            let shared = Arc::clone(&self.shared);
            let mut guard = shared.pause_and_lock();
            guard.old_gen.debit_external_memory(size);
        }
    }

    // =========================================================================
    // Collection entry points
    // =========================================================================

    /// Run a forced, complete collection: wait out any in-progress cycle,
    /// then drive a young and a full old collection (with compaction).
    pub fn collect(&mut self, rt: &mut dyn GcCallbacks, cause: &str) {
        {
            let shared = Arc::clone(&self.shared);
            let mut guard = shared.pause_and_lock();
            // A forced collection does a full sweep anyway; no reason to
            // keep promoting.
            self.promote_yg_to_og = false;
            self.wait_for_collection_to_finish(&mut guard, rt);
        }
        self.young_gen_collection(rt, cause, true);
        {
            let shared = Arc::clone(&self.shared);
            let mut guard = shared.pause_and_lock();
            self.wait_for_collection_to_finish(&mut guard, rt);
        }
        // A second young collection completes any pending compaction.
        self.young_gen_collection(rt, cause, false);
    }

    /// Run a single young collection (for tests and benchmarks).
    pub fn young_collection(&mut self, rt: &mut dyn GcCallbacks, cause: &str) {
        self.young_gen_collection(rt, cause, false);
    }

    /// Begin an old-gen collection immediately if none is in progress. It
    /// proceeds incrementally or in the background as configured.
    pub fn start_old_collection(&mut self, rt: &mut dyn GcCallbacks, cause: &str) {
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        let g: &mut OldState = &mut guard;
        if g.phase == Phase::None && !g.compactee.evac_active() {
            self.old_gen_collection(g, rt, cause, false);
        }
    }

    fn wait_for_collection_to_finish(&mut self, g: &mut OldState, rt: &mut dyn GcCallbacks) {
        while g.phase != Phase::None {
            self.incremental_collect(g, rt);
        }
    }

    /// In the promote-at-startup mode, this ends promotion and resumes
    /// normal young collections.
    pub fn tti_reached(&mut self) {
        self.promote_yg_to_og = false;
    }

    fn young_gen_collection(&mut self, rt: &mut dyn GcCallbacks, cause: &str, force_old: bool) {
        let start_time = Instant::now();
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        let g: &mut OldState = &mut guard;
        trace!("young collection start (cause: {cause})");
        debug_assert!(
            unsafe { mark_bits::all_marked(self.young.base()) },
            "young gen segment must have all mark bits set"
        );

        let mut stats = CollectionStats::new("young", cause);
        let heap_before = self.young.segment.used() as u64;
        let external_before = self.young.external_bytes as u64;
        stats.set_before(heap_before, external_before, g.old_gen.segment_footprint());
        self.total_allocated += heap_before;

        let do_compaction = g.compactee.evac_active();
        debug_assert!(
            !(do_compaction && self.og_marking_barriers),
            "evacuation never overlaps marking"
        );

        let promoted = self.promote_yg_to_og && self.promote_young_gen(g);
        if promoted {
            stats.add_tag("promotion");
        } else {
            let yg_base = self.young.base();
            let preparing_compaction = g.compactee.segment.is_some() && !do_compaction;

            // Capture scan extents up front; segments added by evacuation
            // hold only freshly copied (already scanned) cells.
            let mut extents: Vec<SegExtent> = (0..g.old_gen.num_segments())
                .map(|pos| {
                    let seg = g.old_gen.segment(pos);
                    SegExtent {
                        base: seg.base(),
                        scan_start: seg.start(),
                        scan_end: seg.level(),
                        n_cards: CARDS_PER_SEGMENT,
                        jumbo_cell: None,
                    }
                })
                .collect();
            for pos in 0..g.old_gen.num_jumbo_segments() {
                let seg = g.old_gen.jumbo_segment(pos);
                extents.push(SegExtent {
                    base: seg.base(),
                    scan_start: seg.cell() as usize,
                    scan_end: seg.cell() as usize + seg.cell_size(),
                    n_cards: seg.units() * CARDS_PER_SEGMENT,
                    jumbo_cell: Some(seg.cell()),
                });
            }
            if preparing_compaction {
                let seg = g.compactee.segment.as_ref().unwrap();
                extents.push(SegExtent {
                    base: seg.base(),
                    scan_start: seg.start(),
                    scan_end: seg.level(),
                    n_cards: CARDS_PER_SEGMENT,
                    jumbo_cell: None,
                });
            }

            let visit_unmarked = !(g.compactee.segment.is_some() && g.phase == Phase::Sweep);
            let evacuated;
            {
                let compactee_start = g.compactee.start;
                let compactee_evac = g.compactee.evac_start;
                let OldState {
                    old_gen,
                    id_tracker,
                    weak_slots,
                    ..
                } = &mut *g;
                let mut acceptor = EvacAcceptor::new(
                    old_gen,
                    id_tracker,
                    &self.pb,
                    yg_base,
                    compactee_start,
                    compactee_evac,
                );
                // Roots first; long-lived roots only matter when part of
                // the old gen is being evacuated.
                rt.mark_roots(&mut acceptor, do_compaction);
                unsafe {
                    scan_dirty_cards(
                        &mut acceptor,
                        &extents,
                        !preparing_compaction,
                        visit_unmarked,
                    )
                };
                // Chase the copy list: each evacuated cell's contents may
                // discover more young cells.
                while let Some(copy) = acceptor.pop_copy_list() {
                    unsafe {
                        debug_assert!((*copy).has_marked_forwarding_pointer());
                        let target = (*copy).marked_forwarding_pointer().get_non_null(&self.pb);
                        acceptor.scan_base = segment::storage_start(target as usize);
                        cell::mark_cell(target, &mut acceptor);
                    }
                }
                acceptor.scan_base = 0;
                // Weak roots last, once liveness (evacuation) is decided.
                rt.mark_weak_roots(&mut acceptor, do_compaction);
                weak_slots.for_each_live_payload(|payload| acceptor.accept_weak_root(payload));
                evacuated = acceptor.evacuated_bytes;
            }

            // Dead young cells: drop their ids and count them.
            let mut collected = 0u64;
            unsafe {
                self.young.segment.for_compacted_objs(&self.pb, |dead| {
                    g.id_tracker.untrack(dead as usize);
                    collected += 1;
                });
            }
            // Finalizers run exactly for young cells that did not move.
            for cell in self.young.finalizables.drain(..) {
                unsafe {
                    if !(*cell.0).has_marked_forwarding_pointer() {
                        cell::finalize_cell(cell.0);
                    }
                }
            }
            self.young.segment.reset_level();

            if do_compaction {
                stats.add_tag("compact");
                collected += self.finalize_compactee(g);
            }

            // External memory charges move with the survivors.
            g.old_gen.credit_external_memory(self.young.external_bytes);
            self.young.external_bytes = 0;
            self.young.segment.clear_external_memory_charge();

            let pause_ms = start_time.elapsed().as_secs_f64() * 1e3;
            if !do_compaction {
                self.young.update_size_factor(pause_ms);
                self.yg_average_survival.update(evacuated as f64);
            }
            self.young.apply_size_factor();

            stats.swept_bytes = heap_before.saturating_sub(evacuated);
            stats.swept_external_bytes = external_before;
            stats.collected_cells = collected;
            self.cum.collected_objects += collected;
        }
        debug_assert!(unsafe { mark_bits::all_marked(self.young.base()) });

        // Give an in-progress old collection its incremental slice before
        // possibly starting a new one.
        self.yield_to_old_gen(g, rt, start_time);

        if g.phase == Phase::None && !g.compactee.evac_active() {
            self.check_tripwire_and_submit(g);
            if force_old {
                self.old_gen_collection(g, rt, cause, true);
            } else {
                let total = g.old_gen.allocated_bytes() + g.old_gen.external_bytes();
                let target = g.old_gen.target_size_bytes().max(1);
                if total as f64 / target as f64 >= g.og_threshold.get() {
                    self.old_gen_collection(g, rt, "natural", false);
                }
            }
        }

        stats.set_end(g.old_gen.segment_footprint());
        self.cum.young_collections += 1;
        let event = stats.into_event();
        drop(guard);
        self.record_event(event);
    }

    /// Promote the whole young segment into the old gen without scanning.
    /// Returns false (and disables the mode) if no fresh segment can be
    /// mapped.
    fn promote_young_gen(&mut self, g: &mut OldState) -> bool {
        let new_seg = match g.old_gen.create_segment() {
            Ok(seg) => seg,
            Err(_) => {
                self.promote_yg_to_og = false;
                return false;
            }
        };
        g.old_gen.credit_external_memory(self.young.external_bytes);
        self.young.external_bytes = 0;
        // The old gen requires cell heads; the young gen skipped them at
        // allocation time.
        let base = self.young.base();
        unsafe {
            self.young.segment.for_each_cell(|cell| unsafe {
                card_table::update_boundaries(base, cell as usize, (*cell).allocated_size());
            });
        }
        let old_seg = self.young.replace_segment(new_seg);
        self.shared.yg_base.store(self.young.base(), Ordering::Relaxed);
        g.old_gen.add_segment(old_seg);
        g.old_gen.publish_segment_as("YG", self.young.base());
        true
    }

    /// Run finalizers for compactee cells that were not evacuated and
    /// release the segment. Returns the number of dead cells.
    fn finalize_compactee(&mut self, g: &mut OldState) -> u64 {
        let seg = g.compactee.segment.take().expect("no compactee to finalize");
        let mut pre_allocated = 0i64;
        let mut collected = 0u64;
        unsafe {
            let mut cur = seg.start();
            while cur < seg.level() {
                let cell_ptr = cur as *mut GcCell;
                let size = if (*cell_ptr).has_marked_forwarding_pointer() {
                    let target = (*cell_ptr).marked_forwarding_pointer().get_non_null(&self.pb);
                    let size = (*target).allocated_size();
                    pre_allocated += size as i64;
                    size
                } else {
                    let size = (*cell_ptr).allocated_size();
                    if (*cell_ptr).kind() != CellKind::Freelist {
                        cell::finalize_cell(cell_ptr);
                        g.id_tracker.untrack(cur);
                        pre_allocated += size as i64;
                        collected += 1;
                    }
                    size
                };
                cur += size;
            }
        }
        // Survivors were re-counted by the evacuating allocations; remove
        // everything the compactee held.
        g.old_gen.increment_allocated_bytes(-pre_allocated);
        g.old_gen.release_segment(seg);
        g.old_gen.remove_segment_extent("COMPACT");
        g.compactee = CompacteeState::empty();
        self.shared
            .compactee_start
            .store(INVALID_COMPACTEE, Ordering::Relaxed);
        self.shared
            .compactee_evac_start
            .store(INVALID_COMPACTEE, Ordering::Relaxed);
        self.cum.compactions += 1;
        collected
    }

    fn old_gen_collection(
        &mut self,
        g: &mut OldState,
        rt: &mut dyn GcCallbacks,
        cause: &str,
        force_compaction: bool,
    ) {
        debug_assert_eq!(g.phase, Phase::None, "starting a second old collection");
        debug!("old gen collection start (cause: {cause})");
        if self.config.revert_to_yg_at_tti {
            // The first real old collection means startup is over.
            self.promote_yg_to_og = false;
        }

        let mut stats = CollectionStats::new("old", cause);
        stats.set_before(
            g.old_gen.allocated_bytes(),
            g.old_gen.external_bytes(),
            g.old_gen.segment_footprint(),
        );
        g.og_stats = Some(stats);

        // Leftover mark state from previous collections or direct-to-OG
        // allocation is meaningless now.
        g.old_gen.clear_all_mark_bits();
        rt.unmark_symbols();

        let symbols_end = rt.symbols_end();
        g.mark = Some(MarkState::new(symbols_end));
        self.write_barrier_symbols = BitVector::new(symbols_end);

        // Roots are marked before any concurrent work so root marking is
        // atomic with respect to the mutator.
        {
            let yg_base = self.young.base();
            let compactee_start = g.compactee.start;
            let OldState {
                mark, weak_slots, ..
            } = &mut *g;
            let mut acceptor = MarkAcceptor::new(
                mark.as_mut().unwrap(),
                weak_slots,
                &self.pb,
                yg_base,
                compactee_start,
            );
            rt.mark_roots(&mut acceptor, true);
        }

        g.phase = Phase::Mark;
        // Barriers must be live before the compactee is chosen, so every
        // new pointer into it lands on a dirty card.
        self.og_marking_barriers = true;
        self.prepare_compactee(g, force_compaction);

        // Segments added after this point hold only freshly promoted,
        // fully marked cells; they need no sweeping.
        g.old_gen.initialize_sweep();

        if !self.concurrent {
            // Incremental mode: marking advances inside young collections,
            // paced to finish before the old gen fills.
            let rate = self.drain_rate(g);
            g.mark.as_mut().unwrap().byte_drain_rate = rate;
            return;
        }
        self.collect_og_in_background();
    }

    fn prepare_compactee(&mut self, g: &mut OldState, force: bool) {
        debug_assert!(g.compactee.is_empty(), "compaction already in progress");
        if self.promote_yg_to_og {
            return;
        }
        // Keep a buffer of a segment or 5% of the heap so compaction only
        // happens under real fragmentation pressure, and only with at
        // least two segments (the compactee is removed from the heap).
        let target = g.old_gen.target_size_bytes();
        let buffer = (target / 20).max(SEGMENT_SIZE as u64);
        let threshold = target + buffer;
        let total = g.old_gen.size() + g.old_gen.external_bytes();
        if (force || total > threshold) && g.old_gen.num_segments() > 1 {
            let seg = g.old_gen.pop_segment();
            g.compactee.start = seg.base();
            self.shared
                .compactee_start
                .store(seg.base(), Ordering::Relaxed);
            g.old_gen.publish_segment_as("COMPACT", seg.base());
            g.compactee.segment = Some(seg);
        }
    }

    /// One step of the in-progress old collection, on the mutator.
    fn incremental_collect(&mut self, g: &mut OldState, rt: &mut dyn GcCallbacks) {
        match g.phase {
            Phase::None => {}
            Phase::Mark => {
                let limit = if self.concurrent {
                    CONCURRENT_MARK_LIMIT
                } else {
                    g.mark.as_ref().map_or(BYTE_DRAIN_RATE_MIN, |m| m.byte_drain_rate)
                };
                let yg_base = self.young.base();
                if !drain_some_work(g, &self.pb, &self.shared.global_worklist, yg_base, limit) {
                    g.phase = Phase::CompleteMarking;
                }
            }
            Phase::CompleteMarking => {
                self.complete_marking(g, rt);
                g.phase = Phase::Sweep;
            }
            Phase::Sweep => {
                if !g.sweep_next(false) {
                    if let Some(stats) = g.og_stats.as_mut() {
                        stats.set_end(g.old_gen.segment_footprint());
                    }
                    g.phase = Phase::None;
                    self.check_tripwire_and_submit(g);
                }
            }
        }
    }

    /// The stop-the-world tail of marking: final drain, weak structure
    /// updates, symbol reclamation, and arming the compactee.
    fn complete_marking(&mut self, g: &mut OldState, rt: &mut dyn GcCallbacks) {
        trace!("complete marking");
        // Use only the concurrently marked bytes for the threshold tuning.
        self.update_old_gen_threshold(g);
        self.og_marking_barriers = false;
        self.flush_barrier_chunk();

        let yg_base = self.young.base();
        {
            // Remark roots that changed without barriers (caches refreshed
            // since barrier-start).
            let compactee_start = g.compactee.start;
            let OldState {
                mark, weak_slots, ..
            } = &mut *g;
            let mut acceptor = MarkAcceptor::new(
                mark.as_mut().unwrap(),
                weak_slots,
                &self.pb,
                yg_base,
                compactee_start,
            );
            rt.mark_roots_for_complete_marking(&mut acceptor);
        }
        drain_some_work(g, &self.pb, &self.shared.global_worklist, yg_base, usize::MAX);
        debug_assert!(!self.shared.global_worklist.has_pending_work());

        weakmap_marking::complete_weak_map_marking(g, &self.pb, &self.shared.global_worklist, yg_base);

        // Arm the compactee: the next young collection evacuates it.
        g.compactee.evac_start = g.compactee.start;
        self.shared
            .compactee_evac_start
            .store(g.compactee.start, Ordering::Relaxed);

        // Weak roots can only be cleared now that liveness is final.
        {
            let mut clear = ClearWeakRootsAcceptor { pb: &self.pb };
            rt.mark_weak_roots(&mut clear, true);
            g.weak_slots
                .for_each_live_payload(|payload| clear.accept_weak_root(payload));
        }

        // Symbols live if either the marker or a barrier saw them.
        {
            let state = g.mark.as_mut().unwrap();
            state.marked_symbols.union_with(&self.write_barrier_symbols);
            rt.free_symbols(&state.marked_symbols);
        }
        g.weak_slots.update_for_collection();
        g.mark = None;
    }

    /// Estimate how early collections must start from the measured
    /// concurrent mark rate, solving MarkRate = T / (1 - T) for the
    /// threshold T. Clamped so a full heap cannot ratchet the threshold
    /// toward never collecting.
    fn update_old_gen_threshold(&mut self, g: &mut OldState) {
        if !self.concurrent {
            return;
        }
        let (Some(state), Some(stats)) = (g.mark.as_ref(), g.og_stats.as_ref()) else {
            return;
        };
        let marked = state.marked_bytes as f64;
        let pre = stats.before_allocated as f64;
        let post = g.old_gen.allocated_bytes() as f64;
        debug_assert!(post >= pre, "cannot free memory during marking");
        let mark_rate = marked / (post - pre).max(1.0);
        let clamped = mark_rate.min(20.0);
        g.og_threshold.update(clamped / (clamped + 1.0));
    }

    /// Bytes to mark per young collection so an incremental collection
    /// finishes before the old gen reaches its target size.
    fn drain_rate(&self, g: &OldState) -> usize {
        debug_assert!(!self.concurrent);
        let total = g.old_gen.allocated_bytes() + g.old_gen.external_bytes();
        let bytes_to_fill = g.old_gen.target_size_bytes().max(total + 1) - total;
        let pre = g.og_stats.as_ref().map_or(0, |s| s.before_allocated);
        let marked = g.mark.as_ref().map_or(0, |m| m.marked_bytes);
        let bytes_to_mark = pre.saturating_sub(marked);
        let rate =
            (bytes_to_mark as f64 * self.yg_average_survival.get() / bytes_to_fill as f64) as usize;
        rate.max(BYTE_DRAIN_RATE_MIN)
    }

    /// Let the old collection make progress during this young pause: in
    /// incremental mode, run drain/sweep steps up to half the pause
    /// budget; in concurrent mode, perform the complete-marking pause and
    /// restart the background thread for sweeping.
    fn yield_to_old_gen(&mut self, g: &mut OldState, rt: &mut dyn GcCallbacks, yg_start: Instant) {
        if !self.concurrent && g.phase != Phase::None {
            if g.phase == Phase::Mark {
                let rate = self.drain_rate(g);
                g.mark.as_mut().unwrap().byte_drain_rate = rate;
            }
            let initial = g.phase;
            let budget_ms = young::TARGET_MAX_PAUSE_MS / 2.0;
            loop {
                self.incremental_collect(g, rt);
                if g.phase != initial
                    || yg_start.elapsed().as_secs_f64() * 1e3 >= budget_ms
                {
                    break;
                }
            }
        } else if g.phase == Phase::CompleteMarking {
            self.incremental_collect(g, rt);
            self.collect_og_in_background();
        }
    }

    /// Schedule marking/sweeping steps on the background thread. The
    /// thread exits at complete marking (which needs the mutator) and when
    /// the collection finishes.
    fn collect_og_in_background(&mut self) {
        let Some(executor) = self.executor.as_ref() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let pb = Arc::clone(&self.pb);
        executor.add(move || {
            let mut guard = shared.state.lock();
            loop {
                // Yield the mutex whenever the mutator asks for it.
                while shared.og_paused.load(Ordering::Relaxed) {
                    shared.pause_cv.wait(&mut guard);
                }
                if !background_step(&mut guard, &pb, &shared) {
                    break;
                }
            }
        });
    }

    fn check_tripwire_and_submit(&mut self, g: &mut OldState) {
        debug_assert_eq!(g.phase, Phase::None);
        let Some(stats) = g.og_stats.take() else {
            return;
        };
        self.cum.old_collections += 1;
        self.cum.collected_objects += stats.collected_cells;
        let used = g.old_gen.allocated_bytes() + g.old_gen.external_bytes();
        if let Some(limit) = self.config.tripwire_limit {
            if used > limit as u64 {
                if !self.tripwire_fired {
                    self.tripwire_fired = true;
                    let ctx = TripwireContext {
                        used_bytes: used as usize,
                        limit,
                    };
                    if let Some(cb) = self.tripwire.as_mut() {
                        if let Err(err) = cb(&ctx) {
                            warn!("tripwire callback failed: {err:#}");
                        }
                    }
                }
            } else {
                self.tripwire_fired = false;
            }
        }
        let event = stats.into_event();
        self.record_event(event);
    }

    fn record_event(&mut self, event: GcAnalyticsEvent) {
        info!(
            "{} collection ({}) finished in {:.2}ms, swept {} bytes, {} cells",
            event.kind, event.cause, event.duration_ms, event.swept_bytes, event.collected_cells
        );
        if let Some(cb) = self.analytics.as_mut() {
            cb(&event);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn heap_info(&self) -> HeapInfo {
        let guard = self.shared.pause_and_lock();
        HeapInfo {
            allocated_bytes: self.young.segment.used() as u64 + guard.old_gen.allocated_bytes(),
            heap_size: guard.old_gen.segment_footprint(),
            external_bytes: self.young.external_bytes as u64 + guard.old_gen.external_bytes(),
            total_allocated_bytes: self.total_allocated,
            num_young_collections: self.cum.young_collections,
            num_old_collections: self.cum.old_collections,
            num_compactions: self.cum.compactions,
            num_collected_objects: self.cum.collected_objects,
            num_large_allocations: guard.old_gen.num_large_allocations(),
            malloc_size: 0,
        }
    }

    pub fn heap_info_with_malloc_size(&self, rt: &dyn GcCallbacks) -> HeapInfo {
        let mut info = self.heap_info();
        info.malloc_size = rt.malloc_size() as u64;
        info
    }

    /// Publish heap numbers to the crash manager.
    pub fn crash_manager_heap_info(&self) {
        let info = self.heap_info();
        self.crash_mgr
            .set_custom_data("HermesGC:AllocatedBytes", &info.allocated_bytes.to_string());
        self.crash_mgr
            .set_custom_data("HermesGC:HeapSize", &info.heap_size.to_string());
    }

    /// Emit cumulative statistics as JSON.
    pub fn print_stats(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        let info = self.heap_info();
        let json = serde_json::json!({
            "type": "hades",
            "heapInfo": {
                "allocatedBytes": info.allocated_bytes,
                "heapSize": info.heap_size,
                "externalBytes": info.external_bytes,
                "totalAllocatedBytes": info.total_allocated_bytes,
            },
            "collections": {
                "young": info.num_young_collections,
                "old": info.num_old_collections,
                "compactions": info.num_compactions,
                "collectedObjects": info.num_collected_objects,
            },
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&json).unwrap())
    }

    /// Stable id for `cell`; survives evacuation and compaction.
    pub fn object_id(&mut self, cell: *const GcCell) -> u64 {
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        guard.id_tracker.object_id(cell as usize)
    }

    /// The cell currently carrying `id`, if it is still alive.
    pub fn object_for_id(&self, id: u64) -> Option<*mut GcCell> {
        let guard = self.shared.pause_and_lock();
        guard.id_tracker.object_for_id(id).map(|addr| addr as *mut GcCell)
    }

    /// Assert the freelist invariants (testing aid).
    pub fn verify_freelists(&self) {
        let guard = self.shared.pause_and_lock();
        guard.old_gen.verify_freelists();
    }

    /// Run every finalizer in the heap and stop any collection. Used at
    /// shutdown.
    fn finalize_all(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut guard = shared.pause_and_lock();
        let g: &mut OldState = &mut guard;
        g.phase = Phase::None;
        g.mark = None;

        for cell in self.young.finalizables.drain(..) {
            unsafe {
                if !(*cell.0).has_marked_forwarding_pointer() {
                    cell::finalize_cell(cell.0);
                }
            }
        }
        if let Some(seg) = g.compactee.segment.as_ref() {
            unsafe {
                seg.for_compacted_objs(&self.pb, |cell| unsafe { cell::finalize_cell(cell) });
            }
        }
        for pos in 0..g.old_gen.num_segments() {
            unsafe {
                g.old_gen
                    .segment(pos)
                    .for_each_cell(|cell| unsafe { cell::finalize_cell(cell) });
            }
        }
        for pos in 0..g.old_gen.num_jumbo_segments() {
            unsafe {
                cell::finalize_cell(g.old_gen.jumbo_segment(pos).cell());
            }
        }
    }
}

impl Drop for HadesGc {
    fn drop(&mut self) {
        self.finalize_all();
        // Joins the background thread; with the phase cleared it exits
        // promptly.
        self.executor.take();
    }
}
