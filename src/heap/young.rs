//! Young Generation - Bump-Pointer Nursery
//!
//! Exactly one segment, owned by the mutator. Allocation is a bump; every
//! young collection evacuates all live cells to the old generation and
//! resets the level. The effective size is scaled between 25% and 100% of
//! the segment based on recent collection pause times, and shrunk further
//! under external-memory pressure.

use crate::heap::worklist::CellPtr;
use crate::segment::{FixedSizeSegment, MAX_NORMAL_ALLOC_SIZE};

/// Pause-time budget one young collection is measured against, in
/// milliseconds.
pub const TARGET_MAX_PAUSE_MS: f64 = 50.0;

/// Initial fraction of the segment used for young allocation.
pub const YG_INITIAL_SIZE_FACTOR: f64 = 0.5;

pub struct YoungGen {
    pub segment: FixedSizeSegment,
    /// Young cells with finalizers; run exactly for the ones that die
    /// without being promoted.
    pub finalizables: Vec<CellPtr>,
    /// External memory charged against the young gen.
    pub external_bytes: usize,
    /// Fraction of the segment the young gen may use.
    pub size_factor: f64,
}

impl YoungGen {
    pub fn new(segment: FixedSizeSegment) -> Self {
        let mut yg = YoungGen {
            segment,
            finalizables: Vec::new(),
            external_bytes: 0,
            size_factor: YG_INITIAL_SIZE_FACTOR,
        };
        yg.apply_size_factor();
        yg
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.segment.base()
    }

    /// Apply the current size factor as the segment's effective end.
    pub fn apply_size_factor(&mut self) {
        let budget = (self.size_factor * MAX_NORMAL_ALLOC_SIZE as f64) as usize;
        let end = (self.segment.start() + budget)
            .clamp(self.segment.level(), self.segment.end());
        self.segment.set_effective_end(end);
    }

    /// Scale the young gen for the next cycle based on the last pause:
    /// under 20% of the budget grows it 10%, over 40% shrinks it 10%,
    /// clamped to [0.25, 1.0].
    pub fn update_size_factor(&mut self, pause_ms: f64) {
        debug_assert!((0.25..=1.0).contains(&self.size_factor));
        if pause_ms < TARGET_MAX_PAUSE_MS * 0.2 {
            self.size_factor = (self.size_factor * 1.1).min(1.0);
        } else if pause_ms > TARGET_MAX_PAUSE_MS * 0.4 {
            self.size_factor = (self.size_factor * 0.9).max(0.25);
        }
    }

    /// Swap in a fresh segment (used by the promote-at-startup mode) and
    /// return the old one.
    pub fn replace_segment(&mut self, segment: FixedSizeSegment) -> FixedSizeSegment {
        self.finalizables.clear();
        let old = std::mem::replace(&mut self.segment, segment);
        self.apply_size_factor();
        old
    }
}
