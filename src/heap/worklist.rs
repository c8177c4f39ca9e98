//! Mark Worklist - Barrier-to-Marker Handoff
//!
//! Write barriers run on the mutator and publish snapshot pre-images to
//! the marker through this worklist. The mutator batches pushes into a
//! fixed-size local chunk (owned by the GC handle, no lock needed) and
//! flushes full chunks into the mutex-protected global list, which the
//! marker drains in O(1) swaps.

use parking_lot::Mutex;

use crate::cell::GcCell;

/// A heap cell pointer that may cross the mutator/collector boundary.
/// Safe to send because cells are only dereferenced under the GC mutex or
/// with the world stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPtr(pub *mut GcCell);

unsafe impl Send for CellPtr {}

/// Size of the mutator's local push chunk.
pub const BARRIER_CHUNK_SIZE: usize = 128;

/// The mutex-protected global worklist.
#[derive(Default)]
pub struct MarkWorklist {
    worklist: Mutex<Vec<CellPtr>>,
}

impl MarkWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a batch of cells. Called by the mutator when its push chunk
    /// fills up, and once more at the start of complete marking.
    pub fn enqueue_chunk(&self, cells: &[CellPtr]) {
        if cells.is_empty() {
            return;
        }
        self.worklist.lock().extend_from_slice(cells);
    }

    /// Take everything currently in the list. The swap keeps the critical
    /// section short so the mutator's barriers are never blocked for long.
    pub fn drain(&self) -> Vec<CellPtr> {
        let mut guard = self.worklist.lock();
        std::mem::take(&mut *guard)
    }

    /// Whether any flushed work is pending. The mutator's push chunk is
    /// not visible here.
    pub fn has_pending_work(&self) -> bool {
        !self.worklist.lock().is_empty()
    }
}
