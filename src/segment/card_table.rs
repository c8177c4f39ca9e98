//! Card Table and Cell-Head Table
//!
//! Each segment's metadata block carries one dirty byte and one boundary
//! byte per 512-byte card. Write barriers dirty cards; young collections
//! scan maximal dirty runs and use the boundary bytes to find the first
//! cell overlapping a run.
//!
//! Boundary encoding, per card:
//! - `e >= 0`: the cell covering this card's start begins `e` alignment
//!   units before the card boundary.
//! - `e < 0`: the head is further back; continue the search `-e` cards
//!   earlier. Entries written for a single large cell chain back to its
//!   head in a bounded number of hops.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::segment::{CARD_SIZE, CARD_TABLE_OFFSET, BOUNDARIES_OFFSET, LOG_CARD_SIZE};
use crate::util::LOG_HEAP_ALIGN;

/// Index of the card covering `addr` within the segment at `base`.
#[inline]
pub fn card_index(base: usize, addr: usize) -> usize {
    (addr - base) >> LOG_CARD_SIZE
}

/// Address of card `idx`'s first byte.
#[inline]
pub fn card_boundary(base: usize, idx: usize) -> usize {
    base + (idx << LOG_CARD_SIZE)
}

#[inline]
unsafe fn card_byte(base: usize, idx: usize) -> *const AtomicU8 {
    (base + CARD_TABLE_OFFSET + idx) as *const AtomicU8
}

#[inline]
unsafe fn boundary_byte(base: usize, idx: usize) -> *mut i8 {
    (base + BOUNDARIES_OFFSET + idx) as *mut i8
}

/// Dirty the card covering `addr`.
///
/// # Safety
/// `base` must be the base of a live segment whose card table covers
/// `addr`.
#[inline]
pub unsafe fn dirty_card_for_address(base: usize, addr: usize) {
    (*card_byte(base, card_index(base, addr))).store(1, Ordering::Relaxed);
}

/// Dirty every card overlapping `[from, to)`.
pub unsafe fn dirty_cards_for_range(base: usize, from: usize, to: usize) {
    debug_assert!(from < to);
    let first = card_index(base, from);
    let last = card_index(base, to - 1);
    for idx in first..=last {
        (*card_byte(base, idx)).store(1, Ordering::Relaxed);
    }
}

#[inline]
pub unsafe fn is_card_dirty(base: usize, idx: usize) -> bool {
    (*card_byte(base, idx)).load(Ordering::Relaxed) != 0
}

#[inline]
pub unsafe fn is_card_for_address_dirty(base: usize, addr: usize) -> bool {
    is_card_dirty(base, card_index(base, addr))
}

/// First dirty card index in `[from, to)`, if any.
pub unsafe fn find_next_dirty_card(base: usize, from: usize, to: usize) -> Option<usize> {
    (from..to).find(|&idx| is_card_dirty(base, idx))
}

/// First clean card index in `[from, to)`, if any.
pub unsafe fn find_next_clean_card(base: usize, from: usize, to: usize) -> Option<usize> {
    (from..to).find(|&idx| !is_card_dirty(base, idx))
}

/// Clear the first `n_cards` dirty bytes of the segment.
pub unsafe fn clear_cards(base: usize, n_cards: usize) {
    for idx in 0..n_cards {
        (*card_byte(base, idx)).store(0, Ordering::Relaxed);
    }
}

/// Record the cell `[cell_addr, cell_addr + size)` in the cell-head table:
/// every card boundary the cell covers learns how to find the cell's head.
///
/// # Safety
/// `base` must be the base of the live segment containing the cell.
pub unsafe fn update_boundaries(base: usize, cell_addr: usize, size: usize) {
    let end = cell_addr + size;
    let mut idx = card_index(base, cell_addr);
    if card_boundary(base, idx) != cell_addr {
        idx += 1;
    }
    loop {
        let boundary = card_boundary(base, idx);
        if boundary >= end {
            break;
        }
        let back_bytes = boundary - cell_addr;
        let back_aligns = back_bytes >> LOG_HEAP_ALIGN;
        let entry: i8 = if back_aligns <= i8::MAX as usize {
            back_aligns as i8
        } else {
            let back_cards = (back_bytes >> LOG_CARD_SIZE).min(128);
            (-(back_cards as i16)) as i8
        };
        *boundary_byte(base, idx) = entry;
        idx += 1;
    }
}

/// Find the address of the first cell head at or before card `idx`'s
/// boundary, i.e. the head of the cell covering that boundary.
///
/// # Safety
/// The boundary entries for `idx` and everything it chains through must
/// have been written by `update_boundaries`.
pub unsafe fn first_cell_head(base: usize, mut idx: usize) -> usize {
    loop {
        let entry = *boundary_byte(base, idx);
        if entry >= 0 {
            return card_boundary(base, idx) - ((entry as usize) << LOG_HEAP_ALIGN);
        }
        idx -= (-(entry as i16)) as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{FixedSizeSegment, ALLOC_START_OFFSET, SEGMENT_SIZE};
    use crate::storage::{StorageProvider, VmStorageProvider};

    fn make_segment() -> FixedSizeSegment {
        let mut provider = VmStorageProvider::new();
        FixedSizeSegment::new(provider.create("card-test", SEGMENT_SIZE).unwrap(), 1)
    }

    #[test]
    fn test_dirty_and_scan() {
        let seg = make_segment();
        let base = seg.base();
        let start = seg.start();
        unsafe {
            let from = card_index(base, start);
            let to = crate::segment::CARDS_PER_SEGMENT;
            assert_eq!(find_next_dirty_card(base, from, to), None);

            dirty_card_for_address(base, start + 5000);
            dirty_card_for_address(base, start + 5100);
            dirty_card_for_address(base, start + 9000);

            let first = find_next_dirty_card(base, from, to).unwrap();
            assert_eq!(first, card_index(base, start + 5000));
            // 5000 and 5100 land on the same card; the run is one card.
            let end = find_next_clean_card(base, first, to).unwrap();
            assert_eq!(end, first + 1);

            clear_cards(base, to);
            assert_eq!(find_next_dirty_card(base, from, to), None);
        }
    }

    #[test]
    fn test_dirty_range_covers_all_cards() {
        let seg = make_segment();
        let base = seg.base();
        let start = seg.start();
        unsafe {
            dirty_cards_for_range(base, start + 100, start + 100 + 4 * CARD_SIZE);
            let from = card_index(base, start);
            let first = find_next_dirty_card(base, from, crate::segment::CARDS_PER_SEGMENT);
            assert_eq!(first, Some(card_index(base, start + 100)));
            let clean =
                find_next_clean_card(base, first.unwrap(), crate::segment::CARDS_PER_SEGMENT)
                    .unwrap();
            assert_eq!(clean, card_index(base, start + 100 + 4 * CARD_SIZE) + 1);
        }
    }

    #[test]
    fn test_boundaries_small_cells() {
        let seg = make_segment();
        let base = seg.base();
        let start = seg.start();
        assert_eq!(ALLOC_START_OFFSET % CARD_SIZE, 0);
        unsafe {
            // A run of 48-byte cells crossing a few card boundaries.
            let mut addr = start;
            while addr < start + 4 * CARD_SIZE {
                update_boundaries(base, addr, 48);
                addr += 48;
            }
            // Every card boundary resolves to a cell head at or before it,
            // within one cell's distance.
            for idx in card_index(base, start)..card_index(base, start + 4 * CARD_SIZE) {
                let head = first_cell_head(base, idx);
                let boundary = card_boundary(base, idx);
                assert!(head <= boundary);
                assert!(boundary - head < 48);
                assert_eq!((head - start) % 48, 0);
            }
        }
    }

    #[test]
    fn test_boundaries_large_cell() {
        let seg = make_segment();
        let base = seg.base();
        let start = seg.start();
        unsafe {
            // One cell spanning many cards.
            let size = 200 * CARD_SIZE + 64;
            update_boundaries(base, start + 16, size);
            for idx in card_index(base, start) + 1..card_index(base, start + 16 + size) {
                assert_eq!(first_cell_head(base, idx), start + 16);
            }
        }
    }
}
