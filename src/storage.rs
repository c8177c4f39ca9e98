//! Storage Provider - Segment-Aligned Virtual Memory
//!
//! Supplies the contiguous, segment-aligned regions that back heap
//! segments. The built-in provider maps anonymous memory with `memmap2`,
//! over-mapping by one segment so an aligned base can always be carved out
//! of the mapping.

use std::io;

use memmap2::MmapMut;

use crate::segment::SEGMENT_SIZE;

/// A contiguous, segment-aligned region of zeroed memory. Dropping the
/// storage unmaps it.
pub struct Storage {
    // Held only to keep the mapping alive.
    _map: MmapMut,
    base: usize,
    size: usize,
}

impl Storage {
    /// Aligned base address of the usable region.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Usable size in bytes (a multiple of the segment size).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Source of segment storage. The GC asks for multiples of the unit
/// segment size; jumbo segments request several units at once.
pub trait StorageProvider: Send {
    /// Map a zeroed region of exactly `size` bytes aligned to the segment
    /// size. `name` is advisory, used for region naming where the platform
    /// supports it.
    fn create(&mut self, name: &str, size: usize) -> io::Result<Storage>;

    /// Attach a name to the region for debuggers / smaps. Optional.
    fn name_region(&self, _storage: &Storage, _name: &str) {}
}

/// Default provider backed by anonymous mappings.
pub struct VmStorageProvider;

impl VmStorageProvider {
    pub fn new() -> Self {
        debug_assert_eq!(
            SEGMENT_SIZE % page_size::get(),
            0,
            "segment size must be a multiple of the page size"
        );
        VmStorageProvider
    }
}

impl Default for VmStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageProvider for VmStorageProvider {
    fn create(&mut self, name: &str, size: usize) -> io::Result<Storage> {
        debug_assert_eq!(size % SEGMENT_SIZE, 0);
        // Over-map by one segment so an aligned base always exists inside
        // the mapping, wherever the kernel placed it.
        let map = MmapMut::map_anon(size + SEGMENT_SIZE)?;
        let raw = map.as_ptr() as usize;
        let base = (raw + SEGMENT_SIZE - 1) & !(SEGMENT_SIZE - 1);
        let storage = Storage {
            _map: map,
            base,
            size,
        };
        self.name_region(&storage, name);
        Ok(storage)
    }

    #[cfg(target_os = "linux")]
    fn name_region(&self, storage: &Storage, name: &str) {
        // PR_SET_VMA / PR_SET_VMA_ANON_NAME; ignored on kernels without
        // CONFIG_ANON_VMA_NAME.
        const PR_SET_VMA: libc::c_int = 0x53564d41;
        const PR_SET_VMA_ANON_NAME: libc::c_ulong = 0;
        if let Ok(cname) = std::ffi::CString::new(name) {
            unsafe {
                libc::prctl(
                    PR_SET_VMA,
                    PR_SET_VMA_ANON_NAME,
                    storage.base as libc::c_ulong,
                    storage.size as libc::c_ulong,
                    cname.as_ptr() as libc::c_ulong,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_aligned_storage() {
        let mut provider = VmStorageProvider::new();
        let storage = provider.create("test-segment", SEGMENT_SIZE).unwrap();
        assert_eq!(storage.base() % SEGMENT_SIZE, 0);
        assert_eq!(storage.size(), SEGMENT_SIZE);
        // The region must be usable.
        unsafe {
            let ptr = storage.base() as *mut u64;
            ptr.write(0xDEAD_BEEF);
            assert_eq!(ptr.read(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn test_create_multi_unit_storage() {
        let mut provider = VmStorageProvider::new();
        let storage = provider.create("test-jumbo", 3 * SEGMENT_SIZE).unwrap();
        assert_eq!(storage.base() % SEGMENT_SIZE, 0);
        assert_eq!(storage.size(), 3 * SEGMENT_SIZE);
    }
}
