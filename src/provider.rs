//! Host-heap page provider.
//!
//! Maps the [`PageProvider`] contract onto the global heap so the allocator
//! can run inside ordinary tests and benchmarks. Every block is allocated
//! with at least [`SLAB_BYTES`] alignment, which is what makes slab recovery
//! by masking valid.

#[cfg(feature = "log")]
use log::warn;

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::vec::Vec;
use core::alloc::Layout;

use crate::stats::ProviderStats;
use crate::{AllocError, AllocResult, PageProvider, PAGE_SIZE, SLAB_BYTES};

/// [`PageProvider`] backed by the host heap.
///
/// Keeps a ledger of live blocks so releases can reconstruct the layout they
/// were allocated with, and counts traffic for telemetry. Fresh blocks are
/// zero-filled, matching what a kernel page pool would hand out.
pub struct HostPageProvider {
    live: Vec<(usize, Layout)>,
    stats: ProviderStats,
}

impl HostPageProvider {
    pub const fn new() -> Self {
        Self {
            live: Vec::new(),
            stats: ProviderStats::new(),
        }
    }

    /// Traffic counters since construction.
    pub fn stats(&self) -> ProviderStats {
        self.stats
    }
}

impl PageProvider for HostPageProvider {
    fn alloc_pages(&mut self, num_pages: usize, alignment: usize) -> AllocResult<usize> {
        if num_pages == 0 || !alignment.is_power_of_two() {
            return Err(AllocError::InvalidParam);
        }

        let bytes = num_pages * PAGE_SIZE;
        let layout = Layout::from_size_align(bytes, alignment.max(SLAB_BYTES))
            .map_err(|_| AllocError::InvalidParam)?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(AllocError::NoMemory);
        }

        self.live.push((ptr as usize, layout));
        self.stats.current_pages += num_pages;
        self.stats.total_pages += num_pages;
        self.stats.alloc_calls += 1;
        Ok(ptr as usize)
    }

    fn dealloc_pages(&mut self, pos: usize, num_pages: usize) {
        let Some(idx) = self.live.iter().position(|&(addr, _)| addr == pos) else {
            warn!(
                "page provider: release of untracked block {:#x} ({} pages)",
                pos, num_pages
            );
            return;
        };

        let (_, layout) = self.live.swap_remove(idx);
        debug_assert_eq!(
            layout.size(),
            num_pages * PAGE_SIZE,
            "block at {:#x} released with a different page count than it was allocated with",
            pos
        );

        // SAFETY: pos/layout come straight from the ledger entry recorded at
        // allocation time.
        unsafe { dealloc(pos as *mut u8, layout) };

        self.stats.current_pages = self.stats.current_pages.saturating_sub(num_pages);
        self.stats.free_calls += 1;
    }
}

impl Default for HostPageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostPageProvider {
    fn drop(&mut self) {
        // Return anything still tracked to the host heap.
        for &(addr, layout) in &self.live {
            // SAFETY: ledger entries are live blocks from alloc_pages.
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}
