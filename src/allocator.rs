//! Size-class dispatcher.
//!
//! Routes arbitrary-sized requests to one of nine slab caches (8 to 2048
//! bytes, doubling) or to the large-object path. The untagged `free`
//! discriminates large blocks by the header magic just below the pointer and
//! recovers slab objects through their owning cache.

#[cfg(feature = "log")]
use log::warn;

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::large;
use crate::provider::HostPageProvider;
use crate::slab::{slab_of, SlubCache};
use crate::stats::{CacheStats, SlubStats};
use crate::{AllocResult, PageProvider, PAGES_PER_SLAB};

/// Size classes for slab allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SizeClass {
    Bytes8 = 8,
    Bytes16 = 16,
    Bytes32 = 32,
    Bytes64 = 64,
    Bytes128 = 128,
    Bytes256 = 256,
    Bytes512 = 512,
    Bytes1024 = 1024,
    Bytes2048 = 2048,
}

impl SizeClass {
    pub const COUNT: usize = 9;

    /// Largest request the slab caches serve; anything above takes the
    /// large path.
    pub const MAX_OBJ_SIZE: usize = 2048;

    /// Select the smallest class covering `n` bytes.
    ///
    /// Requests below the minimum class round up to it; `None` routes the
    /// request to the large path.
    pub fn from_size(n: usize) -> Option<Self> {
        Some(match n {
            0..=8 => SizeClass::Bytes8,
            9..=16 => SizeClass::Bytes16,
            17..=32 => SizeClass::Bytes32,
            33..=64 => SizeClass::Bytes64,
            65..=128 => SizeClass::Bytes128,
            129..=256 => SizeClass::Bytes256,
            257..=512 => SizeClass::Bytes512,
            513..=1024 => SizeClass::Bytes1024,
            1025..=2048 => SizeClass::Bytes2048,
            _ => return None,
        })
    }

    pub fn size(&self) -> usize {
        *self as usize
    }

    pub fn to_index(&self) -> usize {
        match self {
            SizeClass::Bytes8 => 0,
            SizeClass::Bytes16 => 1,
            SizeClass::Bytes32 => 2,
            SizeClass::Bytes64 => 3,
            SizeClass::Bytes128 => 4,
            SizeClass::Bytes256 => 5,
            SizeClass::Bytes512 => 6,
            SizeClass::Bytes1024 => 7,
            SizeClass::Bytes2048 => 8,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SizeClass::Bytes8),
            1 => Some(SizeClass::Bytes16),
            2 => Some(SizeClass::Bytes32),
            3 => Some(SizeClass::Bytes64),
            4 => Some(SizeClass::Bytes128),
            5 => Some(SizeClass::Bytes256),
            6 => Some(SizeClass::Bytes512),
            7 => Some(SizeClass::Bytes1024),
            8 => Some(SizeClass::Bytes2048),
            _ => None,
        }
    }
}

/// Untyped allocator front end: nine slab caches plus the large path.
///
/// Caches are boxed so the slab headers' owner back-pointers stay valid when
/// the allocator itself moves. Dropping the allocator returns every slab to
/// the provider; outstanding pointers are invalidated.
pub struct SlubAllocator<P: PageProvider = HostPageProvider> {
    caches: [Box<SlubCache>; SizeClass::COUNT],
    provider: P,
}

impl SlubAllocator<HostPageProvider> {
    pub fn new() -> Self {
        Self::with_provider(HostPageProvider::new())
    }
}

impl Default for SlubAllocator<HostPageProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProvider> SlubAllocator<P> {
    /// Build the dispatcher on top of an explicit page provider.
    pub fn with_provider(provider: P) -> Self {
        Self {
            caches: [
                Self::class_cache(SizeClass::Bytes8),
                Self::class_cache(SizeClass::Bytes16),
                Self::class_cache(SizeClass::Bytes32),
                Self::class_cache(SizeClass::Bytes64),
                Self::class_cache(SizeClass::Bytes128),
                Self::class_cache(SizeClass::Bytes256),
                Self::class_cache(SizeClass::Bytes512),
                Self::class_cache(SizeClass::Bytes1024),
                Self::class_cache(SizeClass::Bytes2048),
            ],
            provider,
        }
    }

    fn class_cache(class: SizeClass) -> Box<SlubCache> {
        // Class sizes are powers of two no smaller than a pointer, so the
        // construction contract cannot reject them.
        match SlubCache::new(class.size(), class.size(), PAGES_PER_SLAB) {
            Ok(cache) => Box::new(cache),
            Err(_) => unreachable!("size class {:?} rejected by cache construction", class),
        }
    }

    /// Allocate `n` bytes, slab-served up to [`SizeClass::MAX_OBJ_SIZE`].
    ///
    /// Small returns are aligned to their class size; large returns to
    /// [`LARGE_ALIGN`](crate::LARGE_ALIGN).
    pub fn alloc(&mut self, n: usize) -> AllocResult<NonNull<u8>> {
        match SizeClass::from_size(n) {
            Some(class) => self.caches[class.to_index()].alloc(&mut self.provider),
            None => large::alloc_large(&mut self.provider, n),
        }
    }

    /// Release a pointer without knowing its size.
    ///
    /// Large blocks are recognized by the header magic below the pointer;
    /// everything else is treated as a slab object and routed through its
    /// owning cache. Null is ignored with a diagnostic.
    pub fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            warn!("slub allocator: ignoring free of null pointer");
            return;
        };

        if large::is_large(ptr) {
            large::free_large(&mut self.provider, ptr);
            return;
        }

        let slab = slab_of(ptr);
        // SAFETY: a live small pointer implies a live slab header.
        let Some(mut owner) = (unsafe { slab.as_ref().owner() }) else {
            panic!(
                "slab at {:p} carries no owning cache, header corrupted",
                slab.as_ptr()
            );
        };
        // SAFETY: the owner back-pointer targets one of our boxed caches,
        // which &mut self lets us mutate exclusively.
        unsafe { owner.as_mut().free(ptr) };
    }

    /// Release a pointer whose request size is known, skipping the header
    /// discrimination.
    pub fn free_sized(&mut self, ptr: *mut u8, size: usize) {
        let Some(ptr) = NonNull::new(ptr) else {
            warn!("slub allocator: ignoring free of null pointer");
            return;
        };

        match SizeClass::from_size(size) {
            Some(class) => self.caches[class.to_index()].free(ptr),
            None => large::free_large(&mut self.provider, ptr),
        }
    }

    /// Aggregate slab statistics across all size classes.
    pub fn stats(&self) -> SlubStats {
        let mut stats = SlubStats::new();
        for cache in &self.caches {
            stats.add_cache(&cache.stats());
        }
        stats
    }

    /// Snapshot of one size class's cache.
    pub fn class_stats(&self, class: SizeClass) -> CacheStats {
        self.caches[class.to_index()].stats()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: PageProvider> Drop for SlubAllocator<P> {
    fn drop(&mut self) {
        for cache in &mut self.caches {
            cache.release_slabs(&mut self.provider);
        }
    }
}
