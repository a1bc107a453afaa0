use super::arena::{Arena, ArenaMarker};
use super::error::AllocError;
use super::pool::{Pool, MAX_SCALAR_ALIGN};
use super::pool_adapter;
use super::stats::{self, AllocatorStatistics, GlobalStatistics, MemoryTag};
use crate::sync::Arc;
use std::ptr::NonNull;

/// The memory an [`Allocator`] hands out.
pub enum AllocatorBackend {
    Pool(Pool),
    Arena(Arena),
}

/// How a backend reclaims memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Memory comes back in bulk; per-object frees do nothing.
    Arena,
    /// Every allocation is freed individually.
    Exact,
}

impl AllocatorBackend {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Pool(_) => BackendKind::Exact,
            Self::Arena(_) => BackendKind::Arena,
        }
    }
}

/// Tagged, instrumented front end over a [`Pool`] or an [`Arena`].
///
/// Counters are updated before the backend runs, so a request the backend
/// rejects is still counted. Frees on an arena backend bump `total_frees`
/// and nothing else.
pub struct Allocator {
    backend: AllocatorBackend,
    stats: AllocatorStatistics,
    global: Arc<GlobalStatistics>,
}

impl Allocator {
    #[must_use]
    pub fn new(backend: AllocatorBackend, global: Arc<GlobalStatistics>) -> Self {
        log::trace!("allocator bound to {:?} backend", backend.kind());
        Self {
            backend,
            stats: AllocatorStatistics::default(),
            global,
        }
    }

    #[must_use]
    pub fn from_pool(pool: Pool, global: Arc<GlobalStatistics>) -> Self {
        Self::new(AllocatorBackend::Pool(pool), global)
    }

    #[must_use]
    pub fn from_arena(arena: Arena, global: Arc<GlobalStatistics>) -> Self {
        Self::new(AllocatorBackend::Arena(arena), global)
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Allocate `size` bytes aligned for any scalar.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports. The counters stay incremented.
    pub fn alloc(&mut self, size: usize, tag: MemoryTag) -> Result<NonNull<u8>, AllocError> {
        self.record_alloc(tag, size);
        match &mut self.backend {
            AllocatorBackend::Pool(pool) => pool_adapter::alloc(pool, size),
            AllocatorBackend::Arena(arena) => arena.alloc(size, MAX_SCALAR_ALIGN),
        }
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports. The counters stay incremented.
    pub fn alloc_aligned(
        &mut self,
        size: usize,
        alignment: usize,
        tag: MemoryTag,
    ) -> Result<NonNull<u8>, AllocError> {
        self.record_alloc(tag, size);
        match &mut self.backend {
            AllocatorBackend::Pool(pool) => pool_adapter::alloc_aligned(pool, size, alignment),
            AllocatorBackend::Arena(arena) => arena.alloc(size, alignment),
        }
    }

    /// Release an allocation of `old_size` bytes.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports. The counters stay decremented.
    pub fn free(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        tag: MemoryTag,
    ) -> Result<(), AllocError> {
        self.record_free(tag, old_size);
        match &mut self.backend {
            AllocatorBackend::Pool(pool) => pool_adapter::free(pool, ptr, old_size),
            AllocatorBackend::Arena(_) => Ok(()),
        }
    }

    /// Release an allocation made with [`alloc_aligned`](Self::alloc_aligned).
    ///
    /// # Errors
    ///
    /// Whatever the backend reports.
    pub fn free_aligned(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        alignment: usize,
        tag: MemoryTag,
    ) -> Result<(), AllocError> {
        self.record_free(tag, old_size);
        match &mut self.backend {
            AllocatorBackend::Pool(pool) => {
                pool_adapter::free_aligned(pool, ptr, old_size, alignment)
            }
            AllocatorBackend::Arena(_) => Ok(()),
        }
    }

    /// Resize an allocation. `None` is a fresh allocation, and the
    /// statistics count `old_size == 0` as one too.
    ///
    /// A pool keeps the pointer as long as the chunk is big enough. An arena
    /// keeps it when shrinking and otherwise bumps a new block and copies
    /// the old bytes into it.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports. [`AllocError::OutOfRange`] if an arena
    /// is handed a block it does not hold.
    pub fn realloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        tag: MemoryTag,
    ) -> Result<NonNull<u8>, AllocError> {
        self.reallocate(ptr, old_size, new_size, None, tag)
    }

    /// [`realloc`](Self::realloc) keeping `alignment`.
    ///
    /// # Errors
    ///
    /// As [`realloc`](Self::realloc).
    pub fn realloc_aligned(
        &mut self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        alignment: usize,
        tag: MemoryTag,
    ) -> Result<NonNull<u8>, AllocError> {
        self.reallocate(ptr, old_size, new_size, Some(alignment), tag)
    }

    fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        alignment: Option<usize>,
        tag: MemoryTag,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_size = if ptr.is_some() { old_size } else { 0 };
        self.stats.record_realloc(tag, old_size as u64, new_size as u64);
        self.global.record_realloc(tag, old_size as u64, new_size as u64);

        match &mut self.backend {
            AllocatorBackend::Pool(pool) => match alignment {
                Some(align) => {
                    pool_adapter::realloc_aligned(pool, ptr, old_size, new_size, align)
                }
                None => pool_adapter::realloc(pool, ptr, old_size, new_size),
            },
            AllocatorBackend::Arena(arena) => {
                let align = alignment.unwrap_or(MAX_SCALAR_ALIGN);
                if !align.is_power_of_two() {
                    return Err(AllocError::InvalidAlignment(align));
                }
                let Some(old) = ptr else {
                    return arena.alloc(new_size, align);
                };
                if !arena.contains_range(old, old_size) {
                    log::warn!("arena: realloc of {old:p} which this arena does not hold");
                    return Err(AllocError::OutOfRange {
                        addr: old.as_ptr() as usize,
                    });
                }
                if new_size <= old_size && (old.as_ptr() as usize).is_multiple_of(align) {
                    return Ok(old);
                }
                let new = arena.alloc(new_size, align)?;
                // Safety: `old` spans `old_size` used bytes of the arena and
                // `new` was bumped past them, so the ranges are disjoint.
                unsafe {
                    std::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(new_size));
                }
                Ok(new)
            }
        }
    }

    /// Open a scope: everything allocated until the matching
    /// [`end_scope`](Self::end_scope) is released by it.
    ///
    /// # Errors
    ///
    /// [`AllocError::Unsupported`] on a pool backend.
    pub fn begin_scope(&mut self) -> Result<ArenaMarker, AllocError> {
        match &self.backend {
            AllocatorBackend::Arena(arena) => Ok(arena.checkpoint()),
            AllocatorBackend::Pool(_) => Err(AllocError::Unsupported("scoped allocation")),
        }
    }

    /// Close a scope opened by [`begin_scope`](Self::begin_scope).
    ///
    /// # Errors
    ///
    /// [`AllocError::Unsupported`] on a pool backend.
    pub fn end_scope(&mut self, marker: ArenaMarker) -> Result<(), AllocError> {
        match &mut self.backend {
            AllocatorBackend::Arena(arena) => {
                arena.restore(marker);
                Ok(())
            }
            AllocatorBackend::Pool(_) => Err(AllocError::Unsupported("scoped allocation")),
        }
    }

    /// Fill `size` bytes at `dst` with `value`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `size` bytes.
    pub unsafe fn set(&mut self, dst: NonNull<u8>, value: u8, size: usize) {
        self.stats.record_set();
        self.global.record_set();
        // Safety: guaranteed by the caller.
        unsafe { std::ptr::write_bytes(dst.as_ptr(), value, size) };
    }

    /// Zero `size` bytes at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `size` bytes.
    pub unsafe fn zero(&mut self, dst: NonNull<u8>, size: usize) {
        self.stats.record_zero();
        self.global.record_zero();
        // Safety: guaranteed by the caller.
        unsafe { std::ptr::write_bytes(dst.as_ptr(), 0, size) };
    }

    /// Copy `size` bytes from `src` to `dst`.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid for `size` bytes and the ranges must not
    /// overlap.
    pub unsafe fn copy(&mut self, dst: NonNull<u8>, src: NonNull<u8>, size: usize) {
        self.stats.record_copy();
        self.global.record_copy();
        // Safety: guaranteed by the caller.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
    }

    /// This allocator's own counters.
    #[must_use]
    pub fn statistics(&self) -> &AllocatorStatistics {
        &self.stats
    }

    /// Snapshot of the shared aggregate this allocator reports into.
    #[must_use]
    pub fn global_statistics(&self) -> AllocatorStatistics {
        self.global.snapshot()
    }

    #[must_use]
    pub fn global_handle(&self) -> &Arc<GlobalStatistics> {
        &self.global
    }

    /// Log this allocator's report at `info` level.
    pub fn print_statistics(&self) {
        stats::log_report("allocator statistics", &self.stats);
    }

    #[must_use]
    pub fn backend(&self) -> &AllocatorBackend {
        &self.backend
    }

    /// Unbind the backend. Dropping it releases its memory.
    #[must_use]
    pub fn into_backend(self) -> AllocatorBackend {
        self.backend
    }

    fn record_alloc(&mut self, tag: MemoryTag, size: usize) {
        self.stats.record_alloc(tag, size as u64);
        self.global.record_alloc(tag, size as u64);
    }

    fn record_free(&mut self, tag: MemoryTag, size: usize) {
        let exact = self.kind() == BackendKind::Exact;
        self.stats.record_free(tag, size as u64, exact);
        self.global.record_free(tag, size as u64, exact);
    }
}
