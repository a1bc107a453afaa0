use super::error::AllocError;
use super::freelist::{FreeList, FreeNode};
use super::vm::{PlatformVmOps, VmOps, VmRegion};
#[cfg(debug_assertions)]
use fixedbitset::FixedBitSet;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

/// Largest alignment any scalar type needs on this target. Chunk sizes are
/// rounded up to it so every chunk can hold any scalar.
pub const MAX_SCALAR_ALIGN: usize = {
    let a = align_of::<u128>();
    let b = align_of::<f64>();
    if a > b { a } else { b }
};

/// A pool of fixed-size chunks backed by a single VM reservation.
///
/// Chunks are handed out through a [`FreeList`] that only ever sees
/// `chunk_size` requests, so every allocation takes the exact-fit or
/// shrink-in-place path and every offset is a multiple of `chunk_size`.
pub struct Pool {
    // Borrows `nodes`; declared first so it is dropped before the region.
    freelist: FreeList<'static>,
    chunks: VmRegion,
    nodes: VmRegion,
    pool_size: usize,
    chunk_size: usize,
    chunk_count: usize,
    allocated_count: usize,
    /// Tracks which chunks are currently handed out.
    #[cfg(debug_assertions)]
    live_mask: FixedBitSet,
}

impl Pool {
    /// Create a pool of `chunk_count` chunks of at least `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` for zero arguments, if the pool size overflows,
    /// or if reserving or committing either region fails. Nothing stays
    /// reserved on failure.
    pub fn new(chunk_size: usize, chunk_count: usize) -> Result<Self, AllocError> {
        if chunk_size == 0 || chunk_count == 0 {
            return Err(AllocError::ZeroSize);
        }

        let chunk_size = chunk_size
            .checked_next_multiple_of(MAX_SCALAR_ALIGN)
            .ok_or(AllocError::Overflow("pool chunk size"))?;
        let pool_size = chunk_size
            .checked_mul(chunk_count)
            .ok_or(AllocError::Overflow("pool size"))?;

        let page_size = PlatformVmOps::page_size();
        let chunk_region_size = pool_size
            .checked_next_multiple_of(page_size)
            .ok_or(AllocError::Overflow("pool region size"))?;
        // Alternating live and free chunks need one node per free run, so the
        // pool keeps at least `chunk_count / 2 + 1` nodes regardless of the
        // per-4 KiB heuristic.
        let node_bytes = (chunk_count / 2 + 1)
            .checked_mul(size_of::<FreeNode>())
            .ok_or(AllocError::Overflow("pool node storage"))?
            .max(FreeList::calculate_memory_requirement(pool_size as u64));
        let node_region_size = node_bytes
            .checked_next_multiple_of(page_size)
            .ok_or(AllocError::Overflow("pool node region size"))?;

        let chunks = VmRegion::reserve_committed(chunk_region_size).inspect_err(|e| {
            log::error!("pool: chunk storage of {chunk_region_size} bytes failed: {e}");
        })?;
        let nodes = VmRegion::reserve_committed(node_region_size).inspect_err(|e| {
            log::error!("pool: node storage of {node_region_size} bytes failed: {e}");
        })?;

        // Safety: the whole node region is committed, page aligned and owned
        // by the pool for as long as the freelist is.
        let node_slice: &'static mut [FreeNode] = unsafe {
            std::slice::from_raw_parts_mut(
                nodes.as_ptr().as_ptr().cast::<FreeNode>(),
                nodes.size() / size_of::<FreeNode>(),
            )
        };
        let freelist = FreeList::create(node_slice, pool_size as u64)?;

        log::trace!("pool created: {chunk_count} chunks of {chunk_size} bytes");

        Ok(Self {
            freelist,
            chunks,
            nodes,
            pool_size,
            chunk_size,
            chunk_count,
            allocated_count: 0,
            #[cfg(debug_assertions)]
            live_mask: FixedBitSet::with_capacity(chunk_count),
        })
    }

    /// Allocate one chunk.
    ///
    /// # Errors
    ///
    /// Returns the freelist error when every chunk is in use.
    pub fn alloc(&mut self) -> Result<NonNull<u8>, AllocError> {
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.freelist.allocate(self.chunk_size as u64)? as usize;
        // Safety: offset + chunk_size <= pool_size, inside the committed region.
        let ptr = unsafe { self.chunks.as_ptr().add(offset) };

        #[cfg(debug_assertions)]
        {
            self.live_mask.insert(offset / self.chunk_size);
            // Safety: the chunk is committed and exclusively ours.
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, self.chunk_size) };
        }

        self.allocated_count = self.allocated_count.saturating_add(1);
        Ok(ptr)
    }

    /// Allocate one chunk whose address is a multiple of `alignment`.
    ///
    /// Alignment is a property of the whole pool: it holds only when it
    /// divides `chunk_size` and the base address. Otherwise the call fails
    /// without consuming a chunk.
    ///
    /// # Errors
    ///
    /// [`AllocError::UnsupportedAlignment`] or the error of [`alloc`](Self::alloc).
    pub fn alloc_aligned(&mut self, alignment: usize) -> Result<NonNull<u8>, AllocError> {
        if !self.supports_alignment(alignment) {
            log::debug!(
                "pool: alignment {alignment} unsupported for chunks of {} bytes",
                self.chunk_size
            );
            return Err(AllocError::UnsupportedAlignment {
                alignment,
                chunk_size: self.chunk_size,
            });
        }
        self.alloc()
    }

    /// True if every chunk of this pool is aligned to `alignment`.
    #[must_use]
    pub fn supports_alignment(&self, alignment: usize) -> bool {
        alignment.is_power_of_two()
            && alignment <= self.chunk_size
            && self.chunk_size.is_multiple_of(alignment)
            && self.base_addr().is_multiple_of(alignment)
    }

    /// Return a chunk to the pool.
    ///
    /// # Errors
    ///
    /// Pointers outside the pool, pointers not on a chunk boundary and
    /// chunks that are not allocated are rejected without changing state.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        if !self.contains(ptr) {
            log::warn!("pool: pointer {ptr:p} does not belong to this pool");
            return Err(AllocError::OutOfRange { addr });
        }

        let offset = addr - self.base_addr();
        if !offset.is_multiple_of(self.chunk_size) {
            log::warn!("pool: pointer {ptr:p} is not on a chunk boundary");
            return Err(AllocError::Misaligned {
                addr,
                align: self.chunk_size,
            });
        }

        #[cfg(debug_assertions)]
        if !self.live_mask.contains(offset / self.chunk_size) {
            log::warn!("pool: chunk {ptr:p} was never allocated or is already free");
            return Err(AllocError::NotAllocated { addr });
        }

        self.freelist
            .free(self.chunk_size as u64, offset as u64)?;

        #[cfg(debug_assertions)]
        self.live_mask.set(offset / self.chunk_size, false);

        self.allocated_count = self.allocated_count.saturating_sub(1);
        Ok(())
    }

    /// Chunks still available.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn free_chunks(&self) -> usize {
        self.freelist.free_space() as usize / self.chunk_size
    }

    /// True if `ptr` lies in `[base, base + pool_size)`.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        addr >= self.base_addr() && addr < self.base_addr() + self.pool_size
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.chunks.as_ptr()
    }

    /// Chunk size after rounding to [`MAX_SCALAR_ALIGN`].
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// `chunk_size * chunk_count`.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Chunks currently handed out. Informational only.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Bytes of the separate node storage region.
    #[must_use]
    pub fn bookkeeping_size(&self) -> usize {
        self.nodes.size()
    }

    fn base_addr(&self) -> usize {
        self.chunks.as_ptr().as_ptr() as usize
    }
}
