use super::error::AllocError;
use super::freelist::{FreeList, FreeNode};
use super::vm::{PlatformVmOps, VmOps, VmRegion};
use std::mem::size_of;
use std::ptr::NonNull;

/// Largest single request. Offsets and sizes are kept compact in the
/// freelist bookkeeping, so requests are capped at the 32-bit range.
pub const MAX_ALLOCATION_SIZE: usize = u32::MAX as usize;

/// Configuration for [`DynamicMemory`]. Set at creation time via
/// [`DynamicMemory::with_config`].
#[derive(Clone, Debug)]
pub struct DynamicMemoryConfig {
    /// Usable bytes, committed up front. Rounded up to the selected page
    /// size. Default: 64 MiB.
    pub total_size: usize,

    /// Address space to reserve. Anything beyond `total_size` is left
    /// uncommitted and is what [`DynamicMemory::resize`] grows into.
    /// `0` reserves exactly `total_size`. Default: 0.
    pub reserve_size: usize,

    /// Regions of at least this many bytes are aligned to the platform's
    /// large page size instead of the base page size. Default: 64 MiB.
    pub large_page_threshold: usize,

    /// Allow large page alignment at all. Default: true.
    pub use_large_pages: bool,
}

impl Default for DynamicMemoryConfig {
    fn default() -> Self {
        Self {
            total_size: 64 * 1024 * 1024,
            reserve_size: 0,
            large_page_threshold: 64 * 1024 * 1024,
            use_large_pages: true,
        }
    }
}

impl DynamicMemoryConfig {
    fn select_page_size(&self) -> usize {
        let base = PlatformVmOps::page_size();
        if self.use_large_pages && self.total_size >= self.large_page_threshold {
            PlatformVmOps::large_page_size().max(base)
        } else {
            base
        }
    }
}

/// General purpose allocator over one contiguous VM region.
///
/// Arbitrary-size requests are served first-fit from a [`FreeList`] whose
/// node array lives in a second, separately committed region. The base
/// address never moves, including across [`resize`](Self::resize).
pub struct DynamicMemory {
    // Borrows `nodes`; declared first so it is dropped before the region.
    freelist: FreeList<'static>,
    memory: VmRegion,
    nodes: VmRegion,
    total_size: usize,
    page_size: usize,
}

impl DynamicMemory {
    /// Create an allocator with `total_size` usable bytes and default
    /// settings otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` if the size is zero or overflows, or if reserving
    /// or committing either region fails.
    pub fn new(total_size: usize) -> Result<Self, AllocError> {
        Self::with_config(DynamicMemoryConfig {
            total_size,
            ..DynamicMemoryConfig::default()
        })
    }

    /// Create an allocator from an explicit configuration.
    ///
    /// Every reservation made before a failing step is released before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` if the size is zero or overflows, or if reserving
    /// or committing either region fails.
    pub fn with_config(config: DynamicMemoryConfig) -> Result<Self, AllocError> {
        if config.total_size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let page_size = config.select_page_size();
        let total_size = config
            .total_size
            .checked_next_multiple_of(page_size)
            .ok_or(AllocError::Overflow("dynamic memory total size"))?;
        let reserve_size = config
            .reserve_size
            .max(total_size)
            .checked_next_multiple_of(page_size)
            .ok_or(AllocError::Overflow("dynamic memory reserve size"))?;

        // Nodes are sized for the whole reservation so growth keeps the same
        // bookkeeping density.
        let node_bytes = FreeList::calculate_memory_requirement(reserve_size as u64);
        let node_region_size = node_bytes.next_multiple_of(PlatformVmOps::page_size());

        let memory = VmRegion::reserve(reserve_size).inspect_err(|e| {
            log::error!("dynamic memory: reserving {reserve_size} bytes failed: {e}");
        })?;
        let nodes = VmRegion::reserve_committed(node_region_size).inspect_err(|e| {
            log::error!("dynamic memory: node storage of {node_region_size} bytes failed: {e}");
        })?;
        memory.commit(0, total_size).inspect_err(|e| {
            log::error!("dynamic memory: committing {total_size} bytes failed: {e}");
        })?;

        // Safety: the whole node region is committed, page aligned (so
        // aligned for FreeNode) and owned by the returned value for as long
        // as the freelist is.
        let node_slice: &'static mut [FreeNode] = unsafe {
            std::slice::from_raw_parts_mut(
                nodes.as_ptr().as_ptr().cast::<FreeNode>(),
                nodes.size() / size_of::<FreeNode>(),
            )
        };
        let freelist = FreeList::create(node_slice, total_size as u64)?;

        log::trace!(
            "dynamic memory created: {total_size} bytes committed, {reserve_size} reserved, page size {page_size}"
        );

        Ok(Self {
            freelist,
            memory,
            nodes,
            total_size,
            page_size,
        })
    }

    /// Allocate `size` bytes. The returned pointer lies inside
    /// `[base, base + total_size)`.
    ///
    /// # Errors
    ///
    /// Zero-size and over-limit requests are rejected; exhaustion returns
    /// the freelist error.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if size > MAX_ALLOCATION_SIZE {
            log::warn!("dynamic memory: request of {size} bytes exceeds {MAX_ALLOCATION_SIZE}");
            return Err(AllocError::TooLarge {
                size,
                limit: MAX_ALLOCATION_SIZE,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.freelist.allocate(size as u64)? as usize;
        // Safety: offset + size <= total_size, inside the committed region.
        Ok(unsafe { self.memory.as_ptr().add(offset) })
    }

    /// Return a block obtained from [`alloc`](Self::alloc).
    ///
    /// # Errors
    ///
    /// Pointers outside the region, double frees and overlapping ranges are
    /// rejected without changing any state.
    pub fn free(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        if !self.contains(ptr) {
            log::warn!("dynamic memory: free of {addr:#x} outside the owned region");
            return Err(AllocError::OutOfRange { addr });
        }
        if size > MAX_ALLOCATION_SIZE {
            return Err(AllocError::TooLarge {
                size,
                limit: MAX_ALLOCATION_SIZE,
            });
        }

        let offset = addr - self.base_addr();
        self.freelist.free(size as u64, offset as u64)?;
        Ok(())
    }

    /// Grow the usable size in place by committing more of the reservation.
    ///
    /// The base address is unchanged and existing allocations stay valid.
    /// `new_total_size` is rounded up to the page size.
    ///
    /// # Errors
    ///
    /// Shrinking and growing past the reservation are rejected. On any
    /// failure the allocator is left as it was.
    pub fn resize(&mut self, new_total_size: usize) -> Result<(), AllocError> {
        let requested = new_total_size
            .checked_next_multiple_of(self.page_size)
            .ok_or(AllocError::Overflow("dynamic memory resize"))?;
        if requested == self.total_size {
            return Ok(());
        }
        if requested < self.total_size || requested > self.memory.size() {
            log::warn!(
                "dynamic memory: cannot resize from {} to {requested} (reserved {})",
                self.total_size,
                self.memory.size()
            );
            return Err(AllocError::InvalidResize {
                current: self.total_size,
                requested,
                reserved: self.memory.size(),
            });
        }

        let grow = requested - self.total_size;
        self.memory.commit(self.total_size, grow)?;
        if let Err(e) = self.freelist.resize(requested as u64) {
            if let Err(de) = self.memory.decommit(self.total_size, grow) {
                log::warn!("dynamic memory: rollback decommit failed: {de}");
            }
            return Err(e.into());
        }

        log::trace!("dynamic memory resized from {} to {requested}", self.total_size);
        self.total_size = requested;
        Ok(())
    }

    /// True if `ptr` lies in `[base, base + total_size)`.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        addr >= self.base_addr() && addr < self.base_addr() + self.total_size
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.memory.as_ptr()
    }

    /// Usable bytes. Always page aligned.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Committed bytes of the main region. The whole usable size is
    /// committed, so this equals [`total_size`](Self::total_size).
    #[must_use]
    pub fn committed_size(&self) -> usize {
        self.total_size
    }

    #[must_use]
    pub fn reserved_size(&self) -> usize {
        self.memory.size()
    }

    /// Bytes of the separate node storage region.
    #[must_use]
    pub fn bookkeeping_size(&self) -> usize {
        self.nodes.size()
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.freelist.free_space() as usize
    }

    #[must_use]
    pub fn freelist(&self) -> &FreeList<'_> {
        &self.freelist
    }

    fn base_addr(&self) -> usize {
        self.memory.as_ptr().as_ptr() as usize
    }
}
