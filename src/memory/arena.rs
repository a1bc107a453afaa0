use super::error::AllocError;
use super::vm::{PlatformVmOps, VmOps, VmRegion};
use std::ptr::NonNull;

/// A bump allocator over one VM reservation.
///
/// Pages are committed as the cursor advances. Individual frees are no-ops;
/// memory comes back through [`reset`](Self::reset) or by restoring an
/// [`ArenaMarker`].
pub struct Arena {
    region: VmRegion,
    cursor: usize,
    committed: usize,
}

/// Saved cursor position, produced by [`Arena::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaMarker(usize);

impl Arena {
    /// Reserve an arena of at least `capacity` bytes. Nothing is committed yet.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` for a zero capacity or if the reservation fails.
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        if capacity == 0 {
            return Err(AllocError::ZeroSize);
        }
        let capacity = capacity
            .checked_next_multiple_of(PlatformVmOps::page_size())
            .ok_or(AllocError::Overflow("arena capacity"))?;
        let region = VmRegion::reserve(capacity).inspect_err(|e| {
            log::error!("arena: reservation of {capacity} bytes failed: {e}");
        })?;

        log::trace!("arena created: {capacity} bytes reserved");

        Ok(Self {
            region,
            cursor: 0,
            committed: 0,
        })
    }

    /// Bump-allocate `size` bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// [`AllocError::ArenaExhausted`] when the reservation cannot hold the
    /// request, [`AllocError::InvalidAlignment`] if `align` is not a power
    /// of two, or the commit error if the platform refuses more pages.
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }

        let base = self.region.as_ptr().as_ptr() as usize;
        let capacity = self.region.size();
        let remaining = capacity - self.cursor;
        let exhausted = AllocError::ArenaExhausted {
            requested: size,
            remaining,
        };

        let start = (base + self.cursor)
            .checked_next_multiple_of(align)
            .ok_or(AllocError::Overflow("arena alignment"))?
            - base;
        let end = match start.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => {
                log::debug!("arena: {size} bytes requested with {remaining} remaining");
                return Err(exhausted);
            }
        };

        if end > self.committed {
            let target = end.next_multiple_of(PlatformVmOps::page_size()).min(capacity);
            self.region.commit(self.committed, target - self.committed)?;
            self.committed = target;
        }

        self.cursor = end;
        // Safety: start + size <= committed, inside the region.
        let ptr = unsafe { self.region.as_ptr().add(start) };
        #[cfg(debug_assertions)]
        // Safety: the range was just committed and is exclusively ours.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }
        Ok(ptr)
    }

    /// Rewind to the start. Committed pages stay committed.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Current cursor position.
    #[must_use]
    pub fn checkpoint(&self) -> ArenaMarker {
        ArenaMarker(self.cursor)
    }

    /// Rewind to `marker`, releasing everything allocated after it.
    /// Markers ahead of the cursor are ignored.
    pub fn restore(&mut self, marker: ArenaMarker) {
        if marker.0 <= self.cursor {
            self.cursor = marker.0;
        } else {
            log::warn!(
                "arena: marker {} is ahead of cursor {}, ignored",
                marker.0,
                self.cursor
            );
        }
    }

    /// True if `ptr` lies in the used part of the arena.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let base = self.region.as_ptr().as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr < base + self.cursor
    }

    /// True if `[ptr, ptr + len)` lies in the used part of the arena.
    #[must_use]
    pub fn contains_range(&self, ptr: NonNull<u8>, len: usize) -> bool {
        let base = self.region.as_ptr().as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr.checked_add(len).is_some_and(|end| end <= base + self.cursor)
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    #[must_use]
    pub fn committed_bytes(&self) -> usize {
        self.committed
    }
}
