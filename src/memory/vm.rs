use std::ptr::NonNull;

/// Threshold for the transparent huge page hint on commit.
#[allow(dead_code)]
const PAGE_SIZE_2MB: usize = 2 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("VM reservation failed: {0}")]
    ReservationFailed(#[source] std::io::Error),
    #[error("VM commit failed: {0}")]
    CommitFailed(#[source] std::io::Error),
    #[error("VM decommit failed: {0}")]
    DecommitFailed(#[source] std::io::Error),
    #[error("VM release failed: {0}")]
    ReleaseFailed(#[source] std::io::Error),
}

/// Abstract interface for virtual memory operations.
///
/// These six operations are the entire platform surface the allocators
/// depend on.
pub(crate) trait VmOps {
    /// Reserve address space without committing physical pages.
    /// Returns a pointer to the start of the reserved range.
    unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError>;

    /// Commit (back with physical pages) a range within a reservation.
    unsafe fn commit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// Decommit (return physical pages, keep address range reserved).
    unsafe fn decommit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// Release address space entirely (after which pointers are invalid).
    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// OS page size (default/minimum).
    fn page_size() -> usize;

    /// Smallest large page size the platform supports, or `page_size()` when
    /// it has none.
    fn large_page_size() -> usize;
}

pub(crate) struct PlatformVmOps;

/// An owned VM reservation. Dropping it decommits and releases the range, so
/// a constructor that fails half-way unwinds by simply returning.
pub(crate) struct VmRegion {
    ptr: NonNull<u8>,
    size: usize,
}

// Safety: VmRegion exclusively owns its mapping.
unsafe impl Send for VmRegion {}

impl VmRegion {
    /// Reserve `size` bytes of address space. Nothing is committed.
    pub(crate) fn reserve(size: usize) -> Result<Self, VmError> {
        // Safety: FFI call to reserve.
        let ptr = unsafe { PlatformVmOps::reserve(size)? };
        Ok(Self { ptr, size })
    }

    /// Reserve and commit `size` bytes in one step.
    pub(crate) fn reserve_committed(size: usize) -> Result<Self, VmError> {
        let region = Self::reserve(size)?;
        region.commit(0, size)?;
        Ok(region)
    }

    /// Commit `len` bytes starting `offset` bytes into the reservation.
    pub(crate) fn commit(&self, offset: usize, len: usize) -> Result<(), VmError> {
        debug_assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.size),
            "commit of {len} bytes at offset {offset} exceeds reservation of {}",
            self.size
        );
        // Safety: the range lies inside our reservation.
        unsafe { PlatformVmOps::commit(self.at(offset), len) }
    }

    /// Decommit `len` bytes starting `offset` bytes into the reservation.
    pub(crate) fn decommit(&self, offset: usize, len: usize) -> Result<(), VmError> {
        debug_assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.size),
            "decommit of {len} bytes at offset {offset} exceeds reservation of {}",
            self.size
        );
        // Safety: the range lies inside our reservation.
        unsafe { PlatformVmOps::decommit(self.at(offset), len) }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    fn at(&self, offset: usize) -> NonNull<u8> {
        // Safety: callers keep offset within the reservation.
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for VmRegion {
    fn drop(&mut self) {
        // Safety: ptr/size describe the reservation made in `reserve`.
        if let Err(e) = unsafe { PlatformVmOps::decommit(self.ptr, self.size) } {
            log::warn!("decommit of {} bytes at {:p} failed: {e}", self.size, self.ptr);
        }
        // Safety: same reservation; nothing references it after drop.
        if let Err(e) = unsafe { PlatformVmOps::release(self.ptr, self.size) } {
            log::warn!("release of {} bytes at {:p} failed: {e}", self.size, self.ptr);
        }
    }
}

#[cfg(all(any(target_os = "macos", target_os = "linux"), not(any(loom, miri))))]
mod unix {
    use super::{NonNull, PlatformVmOps, VmError, VmOps};
    use std::io;

    /// Linux: probe /sys/kernel/mm/hugepages/ for kernel-supported huge page
    /// sizes. Directory names are "hugepages-NkB" where N is the size in KiB.
    ///
    /// This reports what sizes the kernel *supports*, not what's currently
    /// allocated.
    #[cfg(target_os = "linux")]
    fn probe_large_page_size() -> usize {
        let base = PlatformVmOps::page_size();
        let mut sizes = Vec::new();

        if let Ok(entries) = std::fs::read_dir("/sys/kernel/mm/hugepages") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(kb_str) = name
                    .strip_prefix("hugepages-")
                    .and_then(|s| s.strip_suffix("kB"))
                {
                    if let Ok(kb) = kb_str.parse::<usize>() {
                        sizes.push(kb * 1024);
                    }
                }
            }
        }

        sizes
            .into_iter()
            .filter(|&s| s > base && s.is_power_of_two())
            .min()
            .unwrap_or(base)
    }

    /// macOS: Intel supports 2MB superpages; Apple Silicon has only 16KB pages.
    #[cfg(target_os = "macos")]
    fn probe_large_page_size() -> usize {
        #[cfg(target_arch = "x86_64")]
        {
            super::PAGE_SIZE_2MB
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            PlatformVmOps::page_size()
        }
    }

    impl VmOps for PlatformVmOps {
        unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError> {
            // Safety: FFI call to mmap.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(VmError::ReservationFailed(io::Error::last_os_error()));
            }

            NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| VmError::ReservationFailed(io::Error::other("mmap returned null")))
        }

        unsafe fn commit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: FFI call to mprotect.
            if unsafe {
                libc::mprotect(
                    ptr.as_ptr().cast::<libc::c_void>(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            } != 0
            {
                return Err(VmError::CommitFailed(io::Error::last_os_error()));
            }

            #[cfg(target_os = "linux")]
            {
                // Transparent Huge Pages: only worth asking for on regions of
                // at least one huge page.
                if size >= super::PAGE_SIZE_2MB {
                    // Safety: FFI call to madvise.
                    unsafe {
                        libc::madvise(
                            ptr.as_ptr().cast::<libc::c_void>(),
                            size,
                            libc::MADV_HUGEPAGE,
                        )
                    };
                }
            }

            Ok(())
        }

        unsafe fn decommit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // MADV_FREE marks pages for lazy reclamation; mprotect(PROT_NONE)
            // removes access. Recommitted pages may hold stale data or zeroes.
            // Safety: FFI call to madvise.
            if unsafe { libc::madvise(ptr.as_ptr().cast::<libc::c_void>(), size, libc::MADV_FREE) }
                != 0
            {
                return Err(VmError::DecommitFailed(io::Error::last_os_error()));
            }
            // Safety: FFI call to mprotect.
            if unsafe { libc::mprotect(ptr.as_ptr().cast::<libc::c_void>(), size, libc::PROT_NONE) }
                != 0
            {
                return Err(VmError::DecommitFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: FFI call to munmap.
            if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), size) } != 0 {
                return Err(VmError::ReleaseFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }

        fn large_page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(probe_large_page_size)
        }
    }
}

// ---------------------------------------------------------------------------
// Heap-backed VmOps (no real mmap)
//
// Under `cfg(loom)` and `cfg(miri)` we cannot issue real VM syscalls, and
// other targets have no implementation yet. Every "reservation" is backed by
// a plain zeroed heap allocation. `commit` / `decommit` are no-ops: the
// memory is always accessible once reserved. `release` frees the heap block.
// ---------------------------------------------------------------------------
#[cfg(not(all(any(target_os = "macos", target_os = "linux"), not(any(loom, miri)))))]
impl VmOps for PlatformVmOps {
    unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError> {
        if size == 0 {
            return Err(VmError::ReservationFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "zero-size reservation",
            )));
        }
        let layout = std::alloc::Layout::from_size_align(size, 4096)
            .map_err(|e| VmError::ReservationFailed(std::io::Error::other(e)))?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            VmError::ReservationFailed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "alloc returned null",
            ))
        })
    }

    unsafe fn commit(_ptr: NonNull<u8>, _size: usize) -> Result<(), VmError> {
        Ok(())
    }

    unsafe fn decommit(_ptr: NonNull<u8>, _size: usize) -> Result<(), VmError> {
        Ok(())
    }

    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
        let layout = std::alloc::Layout::from_size_align(size, 4096)
            .map_err(|e| VmError::ReleaseFailed(std::io::Error::other(e)))?;
        // Safety: ptr was allocated with the same layout via `reserve`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn page_size() -> usize {
        4096
    }

    fn large_page_size() -> usize {
        PAGE_SIZE_2MB
    }
}
