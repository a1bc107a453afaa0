//! Allocator semantics on top of a [`Pool`].
//!
//! Every request is served by one whole chunk, so anything that fits in a
//! chunk succeeds and anything larger is refused. Reallocation within the
//! chunk size is free: the same pointer comes back.

use super::error::AllocError;
use super::pool::Pool;
use std::ptr::NonNull;

fn check_fits(pool: &Pool, size: usize) -> Result<(), AllocError> {
    if size > pool.chunk_size() {
        log::debug!(
            "pool adapter: {size} bytes requested from chunks of {} bytes",
            pool.chunk_size()
        );
        return Err(AllocError::TooLarge {
            size,
            limit: pool.chunk_size(),
        });
    }
    Ok(())
}

/// Take a chunk for a `size`-byte request.
///
/// # Errors
///
/// [`AllocError::TooLarge`] if `size` exceeds the chunk size, otherwise the
/// pool's error.
pub fn alloc(pool: &mut Pool, size: usize) -> Result<NonNull<u8>, AllocError> {
    check_fits(pool, size)?;
    pool.alloc()
}

/// Take a chunk aligned to `alignment`.
///
/// # Errors
///
/// As [`alloc`], plus [`AllocError::UnsupportedAlignment`].
pub fn alloc_aligned(
    pool: &mut Pool,
    size: usize,
    alignment: usize,
) -> Result<NonNull<u8>, AllocError> {
    check_fits(pool, size)?;
    pool.alloc_aligned(alignment)
}

/// Return the chunk behind `ptr`.
///
/// # Errors
///
/// [`AllocError::TooLarge`] if `old_size` could not have come from this
/// pool, otherwise the pool's validation error.
pub fn free(pool: &mut Pool, ptr: NonNull<u8>, old_size: usize) -> Result<(), AllocError> {
    if old_size > pool.chunk_size() {
        log::warn!(
            "pool adapter: free of {old_size} bytes at {ptr:p} exceeds chunk size {}",
            pool.chunk_size()
        );
        return Err(AllocError::TooLarge {
            size: old_size,
            limit: pool.chunk_size(),
        });
    }
    pool.free(ptr)
}

/// Aligned chunks are ordinary chunks, so this is [`free`].
///
/// # Errors
///
/// As [`free`].
pub fn free_aligned(
    pool: &mut Pool,
    ptr: NonNull<u8>,
    old_size: usize,
    _alignment: usize,
) -> Result<(), AllocError> {
    free(pool, ptr, old_size)
}

/// Resize an allocation in place.
///
/// `None` is a fresh allocation. A size that still fits the chunk returns
/// the same pointer; a larger one fails and leaves the old chunk untouched.
///
/// # Errors
///
/// [`AllocError::TooLarge`] if `new_size` exceeds the chunk size.
pub fn realloc(
    pool: &mut Pool,
    ptr: Option<NonNull<u8>>,
    _old_size: usize,
    new_size: usize,
) -> Result<NonNull<u8>, AllocError> {
    match ptr {
        None => alloc(pool, new_size),
        Some(ptr) => {
            check_fits(pool, new_size)?;
            Ok(ptr)
        }
    }
}

/// [`realloc`] with an alignment requirement.
///
/// # Errors
///
/// As [`realloc`]; an existing pointer that does not satisfy `alignment`
/// is reported as [`AllocError::Misaligned`].
pub fn realloc_aligned(
    pool: &mut Pool,
    ptr: Option<NonNull<u8>>,
    _old_size: usize,
    new_size: usize,
    alignment: usize,
) -> Result<NonNull<u8>, AllocError> {
    match ptr {
        None => alloc_aligned(pool, new_size, alignment),
        Some(ptr) => {
            check_fits(pool, new_size)?;
            if !alignment.is_power_of_two() {
                return Err(AllocError::InvalidAlignment(alignment));
            }
            let addr = ptr.as_ptr() as usize;
            if !addr.is_multiple_of(alignment) {
                return Err(AllocError::Misaligned {
                    addr,
                    align: alignment,
                });
            }
            Ok(ptr)
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_alloc_respects_chunk_size() {
        let mut pool = Pool::new(64, 2).unwrap();
        let p = alloc(&mut pool, 40).unwrap();
        assert!(pool.contains(p));
        assert!(matches!(
            alloc(&mut pool, 65),
            Err(AllocError::TooLarge { size: 65, limit: 64 })
        ));
        assert_eq!(pool.free_chunks(), 1);
    }

    #[test]
    fn test_adapter_free_rejects_oversized() {
        let mut pool = Pool::new(64, 2).unwrap();
        let p = alloc(&mut pool, 64).unwrap();
        assert!(free(&mut pool, p, 128).is_err());
        assert_eq!(pool.allocated_count(), 1);
        free(&mut pool, p, 64).unwrap();
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_adapter_realloc_within_chunk_same_pointer() {
        let mut pool = Pool::new(64, 2).unwrap();
        let p = realloc(&mut pool, None, 0, 16).unwrap();
        assert_eq!(pool.allocated_count(), 1);

        let q = realloc(&mut pool, Some(p), 16, 64).unwrap();
        assert_eq!(p, q);
        assert!(realloc(&mut pool, Some(p), 64, 65).is_err());
        assert_eq!(pool.allocated_count(), 1);
    }

    #[test]
    fn test_adapter_aligned_paths() {
        let mut pool = Pool::new(128, 4).unwrap();
        let p = alloc_aligned(&mut pool, 100, 64).unwrap();
        assert_eq!(p.as_ptr() as usize % 64, 0);
        assert_eq!(realloc_aligned(&mut pool, Some(p), 100, 128, 64).unwrap(), p);
        assert!(alloc_aligned(&mut pool, 8, 256).is_err());

        let fresh = realloc_aligned(&mut pool, None, 0, 32, 32).unwrap();
        free_aligned(&mut pool, fresh, 32, 32).unwrap();
        free_aligned(&mut pool, p, 128, 64).unwrap();
        assert_eq!(pool.free_chunks(), 4);
    }
}
