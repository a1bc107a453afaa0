use super::allocator::{Allocator, AllocatorBackend};
use super::arena::Arena;
use super::error::AllocError;
use super::pool::Pool;
use super::stats::{AllocatorStatistics, GlobalStatistics};
use crate::sync::Arc;

/// Central handle for the memory subsystem.
///
/// Owns the shared statistics aggregate and binds every allocator it builds
/// to it. Create one at startup and pass it to whatever builds allocators.
pub struct MemoryManager {
    global: Arc<GlobalStatistics>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            global: Arc::new(GlobalStatistics::new()),
        }
    }

    /// Build an allocator over a fresh pool of `chunk_count` chunks.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` if the pool cannot be created.
    pub fn pool_allocator(
        &self,
        chunk_size: usize,
        chunk_count: usize,
    ) -> Result<Allocator, AllocError> {
        let pool = Pool::new(chunk_size, chunk_count)?;
        Ok(Allocator::from_pool(pool, Arc::clone(&self.global)))
    }

    /// Build an allocator over a fresh arena of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `AllocError` if the arena cannot be reserved.
    pub fn arena_allocator(&self, capacity: usize) -> Result<Allocator, AllocError> {
        let arena = Arena::new(capacity)?;
        Ok(Allocator::from_arena(arena, Arc::clone(&self.global)))
    }

    /// Bind an existing backend.
    #[must_use]
    pub fn allocator(&self, backend: AllocatorBackend) -> Allocator {
        Allocator::new(backend, Arc::clone(&self.global))
    }

    #[must_use]
    pub fn global_statistics(&self) -> AllocatorStatistics {
        self.global.snapshot()
    }

    #[must_use]
    pub fn global_handle(&self) -> &Arc<GlobalStatistics> {
        &self.global
    }

    pub fn print_statistics(&self) {
        self.global.print();
    }
}
