#[cfg(not(target_pointer_width = "64"))]
compile_error!("qalloc supports only 64-bit targets.");

pub(crate) mod sync;

// public module: implementation details stay pub(crate), the API is
// re-exported below
pub mod memory;

// bookkeeping
pub use memory::freelist::{
    FreeBlock, FreeList, FreeListError, FreeNode, INVALID, Iter as FreeBlocks, MAX_NODE_COUNT,
    MIN_NODE_COUNT,
};

// allocators
pub use memory::arena::{Arena, ArenaMarker};
pub use memory::dynamic::{DynamicMemory, DynamicMemoryConfig, MAX_ALLOCATION_SIZE};
pub use memory::pool::{Pool, MAX_SCALAR_ALIGN};

// allocator interface
pub use memory::allocator::{Allocator, AllocatorBackend, BackendKind};
pub use memory::pool_adapter;

// mgmt/stats
pub use memory::manager::MemoryManager;
pub use memory::stats::{AllocatorStatistics, ByteSize, GlobalStatistics, InvalidTag, MemoryTag};

// errors
pub use memory::error::AllocError;
pub use memory::vm::VmError;
