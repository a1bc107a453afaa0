use super::freelist::FreeListError;
use super::vm::VmError;

/// Errors returned by `DynamicMemory`, `Pool`, `Arena` and `Allocator`.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    FreeList(#[from] FreeListError),
    #[error("zero-size request")]
    ZeroSize,
    #[error("request of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("pointer {addr:#x} does not belong to this allocator")]
    OutOfRange { addr: usize },
    #[error("pointer {addr:#x} is not aligned to {align}")]
    Misaligned { addr: usize, align: usize },
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("alignment {alignment} cannot be served by chunks of {chunk_size} bytes")]
    UnsupportedAlignment { alignment: usize, chunk_size: usize },
    #[error("size computation overflowed: {0}")]
    Overflow(&'static str),
    #[error("arena exhausted: {requested} bytes requested, {remaining} remaining")]
    ArenaExhausted { requested: usize, remaining: usize },
    #[error("cannot resize from {current} to {requested} bytes (reserved {reserved})")]
    InvalidResize {
        current: usize,
        requested: usize,
        reserved: usize,
    },
    #[error("chunk at {addr:#x} is not currently allocated")]
    NotAllocated { addr: usize },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}
