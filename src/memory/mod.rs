pub(crate) mod allocator;
pub(crate) mod arena;
pub(crate) mod dynamic;
pub(crate) mod error;
pub(crate) mod freelist;
pub(crate) mod integration;
pub(crate) mod manager;
pub(crate) mod pool;
pub mod pool_adapter;
pub(crate) mod stats;
pub(crate) mod vm;
