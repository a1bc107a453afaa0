//! Sorted list of free `[offset, offset + size)` ranges over an abstract
//! address space.
//!
//! The list never allocates. Its nodes live in a fixed-capacity array handed
//! in by the caller (a VM region for `DynamicMemory` and `Pool`, a plain
//! slice in tests). A node is either linked into the list or *recycled*,
//! marked by [`INVALID`] in both `offset` and `size`. Offset `0` is a valid
//! address, so the sentinel is `u64::MAX` rather than zero.
//!
//! Invariants, restored before every public method returns:
//! - linked nodes are in strictly ascending offset order,
//! - no two free ranges overlap,
//! - no two free ranges are adjacent (adjacent ranges are merged on free).
//!
//! Node capacity is sized by [`FreeList::calculate_memory_requirement`]: one
//! node per 4 KiB of tracked space, clamped to `[2, 1024]`. Under extreme
//! fragmentation a `free` can therefore fail with
//! [`FreeListError::NodesExhausted`]; the range stays allocated.

use std::mem::size_of;

/// Sentinel for the offset and size of a recycled node.
pub const INVALID: u64 = u64::MAX;

/// End-of-list / no-node marker for node links.
const NIL: u32 = u32::MAX;

/// Tracked bytes covered by one node of bookkeeping.
const BYTES_PER_NODE: u64 = 4096;

pub const MIN_NODE_COUNT: usize = 2;
pub const MAX_NODE_COUNT: usize = 1024;

/// One slot of the node array.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeNode {
    size: u64,
    offset: u64,
    next: u32,
}

impl FreeNode {
    pub const RECYCLED: Self = Self {
        size: INVALID,
        offset: INVALID,
        next: NIL,
    };

    #[inline]
    #[must_use]
    pub fn is_recycled(&self) -> bool {
        self.offset == INVALID
    }
}

impl Default for FreeNode {
    fn default() -> Self {
        Self::RECYCLED
    }
}

/// A free range as reported by [`FreeList::iter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlock {
    pub offset: u64,
    pub size: u64,
}

impl FreeBlock {
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FreeListError {
    #[error("node storage holds {provided} nodes, at least 2 required")]
    StorageTooSmall { provided: usize },
    #[error("cannot track an address space of {0} bytes")]
    InvalidTotalSize(u64),
    #[error("zero-size request")]
    ZeroSize,
    #[error("offset is the invalid sentinel")]
    InvalidOffset,
    #[error("range at offset {offset} of {size} bytes exceeds tracked size {total_size}")]
    OutOfRange {
        offset: u64,
        size: u64,
        total_size: u64,
    },
    #[error("no free block of {requested} bytes (free space {free_space})")]
    OutOfSpace { requested: u64, free_space: u64 },
    #[error("double free at offset {offset}")]
    DoubleFree { offset: u64 },
    #[error("range at offset {offset} of {size} bytes overlaps a free block")]
    Overlap { offset: u64, size: u64 },
    #[error("all {0} freelist nodes are in use")]
    NodesExhausted(usize),
    #[error("cannot shrink tracked size from {current} to {requested}")]
    Shrink { current: u64, requested: u64 },
}

/// Free-range tracker over caller-owned node storage.
#[derive(Debug)]
pub struct FreeList<'a> {
    nodes: &'a mut [FreeNode],
    total_size: u64,
    head: u32,
}

impl<'a> FreeList<'a> {
    /// Number of nodes the heuristic assigns to `total_size` bytes.
    #[must_use]
    pub fn node_count_for(total_size: u64) -> usize {
        usize::try_from(total_size / BYTES_PER_NODE)
            .unwrap_or(MAX_NODE_COUNT)
            .clamp(MIN_NODE_COUNT, MAX_NODE_COUNT)
    }

    /// Bytes of node storage needed to track `total_size` bytes.
    #[must_use]
    pub fn calculate_memory_requirement(total_size: u64) -> usize {
        Self::node_count_for(total_size) * size_of::<FreeNode>()
    }

    /// Build a list with a single free block covering `[0, total_size)`.
    ///
    /// Every slot of `nodes` is overwritten; its previous contents do not
    /// matter.
    ///
    /// # Errors
    ///
    /// Fails if `nodes` holds fewer than two nodes or `total_size` is zero or
    /// the sentinel.
    pub fn create(nodes: &'a mut [FreeNode], total_size: u64) -> Result<Self, FreeListError> {
        if nodes.len() < MIN_NODE_COUNT {
            log::warn!(
                "freelist storage of {} nodes is too small (minimum {MIN_NODE_COUNT})",
                nodes.len()
            );
            return Err(FreeListError::StorageTooSmall {
                provided: nodes.len(),
            });
        }
        if total_size == 0 || total_size == INVALID {
            return Err(FreeListError::InvalidTotalSize(total_size));
        }

        // Links are u32 with NIL reserved; anything past that is unusable.
        let usable = nodes.len().min(NIL as usize);
        let mut list = Self {
            nodes: &mut nodes[..usable],
            total_size,
            head: NIL,
        };
        list.clear();
        Ok(list)
    }

    /// Reset to one free block covering the whole tracked space.
    pub fn clear(&mut self) {
        self.nodes.fill(FreeNode::RECYCLED);
        self.nodes[0] = FreeNode {
            size: self.total_size,
            offset: 0,
            next: NIL,
        };
        self.head = 0;
    }

    /// First-fit allocation of `size` bytes. Returns the offset of the block.
    ///
    /// # Errors
    ///
    /// [`FreeListError::ZeroSize`] for an empty request and
    /// [`FreeListError::OutOfSpace`] if no single free block is large enough.
    pub fn allocate(&mut self, size: u64) -> Result<u64, FreeListError> {
        if size == 0 {
            return Err(FreeListError::ZeroSize);
        }

        let mut prev = NIL;
        let mut cur = self.head;
        while cur != NIL {
            let node = self.nodes[cur as usize];
            if node.size == size {
                self.set_next(prev, node.next);
                self.nodes[cur as usize] = FreeNode::RECYCLED;
                return Ok(node.offset);
            }
            if node.size > size {
                let slot = &mut self.nodes[cur as usize];
                slot.offset += size;
                slot.size -= size;
                return Ok(node.offset);
            }
            prev = cur;
            cur = node.next;
        }

        let free_space = self.free_space();
        log::debug!("freelist has no block of {size} bytes (free space {free_space})");
        Err(FreeListError::OutOfSpace {
            requested: size,
            free_space,
        })
    }

    /// Return `[offset, offset + size)` to the list, merging with adjacent
    /// free blocks.
    ///
    /// # Errors
    ///
    /// Rejects empty or out-of-range ranges, double frees, ranges that overlap
    /// a free block, and running out of nodes. The list is unchanged on error.
    pub fn free(&mut self, size: u64, offset: u64) -> Result<(), FreeListError> {
        if size == 0 {
            return Err(FreeListError::ZeroSize);
        }
        if offset == INVALID {
            return Err(FreeListError::InvalidOffset);
        }
        let end = match offset.checked_add(size) {
            Some(end) if end <= self.total_size => end,
            _ => {
                log::warn!(
                    "freelist free of {size} bytes at offset {offset} exceeds tracked size {}",
                    self.total_size
                );
                return Err(FreeListError::OutOfRange {
                    offset,
                    size,
                    total_size: self.total_size,
                });
            }
        };

        // `cur` is the first block at or after `offset`, `prev` the one before.
        let mut prev = NIL;
        let mut cur = self.head;
        while cur != NIL && self.nodes[cur as usize].offset < offset {
            prev = cur;
            cur = self.nodes[cur as usize].next;
        }

        if cur != NIL {
            let next = self.nodes[cur as usize];
            if next.offset == offset {
                log::warn!("freelist double free at offset {offset} ({size} bytes)");
                return Err(FreeListError::DoubleFree { offset });
            }
            if end > next.offset {
                log::warn!(
                    "freelist free at offset {offset} ({size} bytes) overlaps free block at {}",
                    next.offset
                );
                return Err(FreeListError::Overlap { offset, size });
            }
        }
        if prev != NIL {
            let before = self.nodes[prev as usize];
            if before.offset + before.size > offset {
                log::warn!(
                    "freelist free at offset {offset} ({size} bytes) overlaps free block at {}",
                    before.offset
                );
                return Err(FreeListError::Overlap { offset, size });
            }
        }

        let merge_prev = prev != NIL && {
            let before = self.nodes[prev as usize];
            before.offset + before.size == offset
        };
        let merge_next = cur != NIL && self.nodes[cur as usize].offset == end;

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.nodes[cur as usize];
                let before = &mut self.nodes[prev as usize];
                before.size += size + next.size;
                before.next = next.next;
                self.nodes[cur as usize] = FreeNode::RECYCLED;
            }
            (true, false) => {
                self.nodes[prev as usize].size += size;
            }
            (false, true) => {
                let next = &mut self.nodes[cur as usize];
                next.offset = offset;
                next.size += size;
            }
            (false, false) => {
                let Some(index) = self.acquire_node() else {
                    log::warn!(
                        "freelist out of nodes ({}) freeing {size} bytes at offset {offset}",
                        self.nodes.len()
                    );
                    return Err(FreeListError::NodesExhausted(self.nodes.len()));
                };
                self.nodes[index as usize] = FreeNode {
                    size,
                    offset,
                    next: cur,
                };
                self.set_next(prev, index);
            }
        }

        Ok(())
    }

    /// Grow the tracked space to `new_total_size`, freeing the added tail.
    ///
    /// The node array is not reallocated; it must already be large enough
    /// for the new size to be useful.
    ///
    /// # Errors
    ///
    /// Shrinking is rejected. Growth fails if a node is needed for the new
    /// tail and none is available; the list is unchanged on error.
    pub fn resize(&mut self, new_total_size: u64) -> Result<(), FreeListError> {
        let old_total_size = self.total_size;
        if new_total_size < old_total_size {
            return Err(FreeListError::Shrink {
                current: old_total_size,
                requested: new_total_size,
            });
        }
        if new_total_size == old_total_size {
            return Ok(());
        }
        if new_total_size == INVALID {
            return Err(FreeListError::InvalidTotalSize(new_total_size));
        }

        self.total_size = new_total_size;
        if let Err(e) = self.free(new_total_size - old_total_size, old_total_size) {
            self.total_size = old_total_size;
            return Err(e);
        }
        Ok(())
    }

    /// Sum of all free block sizes. O(n).
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.iter().map(|b| b.size).sum()
    }

    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Number of linked (free) nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn max_node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Free blocks in ascending offset order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            nodes: self.nodes,
            cur: self.head,
        }
    }

    fn set_next(&mut self, prev: u32, next: u32) {
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
    }

    fn acquire_node(&self) -> Option<u32> {
        self.nodes
            .iter()
            .position(FreeNode::is_recycled)
            .and_then(|i| u32::try_from(i).ok())
    }

    #[cfg(test)]
    pub(crate) fn assert_well_formed(&self) {
        let blocks: Vec<FreeBlock> = self.iter().collect();
        for b in &blocks {
            assert!(b.size > 0, "empty free block {b:?}");
            assert!(b.end() <= self.total_size, "block {b:?} past {}", self.total_size);
        }
        for w in blocks.windows(2) {
            assert!(
                w[0].end() < w[1].offset,
                "blocks {:?} and {:?} overlap or touch",
                w[0],
                w[1]
            );
        }
        let recycled = self.nodes.iter().filter(|n| n.is_recycled()).count();
        assert_eq!(recycled + blocks.len(), self.nodes.len());
    }
}

pub struct Iter<'l> {
    nodes: &'l [FreeNode],
    cur: u32,
}

impl Iterator for Iter<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        if self.cur == NIL {
            return None;
        }
        let node = self.nodes[self.cur as usize];
        self.cur = node.next;
        Some(FreeBlock {
            offset: node.offset,
            size: node.size,
        })
    }
}
