//! Allocation statistics.
//!
//! Every [`Allocator`](super::allocator::Allocator) keeps a private
//! [`AllocatorStatistics`] and also reports into a shared
//! [`GlobalStatistics`] handed to it at construction.
//!
//! The shared counters use `Relaxed` ordering. Individual counter values are
//! eventually consistent. Cross-counter snapshots may be transiently
//! inconsistent (e.g., `total_allocated` may briefly disagree with the sum
//! of the per-tag byte counts). This is acceptable for diagnostic display.
//! Do NOT use these values for allocation decisions.

use crate::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

/// What an allocation is for. Used only to bucket statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MemoryTag {
    Unknown,
    Array,
    DynamicArray,
    HashTable,
    Queue,
    String,
    Engine,
    Job,
    Texture,
    Material,
    Renderer,
    Game,
    Transform,
    Entity,
    Scene,
    Resource,
    Vulkan,
    GpuLocal,
    Platform,
    Ui,
}

impl MemoryTag {
    pub const COUNT: usize = 20;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Unknown,
        Self::Array,
        Self::DynamicArray,
        Self::HashTable,
        Self::Queue,
        Self::String,
        Self::Engine,
        Self::Job,
        Self::Texture,
        Self::Material,
        Self::Renderer,
        Self::Game,
        Self::Transform,
        Self::Entity,
        Self::Scene,
        Self::Resource,
        Self::Vulkan,
        Self::GpuLocal,
        Self::Platform,
        Self::Ui,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Array => "ARRAY",
            Self::DynamicArray => "DYNAMIC_ARRAY",
            Self::HashTable => "HASH_TABLE",
            Self::Queue => "QUEUE",
            Self::String => "STRING",
            Self::Engine => "ENGINE",
            Self::Job => "JOB",
            Self::Texture => "TEXTURE",
            Self::Material => "MATERIAL",
            Self::Renderer => "RENDERER",
            Self::Game => "GAME",
            Self::Transform => "TRANSFORM",
            Self::Entity => "ENTITY",
            Self::Scene => "SCENE",
            Self::Resource => "RESOURCE",
            Self::Vulkan => "VULKAN",
            Self::GpuLocal => "GPU_LOCAL",
            Self::Platform => "PLATFORM",
            Self::Ui => "UI",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// Raw tag value outside `0..MemoryTag::COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid memory tag {0}")]
pub struct InvalidTag(pub u32);

impl TryFrom<u32> for MemoryTag {
    type Error = InvalidTag;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::ALL.get(raw as usize).copied().ok_or(InvalidTag(raw))
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte count rendered as Bytes, KB, MB or GB (base 1024).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        let bytes = self.0;
        if bytes >= GB {
            write!(f, "{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            write!(f, "{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            write!(f, "{:.2} KB", bytes as f64 / KB as f64)
        } else {
            write!(f, "{bytes} Bytes")
        }
    }
}

/// Counters for one allocator, or a snapshot of the shared aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorStatistics {
    pub total_allocs: u64,
    pub total_frees: u64,
    pub total_reallocs: u64,
    pub total_sets: u64,
    pub total_zeros: u64,
    pub total_copies: u64,
    pub total_allocated: u64,
    pub tagged_allocs: [u64; MemoryTag::COUNT],
    pub tagged_allocated: [u64; MemoryTag::COUNT],
}

impl Default for AllocatorStatistics {
    fn default() -> Self {
        Self {
            total_allocs: 0,
            total_frees: 0,
            total_reallocs: 0,
            total_sets: 0,
            total_zeros: 0,
            total_copies: 0,
            total_allocated: 0,
            tagged_allocs: [0; MemoryTag::COUNT],
            tagged_allocated: [0; MemoryTag::COUNT],
        }
    }
}

impl AllocatorStatistics {
    #[must_use]
    pub fn allocs(&self, tag: MemoryTag) -> u64 {
        self.tagged_allocs[tag.index()]
    }

    #[must_use]
    pub fn allocated(&self, tag: MemoryTag) -> u64 {
        self.tagged_allocated[tag.index()]
    }

    pub(crate) fn record_alloc(&mut self, tag: MemoryTag, size: u64) {
        let i = tag.index();
        self.total_allocs = self.total_allocs.saturating_add(1);
        self.tagged_allocs[i] = self.tagged_allocs[i].saturating_add(1);
        self.tagged_allocated[i] = self.tagged_allocated[i].saturating_add(size);
        self.total_allocated = self.total_allocated.saturating_add(size);
    }

    pub(crate) fn record_free(&mut self, tag: MemoryTag, size: u64, exact: bool) {
        self.total_frees = self.total_frees.saturating_add(1);
        if !exact {
            return;
        }
        let i = tag.index();
        self.total_allocs = self.total_allocs.saturating_sub(1);
        self.tagged_allocs[i] = self.tagged_allocs[i].saturating_sub(1);
        self.tagged_allocated[i] = self.tagged_allocated[i].saturating_sub(size);
        self.total_allocated = self.total_allocated.saturating_sub(size);
    }

    pub(crate) fn record_realloc(&mut self, tag: MemoryTag, old_size: u64, new_size: u64) {
        self.total_reallocs = self.total_reallocs.saturating_add(1);
        if old_size == 0 {
            self.record_alloc(tag, new_size);
            return;
        }
        let i = tag.index();
        self.tagged_allocated[i] = apply_delta(self.tagged_allocated[i], old_size, new_size);
        self.total_allocated = apply_delta(self.total_allocated, old_size, new_size);
    }

    pub(crate) fn record_set(&mut self) {
        self.total_sets = self.total_sets.saturating_add(1);
    }

    pub(crate) fn record_zero(&mut self) {
        self.total_zeros = self.total_zeros.saturating_add(1);
    }

    pub(crate) fn record_copy(&mut self) {
        self.total_copies = self.total_copies.saturating_add(1);
    }
}

/// `value - old + new`, floored at zero.
fn apply_delta(value: u64, old_size: u64, new_size: u64) -> u64 {
    if new_size >= old_size {
        value.saturating_add(new_size - old_size)
    } else {
        value.saturating_sub(old_size - new_size)
    }
}

impl fmt::Display for AllocatorStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "allocs: {}, frees: {}, reallocs: {}, sets: {}, zeros: {}, copies: {}",
            self.total_allocs,
            self.total_frees,
            self.total_reallocs,
            self.total_sets,
            self.total_zeros,
            self.total_copies
        )?;
        writeln!(f, "total allocated: {}", ByteSize(self.total_allocated))?;
        for tag in MemoryTag::ALL {
            writeln!(
                f,
                "  {:<14} {:>8} allocs  {}",
                tag.name(),
                self.allocs(tag),
                ByteSize(self.allocated(tag))
            )?;
        }
        Ok(())
    }
}

/// Emit the report through `log::info!`, one line per entry.
pub(crate) fn log_report(title: &str, stats: &AllocatorStatistics) {
    log::info!("{title}");
    for line in stats.to_string().lines() {
        log::info!("{line}");
    }
}

/// Diagnostic-only counter.
///
/// Subtraction saturates at zero through a CAS loop, so a decrement that
/// races ahead of its increment leaves zero rather than wrapping.
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub(crate) fn add(&self, val: u64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_add(val))
            });
    }

    #[inline]
    pub(crate) fn sub_saturating(&self, val: u64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(val))
            });
    }

    #[inline]
    pub(crate) fn apply_delta(&self, old_size: u64, new_size: u64) {
        if new_size >= old_size {
            self.add(new_size - old_size);
        } else {
            self.sub_saturating(old_size - new_size);
        }
    }

    #[inline]
    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Aggregate counters shared by every allocator bound to them.
///
/// Hand the same `Arc<GlobalStatistics>` to several allocators (directly or
/// through [`MemoryManager`](super::manager::MemoryManager)) to see their
/// combined activity.
pub struct GlobalStatistics {
    total_allocs: Counter,
    total_frees: Counter,
    total_reallocs: Counter,
    total_sets: Counter,
    total_zeros: Counter,
    total_copies: Counter,
    total_allocated: Counter,
    tagged_allocs: [Counter; MemoryTag::COUNT],
    tagged_allocated: [Counter; MemoryTag::COUNT],
}

impl Default for GlobalStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GlobalStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStatistics")
            .field("total_allocs", &self.total_allocs.get())
            .field("total_frees", &self.total_frees.get())
            .field("total_allocated", &self.total_allocated.get())
            .finish_non_exhaustive()
    }
}

impl GlobalStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_allocs: Counter::new(),
            total_frees: Counter::new(),
            total_reallocs: Counter::new(),
            total_sets: Counter::new(),
            total_zeros: Counter::new(),
            total_copies: Counter::new(),
            total_allocated: Counter::new(),
            tagged_allocs: std::array::from_fn(|_| Counter::new()),
            tagged_allocated: std::array::from_fn(|_| Counter::new()),
        }
    }

    /// Copy every counter out. Not atomic across counters.
    #[must_use]
    pub fn snapshot(&self) -> AllocatorStatistics {
        AllocatorStatistics {
            total_allocs: self.total_allocs.get(),
            total_frees: self.total_frees.get(),
            total_reallocs: self.total_reallocs.get(),
            total_sets: self.total_sets.get(),
            total_zeros: self.total_zeros.get(),
            total_copies: self.total_copies.get(),
            total_allocated: self.total_allocated.get(),
            tagged_allocs: std::array::from_fn(|i| self.tagged_allocs[i].get()),
            tagged_allocated: std::array::from_fn(|i| self.tagged_allocated[i].get()),
        }
    }

    pub(crate) fn record_alloc(&self, tag: MemoryTag, size: u64) {
        let i = tag.index();
        self.total_allocs.add(1);
        self.tagged_allocs[i].add(1);
        self.tagged_allocated[i].add(size);
        self.total_allocated.add(size);
    }

    pub(crate) fn record_free(&self, tag: MemoryTag, size: u64, exact: bool) {
        self.total_frees.add(1);
        if !exact {
            return;
        }
        let i = tag.index();
        self.total_allocs.sub_saturating(1);
        self.tagged_allocs[i].sub_saturating(1);
        self.tagged_allocated[i].sub_saturating(size);
        self.total_allocated.sub_saturating(size);
    }

    pub(crate) fn record_realloc(&self, tag: MemoryTag, old_size: u64, new_size: u64) {
        self.total_reallocs.add(1);
        if old_size == 0 {
            self.record_alloc(tag, new_size);
            return;
        }
        self.tagged_allocated[tag.index()].apply_delta(old_size, new_size);
        self.total_allocated.apply_delta(old_size, new_size);
    }

    pub(crate) fn record_set(&self) {
        self.total_sets.add(1);
    }

    pub(crate) fn record_zero(&self) {
        self.total_zeros.add(1);
    }

    pub(crate) fn record_copy(&self) {
        self.total_copies.add(1);
    }

    /// Log the aggregate report at `info` level.
    pub fn print(&self) {
        log_report("global allocator statistics", &self.snapshot());
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_tag_try_from() {
        assert_eq!(MemoryTag::try_from(0), Ok(MemoryTag::Unknown));
        assert_eq!(MemoryTag::try_from(8), Ok(MemoryTag::Texture));
        assert_eq!(MemoryTag::try_from(19), Ok(MemoryTag::Ui));
        assert_eq!(MemoryTag::try_from(20), Err(InvalidTag(20)));
        for (i, tag) in MemoryTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }

    #[test]
    fn test_byte_size_scaling() {
        assert_eq!(ByteSize(0).to_string(), "0 Bytes");
        assert_eq!(ByteSize(1023).to_string(), "1023 Bytes");
        assert_eq!(ByteSize(1536).to_string(), "1.50 KB");
        assert_eq!(ByteSize(5 * 1024 * 1024).to_string(), "5.00 MB");
        assert_eq!(ByteSize(3 * 1024 * 1024 * 1024).to_string(), "3.00 GB");
    }

    #[test]
    fn test_record_alloc_and_exact_free() {
        let mut s = AllocatorStatistics::default();
        s.record_alloc(MemoryTag::Texture, 100);
        s.record_alloc(MemoryTag::Texture, 50);
        s.record_alloc(MemoryTag::Job, 8);
        assert_eq!(s.allocs(MemoryTag::Texture), 2);
        assert_eq!(s.allocated(MemoryTag::Texture), 150);
        assert_eq!(s.total_allocated, 158);

        s.record_free(MemoryTag::Texture, 100, true);
        assert_eq!(s.total_frees, 1);
        assert_eq!(s.total_allocs, 2);
        assert_eq!(s.allocated(MemoryTag::Texture), 50);
        assert_eq!(s.total_allocated, 58);
    }

    #[test]
    fn test_record_free_saturates_and_arena_skips() {
        let mut s = AllocatorStatistics::default();
        s.record_free(MemoryTag::Game, 64, true);
        assert_eq!(s.total_allocs, 0);
        assert_eq!(s.total_allocated, 0);
        assert_eq!(s.total_frees, 1);

        s.record_alloc(MemoryTag::Game, 64);
        s.record_free(MemoryTag::Game, 64, false);
        assert_eq!(s.total_allocs, 1);
        assert_eq!(s.total_allocated, 64);
        assert_eq!(s.total_frees, 2);
    }

    #[test]
    fn test_record_realloc() {
        let mut s = AllocatorStatistics::default();
        s.record_realloc(MemoryTag::String, 0, 32);
        assert_eq!(s.total_reallocs, 1);
        assert_eq!(s.total_allocs, 1);
        assert_eq!(s.total_allocated, 32);

        s.record_realloc(MemoryTag::String, 32, 48);
        assert_eq!(s.total_allocated, 48);
        s.record_realloc(MemoryTag::String, 48, 16);
        assert_eq!(s.allocated(MemoryTag::String), 16);
        // Shrinking past zero floors.
        s.record_realloc(MemoryTag::String, 1000, 0);
        assert_eq!(s.total_allocated, 0);
        assert_eq!(s.total_allocs, 1);
    }

    #[test]
    fn test_global_matches_local() {
        let global = GlobalStatistics::new();
        let mut local = AllocatorStatistics::default();
        for (tag, size) in [(MemoryTag::Scene, 10), (MemoryTag::Ui, 20), (MemoryTag::Scene, 5)] {
            global.record_alloc(tag, size);
            local.record_alloc(tag, size);
        }
        global.record_realloc(MemoryTag::Ui, 20, 4);
        local.record_realloc(MemoryTag::Ui, 20, 4);
        global.record_free(MemoryTag::Scene, 10, true);
        local.record_free(MemoryTag::Scene, 10, true);
        global.record_set();
        local.record_set();
        global.record_copy();
        local.record_copy();
        global.record_zero();
        local.record_zero();
        assert_eq!(global.snapshot(), local);
    }

    #[test]
    fn test_counter_saturates() {
        let c = Counter::new();
        c.add(5);
        c.sub_saturating(8);
        assert_eq!(c.get(), 0);
        c.apply_delta(0, 7);
        c.apply_delta(7, 3);
        assert_eq!(c.get(), 3);

        c.add(u64::MAX - 1);
        assert_eq!(c.get(), u64::MAX);
        c.add(1);
        assert_eq!(c.get(), u64::MAX);
    }

    #[test]
    fn test_report_has_line_per_tag() {
        let mut s = AllocatorStatistics::default();
        s.record_alloc(MemoryTag::Texture, 2048);
        let report = s.to_string();
        assert_eq!(report.lines().count(), 2 + MemoryTag::COUNT);
        assert!(report.contains("TEXTURE"));
        assert!(report.contains("2.00 KB"));
    }
}
