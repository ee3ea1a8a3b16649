//! # Page-Table Arena
//!
//! A trivial **bump** allocator over a physical range reserved for page
//! tables. It only keeps a cursor and "bumps" it by 4 KiB on every
//! allocation: no free list, no reuse. Perfect for building the boot-time
//! identity map, where tables live forever.

use crate::FrameAlloc;
use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K};

/// Bump allocator for page-table pages.
///
/// ### Invariants
/// - `start <= next <= limit`, all 4 KiB aligned.
/// - Every page in `[start, next)` has been handed out exactly once.
#[derive(Debug)]
pub struct PageTableArena {
    start: PhysicalAddress,
    next: PhysicalAddress,
    limit: PhysicalAddress,
}

impl PageTableArena {
    /// Create an arena over `[start, limit)`, shrunk inward to whole pages.
    #[must_use]
    pub const fn new(start: PhysicalAddress, limit: PhysicalAddress) -> Self {
        let start = start.align_up::<Size4K>();
        let limit = limit.align_down::<Size4K>();
        let limit = if limit.as_u64() < start.as_u64() {
            start
        } else {
            limit
        };
        Self {
            start,
            next: start,
            limit,
        }
    }

    /// Hand out the next page, or `None` once the arena is exhausted.
    pub fn alloc_page(&mut self) -> Option<PhysicalPage<Size4K>> {
        let Some(after) = self.next.checked_add(Size4K::SIZE) else {
            self.log_exhausted();
            return None;
        };
        if after > self.limit {
            self.log_exhausted();
            return None;
        }

        let page = PhysicalPage::containing(self.next);
        self.next = after;
        Some(page)
    }

    /// The whole reserved range `[start, limit)`.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> PhysicalRange {
        PhysicalRange::new(self.start, self.limit)
    }

    /// The pages handed out so far, `[start, next)`.
    #[inline]
    #[must_use]
    pub const fn used_range(&self) -> PhysicalRange {
        PhysicalRange::new(self.start, self.next)
    }

    #[inline]
    #[must_use]
    pub const fn pages_allocated(&self) -> u64 {
        self.used_range().page_count::<Size4K>()
    }

    #[inline]
    #[must_use]
    pub const fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            used_bytes: self.used_range().len(),
            total_bytes: self.range().len(),
        }
    }

    fn log_exhausted(&self) {
        log::error!(
            "Page-table arena exhausted: next={:#x} limit={:#x} ({})",
            self.next.as_u64(),
            self.limit.as_u64(),
            self.usage()
        );
    }
}

impl FrameAlloc for PageTableArena {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_page()
    }
}

/// How much of an arena has been consumed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ArenaUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl ArenaUsage {
    /// Used share in whole percent; zero for an empty arena.
    #[must_use]
    pub const fn percent_used(&self) -> u64 {
        if self.total_bytes == 0 {
            0
        } else {
            self.used_bytes * 100 / self.total_bytes
        }
    }
}

impl fmt::Display for ArenaUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} KiB / {} KiB used ({}%)",
            self.used_bytes / 1024,
            self.total_bytes / 1024,
            self.percent_used()
        )
    }
}
