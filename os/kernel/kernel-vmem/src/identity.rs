//! # Identity Map Builder
//!
//! Builds a 4-level hierarchy mapping every 4 KiB page of `[0, map_end)` to
//! itself (present, writable, supervisor) and hands the root to the
//! [`Platform`] to activate.
//!
//! ## Procedure
//!
//! - The PML4 and every intermediate table come from a [`PageTableArena`].
//! - Each table page is zeroed before anything links to it; arena memory is
//!   never assumed to be clean.
//! - Non-present PML4/PDPT/PD entries get a fresh table, linked with
//!   present|writable. Leaves are written unconditionally.
//! - All table pages are written through the [`PhysMapper`] while the
//!   bootloader's identity map is still active, which is why the arena must
//!   lie below the early identity limit.
//! - Any failure leaves the CPU on the old tables.

use crate::info::IDENTITY_MAP_PROGRESS_STEP;
use crate::{
    ArenaUsage, PageTableArena, PageTableEntry, PageTableLevel, PhysMapper, Platform, table_mut,
};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// Why an identity map could not be built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("nothing to map")]
    EmptyRange,
    #[error("page-table arena at {arena_start:#x} lies outside the early identity map (< {early_limit:#x})")]
    ArenaOutsideEarlyMap {
        arena_start: PhysicalAddress,
        early_limit: PhysicalAddress,
    },
    #[error("page-table arena exhausted allocating a {level} table for {addr:#x}")]
    ArenaExhausted {
        level: PageTableLevel,
        addr: PhysicalAddress,
    },
}

/// Builds identity maps through a [`PhysMapper`].
pub struct IdentityMapper<'m, M: PhysMapper> {
    mapper: &'m M,
    early_limit: PhysicalAddress,
}

impl<'m, M: PhysMapper> IdentityMapper<'m, M> {
    /// `early_identity_limit` is the end of the range the bootloader has
    /// identity mapped; page tables are only ever written below it.
    #[must_use]
    pub const fn new(mapper: &'m M, early_identity_limit: PhysicalAddress) -> Self {
        Self {
            mapper,
            early_limit: early_identity_limit,
        }
    }

    /// Build the hierarchy for `[0, map_end)` with tables taken from
    /// `[arena_start, arena_limit)`, without activating it.
    ///
    /// # Errors
    /// - [`MappingError::EmptyRange`] if `map_end` is zero.
    /// - [`MappingError::ArenaOutsideEarlyMap`] if the arena starts at or above the early limit.
    /// - [`MappingError::ArenaExhausted`] if the arena runs out of pages.
    ///
    /// # Safety
    /// The arena range must be writable through the mapper and must not
    /// contain anything still in use.
    pub unsafe fn prepare(
        &self,
        map_end: PhysicalAddress,
        arena_start: PhysicalAddress,
        arena_limit: PhysicalAddress,
    ) -> Result<IdentityMap, MappingError> {
        if map_end.is_zero() {
            return Err(MappingError::EmptyRange);
        }
        if arena_start >= self.early_limit {
            return Err(MappingError::ArenaOutsideEarlyMap {
                arena_start,
                early_limit: self.early_limit,
            });
        }
        let arena_limit = if arena_limit > self.early_limit {
            log::warn!(
                "Page-table arena end {:#x} clamped to early identity limit {:#x}",
                arena_limit.as_u64(),
                self.early_limit.as_u64()
            );
            self.early_limit
        } else {
            arena_limit
        };

        let map_end = map_end.align_up::<Size4K>();
        let mut arena = PageTableArena::new(arena_start, arena_limit);
        log::info!(
            "Identity mapping [0, {:#x}) ({} MiB), page tables at {}",
            map_end.as_u64(),
            map_end.as_u64() >> 20,
            arena.range()
        );

        let root = unsafe { self.new_table(&mut arena, PageTableLevel::Pml4, PhysicalAddress::zero())? };

        let mut addr = PhysicalAddress::zero();
        while addr < map_end {
            unsafe { self.map_page(&mut arena, root, addr.page())? };
            addr += Size4K::SIZE;

            if addr.as_u64().is_multiple_of(IDENTITY_MAP_PROGRESS_STEP) {
                log::info!("  mapped {} MiB", addr.as_u64() >> 20);
            }
        }

        let map = IdentityMap {
            root,
            mapped_end: map_end,
            arena: arena.usage(),
            tables_allocated: arena.pages_allocated(),
        };
        log::info!(
            "Identity map ready: root {}, {} tables, arena {}",
            root,
            map.tables_allocated,
            map.arena
        );
        Ok(map)
    }

    /// [`prepare`](Self::prepare) the map and [`activate`](IdentityMap::activate) it.
    ///
    /// # Errors
    /// See [`IdentityMapper::prepare`]. On error nothing has been activated.
    ///
    /// # Safety
    /// See [`IdentityMapper::prepare`] and [`IdentityMap::activate`].
    pub unsafe fn build<P: Platform>(
        &self,
        map_end: PhysicalAddress,
        arena_start: PhysicalAddress,
        arena_limit: PhysicalAddress,
        platform: &mut P,
    ) -> Result<IdentityMap, MappingError> {
        let map = unsafe { self.prepare(map_end, arena_start, arena_limit)? };
        unsafe { map.activate(platform) };
        Ok(map)
    }

    /// Take a page from the arena and zero it.
    unsafe fn new_table(
        &self,
        arena: &mut PageTableArena,
        level: PageTableLevel,
        addr: PhysicalAddress,
    ) -> Result<PhysicalPage<Size4K>, MappingError> {
        let Some(page) = arena.alloc_page() else {
            log::error!("Out of page-table pages creating a {level} table for {addr:#x}");
            return Err(MappingError::ArenaExhausted { level, addr });
        };
        unsafe { table_mut(self.mapper, page).zero() };
        Ok(page)
    }

    /// Install the leaf for `page`, creating missing intermediate tables.
    unsafe fn map_page(
        &self,
        arena: &mut PageTableArena,
        root: PhysicalPage<Size4K>,
        page: PhysicalPage<Size4K>,
    ) -> Result<(), MappingError> {
        let addr = page.base();
        let mut table = root;

        for level in PageTableLevel::NON_LEAF {
            let current = unsafe { table_mut(self.mapper, table) };
            let index = level.index_of(addr);

            table = match current.get(index).next_table() {
                Some(next) => next,
                None => {
                    let child = level.next().unwrap_or(PageTableLevel::Pt);
                    let next = unsafe { self.new_table(arena, child, addr)? };
                    current.set(index, PageTableEntry::table_link(next));
                    next
                }
            };
        }

        let pt = unsafe { table_mut(self.mapper, table) };
        pt.set(
            PageTableLevel::Pt.index_of(addr),
            PageTableEntry::identity_leaf(page),
        );
        Ok(())
    }
}

/// A finished identity map.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdentityMap {
    /// The PML4.
    pub root: PhysicalPage<Size4K>,
    /// First address past the mapped range (page aligned).
    pub mapped_end: PhysicalAddress,
    pub arena: ArenaUsage,
    /// Table pages allocated, PML4 included.
    pub tables_allocated: u64,
}

impl IdentityMap {
    /// Load the root into CR3. This is the point of no return.
    ///
    /// # Safety
    /// See [`Platform::load_root_table`]: everything the CPU touches after the
    /// switch must lie within `[0, mapped_end)`.
    pub unsafe fn activate<P: Platform>(&self, platform: &mut P) {
        log::info!("Switching CR3 to {}", self.root);
        unsafe { platform.load_root_table(self.root) };
    }

    /// The leaf entry translating `addr`, if every level is present.
    ///
    /// # Safety
    /// `mapper` must give access to the tables of this map, and they must
    /// not have been modified by anything else.
    pub unsafe fn leaf_entry<M: PhysMapper>(
        &self,
        mapper: &M,
        addr: PhysicalAddress,
    ) -> Option<PageTableEntry> {
        let mut table = self.root;
        for level in PageTableLevel::NON_LEAF {
            let current = unsafe { table_mut(mapper, table) };
            table = current.get(level.index_of(addr)).next_table()?;
        }
        let pt = unsafe { table_mut(mapper, table) };
        let leaf = pt.get(PageTableLevel::Pt.index_of(addr));
        leaf.present().then_some(leaf)
    }

    /// Walk the hierarchy the way the CPU would.
    ///
    /// # Safety
    /// See [`IdentityMap::leaf_entry`].
    pub unsafe fn translate<M: PhysMapper>(
        &self,
        mapper: &M,
        addr: PhysicalAddress,
    ) -> Option<PhysicalAddress> {
        let leaf = unsafe { self.leaf_entry(mapper, addr)? };
        Some(leaf.physical_address() + addr.offset::<Size4K>())
    }
}
