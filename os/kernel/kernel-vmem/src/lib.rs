//! # Early Virtual Memory Support
//!
//! x86-64 paging helpers for the kernel's first address space: an identity
//! map of all usable RAM built from 4 KiB pages.
//!
//! ## What you get
//! - A [`PageTableEntry`] bitfield and a 4 KiB-aligned [`PageTable`].
//! - A bump [`PageTableArena`] handing out page-table pages from a reserved range.
//! - The [`IdentityMapper`] that builds the hierarchy and switches CR3 to it.
//! - The seams to the outside world: [`FrameAlloc`], [`PhysMapper`] and [`Platform`].
//!
//! ## x86-64 Address Walk
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   (Page Table Entry)  → maps 4 KiB page
//!   │        │        └────────────► PDE   (Page Directory Entry)
//!   │        └─────────────────────► PDPTE (Page Directory Pointer Table Entry)
//!   └──────────────────────────────► PML4E (Page Map Level 4 Entry)
//! ```
//!
//! Each level is a table of 512 (2⁹) entries of 8 bytes. Under an identity
//! map the "virtual" address being translated equals the physical one, so
//! indices are taken straight from a [`PhysicalAddress`].
//!
//! ## Host testing
//!
//! With the `sim` feature (and in this crate's own tests), the [`sim`] module
//! provides a sparse simulated physical memory implementing [`PhysMapper`]
//! and a [`Platform`] that records what would have been loaded into CR3.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

mod arena;
mod identity;
mod page_entry;
mod page_table;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use crate::arena::{ArenaUsage, PageTableArena};
pub use crate::identity::{IdentityMap, IdentityMapper, MappingError};
pub use crate::page_entry::PageTableEntry;
pub use crate::page_table::{ENTRIES_PER_TABLE, PageTable, PageTableLevel, TableIndex};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames.
///
/// The implementation decides where frames come from (a reserved arena, the
/// frame bitmap, ...). Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Converts physical addresses to usable references in the current address space.
///
/// During early boot the kernel runs identity mapped, so the kernel's
/// implementation simply reinterprets the address. Tests back it with
/// [`sim::SimulatedMemory`].
pub trait PhysMapper {
    /// Borrow the `T` stored at `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space for `'a`.
    /// - `pa` must be suitably aligned for `T` and the bytes must be a valid `T`.
    /// - No other live reference may alias the same bytes.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow `len` bytes starting at `pa`.
    ///
    /// # Safety
    /// As for [`PhysMapper::phys_to_mut`], for the whole byte range.
    unsafe fn phys_to_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8];
}

/// The two privileged operations the memory subsystem needs from the CPU.
pub trait Platform {
    /// Load `root` into the root-table register (CR3), activating it.
    ///
    /// # Safety
    /// The hierarchy rooted at `root` must map the currently executing code,
    /// its stack and every structure still in use, at their current addresses.
    unsafe fn load_root_table(&mut self, root: PhysicalPage<Size4K>);

    /// Stop the CPU for good.
    fn halt_forever(&mut self) -> !;
}

/// Borrow the page table stored in `page`.
///
/// # Safety
/// - `page` must hold a page table (or be about to be zeroed into one).
/// - See [`PhysMapper::phys_to_mut`].
#[inline]
unsafe fn table_mut<'a, M: PhysMapper>(m: &M, page: PhysicalPage<Size4K>) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}
