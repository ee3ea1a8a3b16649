use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 64-bit x86-64 page-table entry in its raw bitfield form.
///
/// This models the common superset of the fields found at all four paging
/// levels (PML4E, PDPTE, PDE, PTE). Only 4 KiB mappings are ever created, so
/// `large_page` is always clear in entries written by this crate.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag |
/// | 8         | `G`               | Global (leaf only) |
/// | 9–11      | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–62     | OS avail high     | Reserved for OS use / protection key |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
/// # use kernel_vmem::PageTableEntry;
/// let page = PhysicalPage::containing(PhysicalAddress::new(0x12_3456));
/// let e = PageTableEntry::identity_leaf(page);
/// assert_eq!(e.into_bits(), 0x12_3003);
/// assert!(e.present() && e.writable() && !e.user_access());
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Set to allow user-mode access.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6), leaf only.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Must be clear for 4 KiB mappings and table links.
    pub large_page: bool,

    /// Global (G, bit 8), leaf only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available / protection key (bits 52..=62).
    #[bits(11)]
    pub os_available_high: u16,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Mask of the physical address bits of an entry.
    pub const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Kernel read/write, present, nothing else.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// A non-leaf entry linking to the next-level table at `table`.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalPage<Size4K>) -> Self {
        let mut e = Self::new_kernel_rw();
        e.set_physical_address(table.base());
        e
    }

    /// A 4 KiB leaf mapping `page` to itself.
    #[inline]
    #[must_use]
    pub const fn identity_leaf(page: PhysicalPage<Size4K>) -> Self {
        let mut e = Self::new_kernel_rw();
        e.set_physical_address(page.base());
        e
    }

    /// The next-level table, if this non-leaf entry is present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<Size4K>> {
        if self.present() {
            Some(PhysicalPage::containing(self.physical_address()))
        } else {
            None
        }
    }
}
