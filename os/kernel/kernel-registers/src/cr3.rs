use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the physical base of the root page table (PML4) and the cache-control
/// flags used when the CPU walks it. Writing CR3 switches the active
/// translation hierarchy and flushes all non-global TLB entries.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: reserved (must be 0).
    #[bits(3)]
    __: u8,

    /// Bit 3: PWT, page-level write-through for the root table.
    pub pwt: bool,

    /// Bit 4: PCD, page-level cache disable for the root table.
    pub pcd: bool,

    /// Bits 5–11: reserved (must be 0 when written).
    #[bits(7)]
    __: u8,

    /// Bits 12–51: physical frame number of the root table.
    #[bits(40)]
    root_frame: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` with write-back caching.
    #[must_use]
    pub const fn from_root_table(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_root_frame(root.frame_index())
    }

    /// The root page table this value points at.
    #[must_use]
    pub const fn root_table(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_index(self.root_frame())
    }

    /// Physical address of the root table.
    #[must_use]
    pub const fn root_table_address(&self) -> PhysicalAddress {
        self.root_table().base()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
