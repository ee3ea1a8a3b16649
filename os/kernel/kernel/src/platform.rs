//! The CPU and memory access as seen from the early kernel.

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::cr3::Cr3;
use kernel_vmem::{PhysMapper, Platform};

/// Bare-metal x86-64.
pub struct X86Platform;

impl Platform for X86Platform {
    unsafe fn load_root_table(&mut self, root: PhysicalPage<Size4K>) {
        unsafe { Cr3::from_root_table(root).store_unsafe() }
    }

    fn halt_forever(&mut self) -> ! {
        loop {
            unsafe {
                core::arch::asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
            }
        }
    }
}

/// Physical addresses are usable as-is: the kernel runs identity mapped.
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *(pa.as_u64() as usize as *mut T) }
    }

    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(pa.as_u64() as usize as *mut u8, len) }
    }
}
