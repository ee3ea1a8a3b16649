/// Stack size.
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

/// A byte buffer with a **guaranteed 16-byte alignment**.
///
/// The SysV ABI wants `RSP` 16-byte aligned at call boundaries.
#[repr(align(16))]
pub struct Aligned16<const N: usize>([u8; N]);

/// Early **boot stack** in a dedicated BSS section, used by the bootstrap CPU.
///
/// It lies inside the kernel image, so the identity map built during memory
/// initialization keeps covering it across the CR3 switch.
///
/// # Safety
/// Only touched by the entry stub, which takes sole ownership of it.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
pub static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

const _: () = assert!(
    BOOT_STACK_SIZE.is_multiple_of(16),
    "BOOT_STACK_SIZE should be 16-byte aligned"
);
