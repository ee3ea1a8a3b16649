//! # Memory Layout

/// Size of a physical frame and of every page-table page.
pub const PAGE_SIZE: u64 = 4096;

/// Where the kernel image is placed in *physical* memory.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Everything below this address is identity mapped by the bootloader when
/// the kernel is entered. Page tables built before the CR3 switch must live
/// below it.
pub const EARLY_IDENTITY_LIMIT: u64 = 1 << 30; // 1 GiB

/// Bytes set aside right after the kernel image for page-table pages.
///
/// 64 MiB covers the tables needed to identity map 64 GiB of RAM with 4 KiB
/// pages (one PT per 2 MiB).
pub const PAGE_TABLE_RESERVE_BYTES: u64 = 64 * 1024 * 1024;

/// Progress of the identity map build is logged every this many bytes.
pub const IDENTITY_MAP_PROGRESS_STEP: u64 = 256 * 1024 * 1024;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(EARLY_IDENTITY_LIMIT.is_multiple_of(PAGE_SIZE));
    assert!(PAGE_TABLE_RESERVE_BYTES.is_multiple_of(PAGE_SIZE));
    assert!(PHYS_LOAD + PAGE_TABLE_RESERVE_BYTES < EARLY_IDENTITY_LIMIT);
    assert!(IDENTITY_MAP_PROGRESS_STEP.is_multiple_of(PAGE_SIZE));
};
