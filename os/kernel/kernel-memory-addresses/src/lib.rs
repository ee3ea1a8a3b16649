//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw physical addresses handled during early
//! boot: frame boundaries, page-table pages, and reserved ranges.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address. |
//! | [`PhysicalPage<S>`] | The page-aligned base of a physical page of size `S`. |
//! | [`PhysicalRange`] | A half-open `[start, end)` span of physical memory. |
//!
//! Only the 4 KiB granularity ([`Size4K`]) is supported; the early memory
//! subsystem never maps or allocates anything larger.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0012_3456);
//! let page = pa.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0x0012_3000);
//! assert_eq!(page.frame_index(), 0x123);
//!
//! let kernel = PhysicalRange::new(PhysicalAddress::new(0x10_0000), PhysicalAddress::new(0x1F_F800));
//! assert_eq!(kernel.align_outward::<Size4K>().end().as_u64(), 0x20_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;
mod physical_range;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use physical_range::PhysicalRange;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1FFF, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two. Values in the last, partial multiple
/// of `a` saturate to the highest multiple of `a` instead of wrapping.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 0x1000), 0);
/// assert_eq!(align_up(1, 0x1000), 0x1000);
/// assert_eq!(align_up(0x1000, 0x1000), 0x1000);
/// assert_eq!(align_up(u64::MAX, 0x1000), 0xFFFF_FFFF_FFFF_F000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => align_down(u64::MAX, a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0, 4096), 0);
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(8191, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(0x12345, 16), 0x12350);
    }

    #[test]
    fn align_up_saturates_in_the_top_page() {
        assert_eq!(align_up(0xFFFF_FFFF_FFFF_F000, 4096), 0xFFFF_FFFF_FFFF_F000);
        assert_eq!(align_up(0xFFFF_FFFF_FFFF_F001, 4096), 0xFFFF_FFFF_FFFF_F000);
        assert_eq!(align_up(u64::MAX, 4096), 0xFFFF_FFFF_FFFF_F000);
    }
}
