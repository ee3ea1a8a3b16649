use crate::{PageSize, PhysicalAddress, PhysicalPage};
use core::fmt;

/// A half-open span `[start, end)` of physical memory.
///
/// Used for everything the boot code reserves: the kernel image, the
/// boot-information blob, the page-table arena and the frame bitmap.
/// A range with `end <= start` is empty.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let a = PhysicalRange::from_start_len(PhysicalAddress::new(0x20_0000), 0x4000);
/// let b = PhysicalRange::from_start_len(PhysicalAddress::new(0x20_3000), 0x1000);
/// assert!(a.overlaps(&b));
/// assert_eq!(a.page_count::<Size4K>(), 4);
/// ```
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PhysicalRange {
    start: PhysicalAddress,
    end: PhysicalAddress,
}

impl PhysicalRange {
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    /// Builds `[start, start + len)`, saturating at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn from_start_len(start: PhysicalAddress, len: u64) -> Self {
        Self {
            start,
            end: PhysicalAddress::new(start.as_u64().saturating_add(len)),
        }
    }

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(PhysicalAddress::zero(), PhysicalAddress::zero())
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64().saturating_sub(self.start.as_u64())
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.as_u64() <= self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end.as_u64()
    }

    /// Whether the two ranges share at least one byte.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end.as_u64()
            && other.start.as_u64() < self.end.as_u64()
    }

    /// Grow the range to page boundaries: start rounded down, end rounded up.
    ///
    /// This is how reservations are treated: any partially covered frame
    /// counts as covered. The end saturates at the last page boundary of the
    /// address space.
    #[inline]
    #[must_use]
    pub const fn align_outward<S: PageSize>(&self) -> Self {
        Self::new(self.start.align_down::<S>(), self.end.align_up::<S>())
    }

    /// Shrink the range to page boundaries: start rounded up, end rounded down.
    ///
    /// This is how usable memory is treated: only whole frames count.
    #[inline]
    #[must_use]
    pub const fn align_inward<S: PageSize>(&self) -> Self {
        Self::new(self.start.align_up::<S>(), self.end.align_down::<S>())
    }

    /// Number of whole pages of size `S` in the range.
    #[inline]
    #[must_use]
    pub const fn page_count<S: PageSize>(&self) -> u64 {
        self.len() >> S::SHIFT
    }

    /// Iterate the pages of size `S` starting in this range.
    ///
    /// The start is expected to be page aligned; it is aligned down otherwise.
    pub fn pages<S: PageSize>(&self) -> impl Iterator<Item = PhysicalPage<S>> + use<S> {
        let first = self.start.as_u64() >> S::SHIFT;
        let last = self.end.as_u64().div_ceil(S::SIZE);
        (first..last).map(PhysicalPage::from_frame_index)
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x} - {:#x})", self.start.as_u64(), self.end.as_u64())
    }
}

impl fmt::Display for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
