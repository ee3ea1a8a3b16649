use crate::{read_u32, read_u64};
use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalRange, Size4K};

/// The memory-map tag of the boot information.
#[derive(Debug, Copy, Clone)]
pub struct MemoryMap<'a> {
    entry_size: u32,
    entry_version: u32,
    entries: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    pub(crate) const fn new(entry_size: u32, entry_version: u32, entries: &'a [u8]) -> Self {
        Self {
            entry_size,
            entry_version,
            entries,
        }
    }

    /// Stride between two descriptors, in bytes.
    #[inline]
    #[must_use]
    pub const fn entry_size(&self) -> u32 {
        self.entry_size
    }

    #[inline]
    #[must_use]
    pub const fn entry_version(&self) -> u32 {
        self.entry_version
    }

    /// Number of descriptors in the map.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len() / self.entry_size as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the descriptors in the order the bootloader reported them.
    #[must_use]
    pub fn regions(&self) -> MemoryRegions<'a> {
        MemoryRegions {
            chunks: self.entries.chunks_exact(self.entry_size as usize),
        }
    }

    /// Aggregate the whole map. See [`MemorySummary`].
    #[must_use]
    pub fn summary(&self) -> MemorySummary {
        MemorySummary::from_regions(self.regions())
    }
}

/// Lazy iterator over the descriptors of a [`MemoryMap`].
#[derive(Debug, Clone)]
pub struct MemoryRegions<'a> {
    chunks: core::slice::ChunksExact<'a, u8>,
}

impl Iterator for MemoryRegions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        MemoryRegion::from_descriptor(self.chunks.next()?)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

/// What the firmware says a region of physical memory is.
///
/// Only [`RegionKind::Available`] memory is ever handed out; every other kind
/// is treated the same way.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Defective,
    Other(u32),
}

impl RegionKind {
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Defective,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Available => 1,
            Self::Reserved => 2,
            Self::AcpiReclaimable => 3,
            Self::AcpiNvs => 4,
            Self::Defective => 5,
            Self::Other(other) => other,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl From<u32> for RegionKind {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Reserved => f.write_str("reserved"),
            Self::AcpiReclaimable => f.write_str("ACPI reclaimable"),
            Self::AcpiNvs => f.write_str("ACPI NVS"),
            Self::Defective => f.write_str("defective"),
            Self::Other(t) => write!(f, "type {t}"),
        }
    }
}

/// One memory-map descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    pub length: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    /// Decode a descriptor; `None` if fewer than 24 bytes are supplied.
    #[must_use]
    pub fn from_descriptor(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            start: PhysicalAddress::new(read_u64(bytes, 0)?),
            length: read_u64(bytes, 8)?,
            kind: RegionKind::from_u32(read_u32(bytes, 16)?),
        })
    }

    /// First byte past the region, saturating at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.range().end()
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> PhysicalRange {
        PhysicalRange::from_start_len(self.start, self.length)
    }

    #[inline]
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.kind.is_available()
    }

    /// The whole 4 KiB frames inside an available region; empty for any other kind.
    #[inline]
    #[must_use]
    pub const fn usable_range(&self) -> PhysicalRange {
        if self.is_available() {
            self.range().align_inward::<Size4K>()
        } else {
            PhysicalRange::empty()
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#018x} - {:#018x} ({} KiB) {}",
            self.start.as_u64(),
            self.end().as_u64(),
            self.length / 1024,
            self.kind
        )
    }
}

/// Totals derived from a single pass over the memory map.
///
/// Usable bytes and frames only count whole 4 KiB frames of available
/// regions. `highest_usable_address` is the largest page-aligned end of such
/// a region, and zero if there is none.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemorySummary {
    pub total_usable_bytes: u64,
    pub total_frames: u64,
    pub highest_usable_address: PhysicalAddress,
    /// Sum of every region's length, regardless of kind.
    pub total_reported_bytes: u64,
    pub region_count: usize,
}

impl MemorySummary {
    #[must_use]
    pub fn from_regions(regions: impl IntoIterator<Item = MemoryRegion>) -> Self {
        regions.into_iter().fold(Self::default(), |mut acc, region| {
            acc.region_count += 1;
            acc.total_reported_bytes = acc.total_reported_bytes.saturating_add(region.length);

            let usable = region.usable_range();
            if !usable.is_empty() {
                acc.total_usable_bytes += usable.len();
                acc.total_frames += usable.page_count::<Size4K>();
                if usable.end() > acc.highest_usable_address {
                    acc.highest_usable_address = usable.end();
                }
            }
            acc
        })
    }

    /// Whether any available memory was reported at all.
    #[inline]
    #[must_use]
    pub const fn has_usable_memory(&self) -> bool {
        self.total_frames > 0
    }

    /// Frames spanned by `[0, highest_usable_address)`, i.e. the size of a
    /// frame bitmap covering all usable memory.
    #[inline]
    #[must_use]
    pub const fn address_space_frames(&self) -> u64 {
        self.highest_usable_address.as_u64().div_ceil(Size4K::SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BootInformation;
    use crate::builder::BootInfoBuilder;

    fn summary_of(entries: &[(u64, u64, u32)]) -> MemorySummary {
        let blob = BootInfoBuilder::new().memory_map(entries).build();
        let info = BootInformation::parse(&blob, PhysicalAddress::new(0x9_0000)).unwrap();
        info.memory_map().unwrap().summary()
    }

    #[test]
    fn single_available_region() {
        let s = summary_of(&[(0x10_0000, 0x1000_0000 - 0x10_0000, 1)]);
        assert_eq!(s.total_frames, 0xFF00);
        assert_eq!(s.total_usable_bytes, 0xFF0_0000);
        assert_eq!(s.highest_usable_address.as_u64(), 0x1000_0000);
        assert_eq!(s.address_space_frames(), 0x10000);
        assert_eq!(s.region_count, 1);
    }

    #[test]
    fn only_available_regions_count() {
        let s = summary_of(&[
            (0x0, 0x9_fc00, 1),
            (0x9_fc00, 0x400, 2),
            (0xf_0000, 0x1_0000, 2),
            (0x10_0000, 0x7ee_0000, 1),
            (0x7fe_0000, 0x2_0000, 3),
            (0xfffc_0000, 0x4_0000, 2),
        ]);
        assert_eq!(s.region_count, 6);
        assert_eq!(s.total_frames, 0x9f + 0x7ee0);
        assert_eq!(s.highest_usable_address.as_u64(), 0x7fe_0000);
        assert_eq!(
            s.total_reported_bytes,
            0x9_fc00 + 0x400 + 0x1_0000 + 0x7ee_0000 + 0x2_0000 + 0x4_0000
        );
    }

    #[test]
    fn partial_frames_are_not_usable() {
        let s = summary_of(&[(0x1_0800, 0x1800, 1), (0x2_0000, 0x800, 1)]);
        assert_eq!(s.total_frames, 1);
        assert_eq!(s.total_usable_bytes, 0x1000);
        assert_eq!(s.highest_usable_address.as_u64(), 0x1_2000);
    }

    #[test]
    fn no_available_memory() {
        let s = summary_of(&[(0x0, 0x10_0000, 2), (0x10_0000, 0x10_0000, 5)]);
        assert!(!s.has_usable_memory());
        assert_eq!(s.highest_usable_address, PhysicalAddress::zero());
    }

    #[test]
    fn wide_stride_is_honoured() {
        let entries = [(0x0, 0x8_0000, 1), (0x10_0000, 0x20_0000, 1), (0x40_0000, 0x1000, 2)];
        let blob = BootInfoBuilder::new()
            .memory_map_with_stride(40, &entries)
            .build();
        let info = BootInformation::parse(&blob, PhysicalAddress::new(0x9_0000)).unwrap();
        let mmap = info.memory_map().unwrap();

        assert_eq!(mmap.entry_size(), 40);
        assert_eq!(mmap.len(), 3);
        let regions: Vec<_> = mmap.regions().collect();
        assert_eq!(regions[1].start.as_u64(), 0x10_0000);
        assert_eq!(regions[1].length, 0x20_0000);
        assert_eq!(regions[2].kind, RegionKind::Reserved);
    }

    #[test]
    fn region_kinds() {
        assert_eq!(RegionKind::from(1), RegionKind::Available);
        assert_eq!(RegionKind::from(4), RegionKind::AcpiNvs);
        assert_eq!(RegionKind::from(17), RegionKind::Other(17));
        assert_eq!(RegionKind::Other(17).as_u32(), 17);
        assert!(!RegionKind::AcpiReclaimable.is_available());
    }

    #[test]
    fn region_in_the_top_page_is_not_usable() {
        let top = MemoryRegion {
            start: PhysicalAddress::new(0xFFFF_FFFF_FFFF_F800),
            length: 0x1000,
            kind: RegionKind::Available,
        };
        assert_eq!(top.end().as_u64(), u64::MAX);
        assert!(top.usable_range().is_empty());

        let s = MemorySummary::from_regions([top]);
        assert_eq!(s.total_frames, 0);
        assert!(!s.has_usable_memory());
    }

    /// Seeded xorshift64; keeps the randomized tests reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    fn random_map(rng: &mut XorShift, page_aligned: bool) -> Vec<MemoryRegion> {
        let count = 1 + rng.below(12);
        let mut cursor = rng.below(0x10_0000);
        (0..count)
            .map(|_| {
                let mut start = cursor + rng.below(0x100_0000);
                let mut length = rng.below(0x400_0000);
                if page_aligned {
                    start &= !0xfff;
                    length &= !0xfff;
                }
                cursor = start + length;
                let kind = match rng.below(4) {
                    0 | 1 => RegionKind::Available,
                    2 => RegionKind::Reserved,
                    _ => RegionKind::AcpiReclaimable,
                };
                MemoryRegion {
                    start: PhysicalAddress::new(start),
                    length,
                    kind,
                }
            })
            .collect()
    }

    #[test]
    fn random_aligned_maps_count_whole_frames() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        for _ in 0..500 {
            let map = random_map(&mut rng, true);
            let available: u64 = map
                .iter()
                .filter(|r| r.is_available())
                .map(|r| r.length)
                .sum();

            let s = MemorySummary::from_regions(map.iter().copied());
            assert_eq!(s.total_frames, available / 4096);
            assert_eq!(s.total_usable_bytes, available);
            assert_eq!(s.region_count, map.len());
        }
    }

    #[test]
    fn random_unaligned_maps_only_count_inner_frames() {
        let mut rng = XorShift(0x0123_4567_89AB_CDEF);
        for _ in 0..500 {
            let map = random_map(&mut rng, false);

            let mut frames = 0;
            let mut highest = 0;
            for r in map.iter().filter(|r| r.is_available()) {
                let first = r.start.as_u64().div_ceil(4096);
                let last = (r.start.as_u64() + r.length) / 4096;
                if last > first {
                    frames += last - first;
                    highest = highest.max(last * 4096);
                }
            }

            let s = MemorySummary::from_regions(map.iter().copied());
            assert_eq!(s.total_frames, frames);
            assert_eq!(s.highest_usable_address.as_u64(), highest);
            assert_eq!(s.has_usable_memory(), frames > 0);
        }
    }
}
