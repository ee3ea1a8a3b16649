//! # Physical Memory Initialization
//!
//! Brings up physical memory management from the boot information:
//!
//! 1. Summarize the memory map (usable frames, highest usable address).
//! 2. Locate the kernel image and the boot-information blob.
//! 3. Place the page-table arena right after the kernel.
//! 4. Find a hole for the frame bitmap.
//! 5. Identity map everything and switch CR3.
//! 6. Set up the bitmap and withdraw all reserved memory from it.
//!
//! Every failure here is fatal; the caller is expected to halt.

use crate::frame_alloc::{BitmapError, BitmapFrameAlloc, bitmap_bytes_for};
use kernel_info::memory::{EARLY_IDENTITY_LIMIT, PAGE_TABLE_RESERVE_BYTES};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K};
use kernel_mmap::{BootInfoError, BootInformation, MemoryRegion, MemorySummary};
use kernel_vmem::{IdentityMapper, MappingError, PhysMapper, Platform};

/// Tunables of [`init_physical_memory`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PmmConfig {
    /// End of the bootloader's identity map; the page-table arena must end below it.
    pub early_identity_limit: PhysicalAddress,
    /// Size of the page-table arena in bytes.
    pub page_table_reserve: u64,
}

impl PmmConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            early_identity_limit: PhysicalAddress::new(EARLY_IDENTITY_LIMIT),
            page_table_reserve: PAGE_TABLE_RESERVE_BYTES,
        }
    }
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why physical memory could not be brought up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("no memory map in the boot information")]
    MissingMemoryMap,
    #[error("unreadable boot information: {0}")]
    BootInfo(BootInfoError),
    #[error("the memory map reports no usable memory")]
    NoUsableMemory,
    #[error("page-table arena {arena} ends past the early identity limit {ceiling:#x}")]
    ArenaExceedsCeiling {
        arena: PhysicalRange,
        ceiling: PhysicalAddress,
    },
    #[error("no usable hole of {bytes} bytes for the frame bitmap")]
    NoBitmapHole { bytes: u64 },
    #[error("identity map failed: {0}")]
    Mapping(#[from] MappingError),
    #[error("frame bitmap: {0}")]
    Bitmap(#[from] BitmapError),
}

impl From<BootInfoError> for InitError {
    fn from(value: BootInfoError) -> Self {
        match value {
            BootInfoError::MissingMemoryMap => Self::MissingMemoryMap,
            other => Self::BootInfo(other),
        }
    }
}

/// Where everything ended up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Kernel image, end rounded up to a page.
    pub kernel: PhysicalRange,
    /// Boot-information blob, grown to whole pages.
    pub boot_info: PhysicalRange,
    /// The whole page-table arena, used or not.
    pub page_tables: PhysicalRange,
    /// The frame bitmap's storage.
    pub bitmap: PhysicalRange,
    /// The active PML4.
    pub root_table: PhysicalPage<Size4K>,
    /// End of the identity-mapped range.
    pub mapped_end: PhysicalAddress,
}

impl MemoryLayout {
    /// The ranges withdrawn from the frame allocator, in marking order.
    #[must_use]
    pub const fn reserved(&self) -> [PhysicalRange; 4] {
        [self.kernel, self.boot_info, self.page_tables, self.bitmap]
    }
}

/// Initialized physical memory management.
#[derive(Debug)]
pub struct PhysicalMemory<'b> {
    pub frames: BitmapFrameAlloc<'b>,
    pub layout: MemoryLayout,
    pub summary: MemorySummary,
}

/// Bring up physical memory management. See the [module docs](self).
///
/// # Errors
/// Any [`InitError`]; nothing is usable afterwards and, unless the error is
/// [`InitError::Mapping`] or later, CR3 has not been touched.
///
/// # Safety
/// - `boot_info` and `kernel_image` must describe this machine truthfully.
/// - `mapper` must give write access to all memory below the early identity
///   limit now, and to all of `[0, mapped_end)` after the switch.
/// - See [`Platform::load_root_table`]: the executing code, its stack and
///   every live structure must lie in memory the map will cover.
pub unsafe fn init_physical_memory<'b, M: PhysMapper, P: Platform>(
    boot_info: &BootInformation<'_>,
    kernel_image: PhysicalRange,
    config: &PmmConfig,
    mapper: &M,
    platform: &mut P,
) -> Result<PhysicalMemory<'b>, InitError> {
    log::info!("=== Initializing physical memory ===");

    // 1. Memory map.
    let mmap = boot_info.memory_map()?;
    log::info!(
        "Memory map: {} entries (entry size {}, version {})",
        mmap.len(),
        mmap.entry_size(),
        mmap.entry_version()
    );
    for region in mmap.regions() {
        log::info!("  {region}");
    }

    let summary = mmap.summary();
    if !summary.has_usable_memory() {
        log::error!("No usable memory reported");
        return Err(InitError::NoUsableMemory);
    }
    log::info!(
        "Usable RAM: {} MiB ({} frames) of {} MiB reported",
        summary.total_usable_bytes >> 20,
        summary.total_frames,
        summary.total_reported_bytes >> 20
    );
    log::info!(
        "Highest usable address: {:#x} ({} MiB)",
        summary.highest_usable_address.as_u64(),
        summary.highest_usable_address.as_u64() >> 20
    );

    let addr_space_frames = summary.address_space_frames();
    let bitmap_bytes = bitmap_bytes_for(addr_space_frames);
    log::info!(
        "Bitmap: {} bytes for {} frames",
        bitmap_bytes,
        addr_space_frames
    );

    // 2. Kernel and boot information.
    let kernel = PhysicalRange::new(kernel_image.start(), kernel_image.end().align_up::<Size4K>());
    let boot = boot_info.physical_range().align_outward::<Size4K>();
    log::info!("Kernel: {kernel} ({} KiB)", kernel.len() / 1024);
    log::info!("Boot information: {boot}");

    // 3. Page-table arena.
    let page_tables = place_page_table_arena(kernel, boot, config)?;
    log::info!(
        "Page-table arena: {page_tables} ({} MiB)",
        page_tables.len() >> 20
    );

    // 4. Bitmap hole.
    let frame_zero = PhysicalRange::from_start_len(PhysicalAddress::zero(), Size4K::SIZE);
    let bitmap = find_bitmap_hole(
        mmap.regions(),
        bitmap_bytes,
        &[frame_zero, kernel, boot, page_tables],
    )
    .ok_or_else(|| {
        log::error!("No space for the frame bitmap ({bitmap_bytes} bytes)");
        InitError::NoBitmapHole {
            bytes: bitmap_bytes,
        }
    })?;
    log::info!("Bitmap storage: {bitmap}");

    // 5. Identity map and CR3 switch.
    let map_end = [kernel.end(), boot.end(), page_tables.end(), bitmap.end()]
        .into_iter()
        .fold(summary.highest_usable_address, PhysicalAddress::max)
        .align_up::<Size4K>();

    let identity = unsafe {
        IdentityMapper::new(mapper, config.early_identity_limit).build(
            map_end,
            page_tables.start(),
            page_tables.end(),
            platform,
        )?
    };

    // 6. Frame bitmap.
    #[allow(clippy::cast_possible_truncation)]
    let storage = unsafe { mapper.phys_to_bytes_mut(bitmap.start(), bitmap_bytes as usize) };
    let mut frames =
        BitmapFrameAlloc::new(storage, summary.highest_usable_address, summary.total_frames)?;

    let layout = MemoryLayout {
        kernel,
        boot_info: boot,
        page_tables,
        bitmap,
        root_table: identity.root,
        mapped_end: identity.mapped_end,
    };
    frames.reserve_boot_ranges(&layout.reserved(), mmap.regions());

    log::info!("=== Physical memory ready ===");
    frames.log_stats();

    Ok(PhysicalMemory {
        frames,
        layout,
        summary,
    })
}

/// Put the arena right after the kernel, or after the boot information if
/// that is where it would collide.
fn place_page_table_arena(
    kernel: PhysicalRange,
    boot: PhysicalRange,
    config: &PmmConfig,
) -> Result<PhysicalRange, InitError> {
    let mut arena = PhysicalRange::from_start_len(kernel.end(), config.page_table_reserve);
    if arena.overlaps(&boot) {
        log::info!("Page-table arena would overlap boot information, moving past {boot}");
        arena = PhysicalRange::from_start_len(boot.end(), config.page_table_reserve);
    }

    if arena.end() > config.early_identity_limit {
        log::error!(
            "Page-table arena {arena} exceeds the early identity map ({:#x})",
            config.early_identity_limit.as_u64()
        );
        return Err(InitError::ArenaExceedsCeiling {
            arena,
            ceiling: config.early_identity_limit,
        });
    }
    Ok(arena)
}

/// First page-aligned run of `bytes` inside an available region that overlaps
/// none of `excluded`.
fn find_bitmap_hole(
    regions: impl IntoIterator<Item = MemoryRegion>,
    bytes: u64,
    excluded: &[PhysicalRange],
) -> Option<PhysicalRange> {
    for region in regions {
        let usable = region.usable_range();
        if usable.is_empty() {
            continue;
        }

        let mut start = usable.start();
        loop {
            let candidate = PhysicalRange::from_start_len(start, bytes);
            if candidate.end() > usable.end() {
                break;
            }
            match excluded.iter().find(|ex| ex.overlaps(&candidate)) {
                Some(ex) => start = ex.end().align_up::<Size4K>(),
                None => return Some(candidate),
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_mmap::RegionKind;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn range(start: u64, end: u64) -> PhysicalRange {
        PhysicalRange::new(pa(start), pa(end))
    }

    fn available(start: u64, end: u64) -> MemoryRegion {
        MemoryRegion {
            start: pa(start),
            length: end - start,
            kind: RegionKind::Available,
        }
    }

    #[test]
    fn arena_follows_the_kernel() {
        let arena = place_page_table_arena(
            range(0x10_0000, 0x20_0000),
            range(0x9_0000, 0x9_1000),
            &PmmConfig::default(),
        )
        .unwrap();
        assert_eq!(arena, range(0x20_0000, 0x420_0000));
    }

    #[test]
    fn arena_moves_past_colliding_boot_information() {
        let arena = place_page_table_arena(
            range(0x10_0000, 0x20_0000),
            range(0x20_0000, 0x20_2000),
            &PmmConfig::default(),
        )
        .unwrap();
        assert_eq!(arena.start().as_u64(), 0x20_2000);
    }

    #[test]
    fn arena_past_the_ceiling_is_fatal() {
        let config = PmmConfig {
            early_identity_limit: pa(0x100_0000),
            ..PmmConfig::default()
        };
        let err = place_page_table_arena(range(0x10_0000, 0x20_0000), range(0x9_0000, 0x9_1000), &config)
            .unwrap_err();
        assert!(matches!(err, InitError::ArenaExceedsCeiling { .. }));
    }

    #[test]
    fn hole_skips_every_exclusion() {
        let hole = find_bitmap_hole(
            [available(0x0, 0x9_f000), available(0x10_0000, 0x1000_0000)],
            0x2000,
            &[
                range(0, 0x1000),
                range(0x10_0000, 0x20_0000),
                range(0x9_0000, 0x9_1000),
                range(0x20_0000, 0x420_0000),
            ],
        );
        assert_eq!(hole, Some(range(0x1000, 0x3000)));
    }

    #[test]
    fn hole_may_sit_between_exclusions() {
        let hole = find_bitmap_hole(
            [available(0x10_0000, 0x1000_0000)],
            0x2000,
            &[range(0x10_0000, 0x20_0000), range(0x20_3000, 0x400_0000)],
        );
        assert_eq!(hole, Some(range(0x20_0000, 0x20_2000)));
    }

    #[test]
    fn no_hole_when_everything_is_taken() {
        let hole = find_bitmap_hole(
            [available(0x10_0000, 0x420_0000)],
            0x1000,
            &[range(0x10_0000, 0x20_0000), range(0x20_0000, 0x420_0000)],
        );
        assert_eq!(hole, None);
    }

    #[test]
    fn missing_memory_map_maps_to_its_own_variant() {
        assert_eq!(
            InitError::from(BootInfoError::MissingMemoryMap),
            InitError::MissingMemoryMap
        );
        assert_eq!(
            InitError::from(BootInfoError::Malformed { offset: 8 }),
            InitError::BootInfo(BootInfoError::Malformed { offset: 8 })
        );
    }
}
