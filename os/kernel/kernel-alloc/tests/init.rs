use kernel_alloc::{InitError, PhysicalMemory, PmmConfig, init_physical_memory};
use kernel_memory_addresses::{PhysicalAddress, PhysicalRange};
use kernel_mmap::BootInformation;
use kernel_mmap::builder::BootInfoBuilder;
use kernel_vmem::sim::{RecordingPlatform, SimulatedMemory};

const BOOT_INFO_AT: u64 = 0x9_0000;
const AVAILABLE: u32 = 1;
const RESERVED: u32 = 2;
const ACPI_RECLAIMABLE: u32 = 3;

fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

fn range(start: u64, end: u64) -> PhysicalRange {
    PhysicalRange::new(pa(start), pa(end))
}

fn init<'m>(
    blob: &[u8],
    boot_info_at: u64,
    kernel: PhysicalRange,
    config: &PmmConfig,
    mem: &'m SimulatedMemory,
    platform: &mut RecordingPlatform,
) -> Result<PhysicalMemory<'m>, InitError> {
    let info = BootInformation::parse(blob, pa(boot_info_at)).expect("valid boot information");
    unsafe { init_physical_memory(&info, kernel, config, mem, platform) }
}

/// Memory backing the page-table arena at `arena` and the bitmap at `bitmap`.
fn memory(arena: u64, bitmap: u64, bitmap_len: u64) -> SimulatedMemory {
    SimulatedMemory::new()
        .with_window(pa(arena), 0x10_0000)
        .with_window(pa(bitmap), bitmap_len)
}

#[test]
fn single_region_end_to_end() {
    let blob = BootInfoBuilder::new()
        .tag(1, b"\0")
        .memory_map(&[(0x10_0000, 0x1000_0000 - 0x10_0000, AVAILABLE)])
        .build();
    let mem = memory(0x20_0000, 0x420_0000, 0x2000);
    let mut platform = RecordingPlatform::default();

    let mut pm = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap();

    assert_eq!(pm.summary.total_frames, 0xFF00);
    assert_eq!(pm.frames.total_count(), 0xFF00);
    assert_eq!(pm.frames.addr_space_frames(), 0x1_0000);
    assert_eq!(pm.summary.highest_usable_address, pa(0x1000_0000));

    let layout = pm.layout;
    assert_eq!(layout.kernel, range(0x10_0000, 0x20_0000));
    assert_eq!(layout.boot_info, range(0x9_0000, 0x9_1000));
    assert_eq!(layout.page_tables, range(0x20_0000, 0x420_0000));
    assert_eq!(layout.bitmap, range(0x420_0000, 0x420_2000));
    assert_eq!(layout.root_table.base(), pa(0x20_0000));
    assert_eq!(layout.mapped_end, pa(0x1000_0000));

    // Frame 0, kernel, boot information, arena, bitmap.
    let reserved = 1 + 0x100 + 1 + 0x4000 + 2;
    assert_eq!(pm.frames.free_count(), 0x1_0000 - reserved);
    assert_eq!(pm.frames.free_count(), pm.frames.count_free_bits());

    // The root's first entry links the low PDPT, present and writable.
    assert_eq!(mem.read_u64(pa(0x20_0000)) & 0b11, 0b11);

    let mut handed_out = 0;
    while let Some(frame) = pm.frames.allocate() {
        for r in layout.reserved() {
            assert!(!r.contains(frame), "{frame:#x} lies in reserved {r}");
        }
        assert_ne!(frame, pa(0));
        handed_out += 1;
        if handed_out % 4096 == 0 {
            assert_eq!(pm.frames.free_count(), pm.frames.count_free_bits());
        }
    }
    assert_eq!(handed_out, 0x1_0000 - reserved);
    assert_eq!(pm.frames.free_count(), 0);

    drop(pm);
    assert_eq!(platform.loaded, vec![layout.root_table]);
}

#[test]
fn arena_moves_past_boot_information_after_the_kernel() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[(0x10_0000, 0x1000_0000 - 0x10_0000, AVAILABLE)])
        .build();
    let mem = memory(0x20_1000, 0x420_1000, 0x2000);
    let mut platform = RecordingPlatform::default();

    let pm = init(
        &blob,
        0x20_0000,
        range(0x10_0000, 0x1f_f800),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap();

    assert_eq!(pm.layout.kernel, range(0x10_0000, 0x20_0000));
    assert_eq!(pm.layout.boot_info, range(0x20_0000, 0x20_1000));
    assert_eq!(pm.layout.page_tables, range(0x20_1000, 0x420_1000));
    assert_eq!(pm.layout.bitmap, range(0x420_1000, 0x420_3000));
    assert!(pm.frames.is_allocated(pa(0x20_0000)));
}

#[test]
fn unusable_regions_are_withdrawn() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[
            (0x0, 0x9_fc00, AVAILABLE),
            (0x9_fc00, 0x400, RESERVED),
            (0xf_0000, 0x1_0000, RESERVED),
            (0x10_0000, 0x7ee_0000, AVAILABLE),
            (0x7fe_0000, 0x2_0000, ACPI_RECLAIMABLE),
        ])
        .build();
    // The bitmap lands in low memory, right after frame 0.
    let mem = memory(0x20_0000, 0x1000, 0x1000);
    let mut platform = RecordingPlatform::default();

    let mut pm = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap();

    assert_eq!(pm.summary.total_frames, 0x9f + 0x7ee0);
    assert_eq!(pm.summary.highest_usable_address, pa(0x7fe_0000));
    assert_eq!(pm.layout.bitmap, range(0x1000, 0x1ffc));

    for addr in [0x9_f000, 0xf_0000, 0xf_f000] {
        assert!(pm.frames.is_allocated(pa(addr)), "{addr:#x} should be reserved");
    }
    assert!(pm.frames.is_allocated(pa(0x7fe_0000)));
    assert!(!pm.frames.is_allocated(pa(0x9_e000)));
    assert!(!pm.frames.is_allocated(pa(0x420_0000)));

    let forbidden = [range(0x9_f000, 0xa_0000), range(0xf_0000, 0x10_0000)];
    while let Some(frame) = pm.frames.allocate() {
        assert!(forbidden.iter().all(|r| !r.contains(frame)));
        assert!(pm.layout.reserved().iter().all(|r| !r.contains(frame)));
    }
    assert_eq!(pm.frames.count_free_bits(), 0);
}

#[test]
fn missing_memory_map_is_fatal() {
    let blob = BootInfoBuilder::new().tag(1, b"console\0").build();
    let mem = SimulatedMemory::new();
    let mut platform = RecordingPlatform::default();

    let err = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap_err();

    assert_eq!(err, InitError::MissingMemoryMap);
    assert!(platform.loaded.is_empty());
}

#[test]
fn no_usable_memory_is_fatal() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[(0x0, 0x10_0000, RESERVED)])
        .build();
    let mem = SimulatedMemory::new();
    let mut platform = RecordingPlatform::default();

    let err = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap_err();

    assert_eq!(err, InitError::NoUsableMemory);
}

#[test]
fn arena_past_the_early_identity_limit_is_fatal() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[(0x10_0000, 0x1000_0000 - 0x10_0000, AVAILABLE)])
        .build();
    let mem = SimulatedMemory::new();
    let mut platform = RecordingPlatform::default();
    let config = PmmConfig {
        early_identity_limit: pa(0x100_0000),
        ..PmmConfig::default()
    };

    let err = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &config,
        &mem,
        &mut platform,
    )
    .unwrap_err();

    assert_eq!(
        err,
        InitError::ArenaExceedsCeiling {
            arena: range(0x20_0000, 0x420_0000),
            ceiling: pa(0x100_0000),
        }
    );
    assert!(platform.loaded.is_empty());
}

#[test]
fn no_room_for_the_bitmap_is_fatal() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[(0x10_0000, 0x420_0000 - 0x10_0000, AVAILABLE)])
        .build();
    let mem = SimulatedMemory::new();
    let mut platform = RecordingPlatform::default();

    let err = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &PmmConfig::default(),
        &mem,
        &mut platform,
    )
    .unwrap_err();

    assert_eq!(err, InitError::NoBitmapHole { bytes: 0x840 });
    assert!(platform.loaded.is_empty());
}

#[test]
fn small_arena_exhaustion_is_fatal_and_nothing_is_activated() {
    let blob = BootInfoBuilder::new()
        .memory_map(&[(0x10_0000, 0x1000_0000 - 0x10_0000, AVAILABLE)])
        .build();
    let mem = SimulatedMemory::new().with_window(pa(0x20_0000), 0x4000);
    let mut platform = RecordingPlatform::default();
    let config = PmmConfig {
        page_table_reserve: 0x4000,
        ..PmmConfig::default()
    };

    let err = init(
        &blob,
        BOOT_INFO_AT,
        range(0x10_0000, 0x20_0000),
        &config,
        &mem,
        &mut platform,
    )
    .unwrap_err();

    assert!(matches!(err, InitError::Mapping(_)));
    assert!(platform.loaded.is_empty());
}
