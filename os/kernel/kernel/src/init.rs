//! Early kernel initialization: logging, then physical memory.

pub mod boot_stack;

use crate::platform::{IdentityPhysMapper, X86Platform};
use kernel_alloc::{BitmapFrameAlloc, PmmConfig, init_physical_memory};
use kernel_memory_addresses::{PhysicalAddress, PhysicalRange};
use kernel_mmap::BootInformation;
use kernel_qemu::QemuLogger;
use kernel_vmem::Platform;
use log::{LevelFilter, error, info, warn};

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Info);

unsafe extern "C" {
    static _kernel_start: u8;
    static _kernel_end: u8;
}

/// Physical extent of the loaded kernel image, from the linker script.
fn kernel_image_range() -> PhysicalRange {
    let start = &raw const _kernel_start as u64;
    let end = &raw const _kernel_end as u64;
    PhysicalRange::new(PhysicalAddress::new(start), PhysicalAddress::new(end))
}

/// Rust-side kernel entry, reached from [`_start`](crate::_start) on the boot stack.
pub extern "C" fn kernel_main(mb_info_addr: u64) -> ! {
    let mut platform = X86Platform;

    if LOGGER.init().is_err() {
        #[cfg(feature = "qemu")]
        kernel_qemu::qemu_trace!("logger already installed\n");
    }
    info!("Kernel entered, boot information at {mb_info_addr:#x}");

    // SAFETY: the entry contract places the blob below the early identity limit.
    let boot_info = match unsafe { BootInformation::from_addr(PhysicalAddress::new(mb_info_addr)) } {
        Ok(bi) => bi,
        Err(e) => {
            error!("Unusable boot information: {e}");
            platform.halt_forever()
        }
    };

    // SAFETY: the kernel image and the boot information are what the
    // bootloader handed us; the identity mapper is valid below 1 GiB now and
    // for all of RAM once the new tables are active.
    let memory = unsafe {
        init_physical_memory(
            &boot_info,
            kernel_image_range(),
            &PmmConfig::default(),
            &IdentityPhysMapper,
            &mut platform,
        )
    };
    let mut memory = match memory {
        Ok(memory) => memory,
        Err(e) => {
            error!("Physical memory initialization failed: {e}");
            platform.halt_forever()
        }
    };

    exercise_frames(&mut memory.frames);

    info!("Early memory initialization complete, halting");
    platform.halt_forever()
}

/// Smoke test of the frame allocator on real memory.
fn exercise_frames(frames: &mut BitmapFrameAlloc<'_>) {
    let mut taken = [PhysicalAddress::zero(); 4];
    for slot in &mut taken {
        match frames.allocate() {
            Some(frame) => *slot = frame,
            None => {
                warn!("Out of frames during self-test");
                return;
            }
        }
    }
    info!(
        "Allocated frames {:#x} {:#x} {:#x} {:#x}",
        taken[0], taken[1], taken[2], taken[3]
    );

    for frame in taken {
        frames.free(frame);
    }
    frames.log_stats();
}
