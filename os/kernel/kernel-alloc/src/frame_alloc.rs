//! # Bitmap Frame Allocator
//!
//! One bit per 4 KiB frame of `[0, highest_usable_address)`; a set bit means
//! allocated or unavailable. The bitmap itself lives in physical memory carved
//! out during boot and is borrowed for the allocator's lifetime.
//!
//! ## Accounting
//!
//! The free count starts at the full address-space frame count, including
//! holes that no memory-map entry describes. Reserved ranges and unusable
//! regions are subtracted afterwards by marking them. Padding bits past the
//! last frame in the final byte are set once and never counted.

use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K};
use kernel_mmap::MemoryRegion;
use kernel_vmem::FrameAlloc;

/// Index of a 4 KiB frame counted from physical address zero.
pub type FrameIndex = u64;

/// Bytes of bitmap needed to track `frames` frames.
#[inline]
#[must_use]
pub const fn bitmap_bytes_for(frames: u64) -> u64 {
    frames.div_ceil(8)
}

/// The bitmap could not be set up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitmapError {
    #[error("bitmap storage holds {available} bytes but {required} are needed for {frames} frames")]
    StorageTooSmall {
        available: usize,
        required: usize,
        frames: u64,
    },
}

/// A frame cannot be returned to the allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    #[error("address {0:#x} is not page aligned")]
    Misaligned(PhysicalAddress),
    #[error("frame {frame} is outside the {limit} tracked frames")]
    OutOfRange { frame: FrameIndex, limit: u64 },
    #[error("frame 0 is permanently reserved")]
    ReservedFrameZero,
}

/// Physical frame allocator over a borrowed bitmap.
pub struct BitmapFrameAlloc<'b> {
    bitmap: &'b mut [u8],
    total_frames: u64,
    free_frames: u64,
    addr_space_frames: u64,
    highest_usable: PhysicalAddress,
    last_alloc_byte: usize,
}

impl<'b> BitmapFrameAlloc<'b> {
    /// Take over `storage` to track every frame below `highest_usable`.
    ///
    /// `total_frames` is the number of usable frames reported by the memory
    /// map and is only used for statistics. All frames start out free.
    ///
    /// # Errors
    /// [`BitmapError::StorageTooSmall`] if `storage` cannot hold one bit per frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        storage: &'b mut [u8],
        highest_usable: PhysicalAddress,
        total_frames: u64,
    ) -> Result<Self, BitmapError> {
        let addr_space_frames = highest_usable.as_u64().div_ceil(Size4K::SIZE);
        let required = bitmap_bytes_for(addr_space_frames) as usize;
        if storage.len() < required {
            return Err(BitmapError::StorageTooSmall {
                available: storage.len(),
                required,
                frames: addr_space_frames,
            });
        }

        let (bitmap, _) = storage.split_at_mut(required);
        bitmap.fill(0);

        let tail_bits = addr_space_frames % 8;
        if tail_bits != 0
            && let Some(last) = bitmap.last_mut()
        {
            *last = 0xFF << tail_bits;
        }

        log::debug!(
            "Frame bitmap: {} bytes for {} frames ({} usable)",
            required,
            addr_space_frames,
            total_frames
        );

        Ok(Self {
            bitmap,
            total_frames,
            free_frames: addr_space_frames,
            addr_space_frames,
            highest_usable,
            last_alloc_byte: 0,
        })
    }

    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    const fn locate(frame: FrameIndex) -> (usize, u8) {
        ((frame >> 3) as usize, 1 << (frame & 7))
    }

    /// Set the bit of `frame`; `true` on a 0→1 transition.
    fn set(&mut self, frame: FrameIndex) -> bool {
        if frame >= self.addr_space_frames {
            return false;
        }
        let (byte, mask) = Self::locate(frame);
        if self.bitmap[byte] & mask != 0 {
            return false;
        }
        self.bitmap[byte] |= mask;
        self.free_frames -= 1;
        true
    }

    /// Clear the bit of `frame`; `true` on a 1→0 transition.
    fn clear(&mut self, frame: FrameIndex) -> bool {
        if frame >= self.addr_space_frames {
            return false;
        }
        let (byte, mask) = Self::locate(frame);
        if self.bitmap[byte] & mask == 0 {
            return false;
        }
        self.bitmap[byte] &= !mask;
        self.free_frames += 1;
        true
    }

    fn test(&self, frame: FrameIndex) -> bool {
        if frame >= self.addr_space_frames {
            return true;
        }
        let (byte, mask) = Self::locate(frame);
        self.bitmap[byte] & mask != 0
    }

    /// Mark every frame touched by `range` as used.
    ///
    /// Frames beyond the bitmap are ignored, as are empty ranges. Marking an
    /// already used frame changes nothing. Returns the number of frames that
    /// became used.
    pub fn mark_region_used(&mut self, range: PhysicalRange) -> u64 {
        if range.is_empty() {
            return 0;
        }
        log::trace!("Marking region {range} used");

        let first = range.start().as_u64() / Size4K::SIZE;
        let last = range.end().as_u64().div_ceil(Size4K::SIZE).min(self.addr_space_frames);
        (first..last).map(|frame| u64::from(self.set(frame))).sum()
    }

    /// Withdraw everything that must never be handed out.
    ///
    /// In order: frame 0, each of `reserved` (kernel image, boot information,
    /// page-table arena, bitmap) grown to whole frames, then every region of
    /// the memory map that is not available.
    pub fn reserve_boot_ranges(
        &mut self,
        reserved: &[PhysicalRange],
        regions: impl IntoIterator<Item = MemoryRegion>,
    ) {
        let before = self.free_frames;

        self.mark_region_used(PhysicalRange::from_start_len(PhysicalAddress::zero(), Size4K::SIZE));
        for range in reserved {
            self.mark_region_used(range.align_outward::<Size4K>());
        }
        for region in regions.into_iter().filter(|r| !r.is_available()) {
            self.mark_region_used(region.range().align_outward::<Size4K>());
        }

        log::debug!("Reserved {} frames at boot", before - self.free_frames);
    }

    /// Hand out one free frame, or `None` when none is left.
    ///
    /// The scan resumes at the byte of the previous allocation and wraps
    /// around, taking the lowest clear bit of the first byte with one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self) -> Option<PhysicalAddress> {
        if self.free_frames == 0 {
            log::warn!("Out of physical frames");
            return None;
        }

        let len = self.bitmap.len();
        for offset in 0..len {
            let byte = (self.last_alloc_byte + offset) % len;
            let bits = self.bitmap[byte];
            if bits == 0xFF {
                continue;
            }

            let bit = bits.trailing_ones();
            self.bitmap[byte] |= 1 << bit;
            self.free_frames -= 1;
            self.last_alloc_byte = byte;

            let frame = (byte as u64) * 8 + u64::from(bit);
            return Some(PhysicalPage::<Size4K>::from_frame_index(frame).base());
        }

        log::error!(
            "Frame bitmap inconsistent: {} frames counted free but none found",
            self.free_frames
        );
        None
    }

    /// Validate a frame about to be freed.
    ///
    /// # Errors
    /// - [`FreeError::Misaligned`] if `addr` is not page aligned.
    /// - [`FreeError::OutOfRange`] if the frame is not tracked.
    /// - [`FreeError::ReservedFrameZero`] for frame 0.
    pub const fn check_free(&self, addr: PhysicalAddress) -> Result<FrameIndex, FreeError> {
        if !addr.is_aligned::<Size4K>() {
            return Err(FreeError::Misaligned(addr));
        }
        let frame = addr.as_u64() / Size4K::SIZE;
        if frame >= self.addr_space_frames {
            return Err(FreeError::OutOfRange {
                frame,
                limit: self.addr_space_frames,
            });
        }
        if frame == 0 {
            return Err(FreeError::ReservedFrameZero);
        }
        Ok(frame)
    }

    /// Return a frame. Invalid requests are logged and ignored; freeing a
    /// free frame does nothing.
    pub fn free(&mut self, addr: PhysicalAddress) {
        match self.check_free(addr) {
            Ok(frame) => {
                if !self.clear(frame) {
                    log::debug!("Frame {addr:#x} freed while already free");
                }
            }
            Err(e) => log::warn!("Ignoring free of {addr:#x}: {e}"),
        }
    }

    /// Frames currently free.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_frames
    }

    /// Usable frames according to the memory map.
    #[inline]
    #[must_use]
    pub const fn total_count(&self) -> u64 {
        self.total_frames
    }

    /// Frames tracked by the bitmap.
    #[inline]
    #[must_use]
    pub const fn addr_space_frames(&self) -> u64 {
        self.addr_space_frames
    }

    /// Tracked frames that are not free.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> u64 {
        self.addr_space_frames - self.free_frames
    }

    #[inline]
    #[must_use]
    pub const fn highest_usable_address(&self) -> PhysicalAddress {
        self.highest_usable
    }

    #[inline]
    #[must_use]
    pub const fn bitmap_bytes(&self) -> usize {
        self.bitmap.len()
    }

    /// Whether the frame containing `addr` is in use. Untracked frames count as used.
    #[inline]
    #[must_use]
    pub fn is_allocated(&self, addr: PhysicalAddress) -> bool {
        self.test(addr.page::<Size4K>().frame_index())
    }

    /// Count the clear bits of the bitmap from scratch.
    #[must_use]
    pub fn count_free_bits(&self) -> u64 {
        self.bitmap
            .iter()
            .map(|b| u64::from(b.count_zeros()))
            .sum()
    }

    pub fn log_stats(&self) {
        const MIB: u64 = 1024 * 1024;
        let used = self.total_frames.saturating_sub(self.free_frames);
        log::info!("=== Physical memory ===");
        log::info!(
            "Total: {} MiB ({} frames)",
            self.total_frames * Size4K::SIZE / MIB,
            self.total_frames
        );
        log::info!(
            "Free:  {} MiB ({} frames)",
            self.free_frames * Size4K::SIZE / MIB,
            self.free_frames
        );
        log::info!("Used:  {} MiB ({} frames)", used * Size4K::SIZE / MIB, used);
        log::info!(
            "Highest usable: {:#x} ({} MiB)",
            self.highest_usable.as_u64(),
            self.highest_usable.as_u64() / MIB
        );
        log::info!("Bitmap: {} KiB", self.bitmap.len() / 1024);
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().map(PhysicalPage::containing)
    }
}

impl fmt::Debug for BitmapFrameAlloc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("total_frames", &self.total_frames)
            .field("free_frames", &self.free_frames)
            .field("addr_space_frames", &self.addr_space_frames)
            .field("highest_usable", &self.highest_usable)
            .field("bitmap_bytes", &self.bitmap.len())
            .finish_non_exhaustive()
    }
}
