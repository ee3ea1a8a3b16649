//! Simulated physical memory for host-side tests.
//!
//! Physical memory is modelled as a handful of disjoint **windows**, each a
//! run of 4 KiB-aligned frames at a chosen physical address. Fresh windows are
//! filled with [`GARBAGE`] so that code which forgets to zero a page is
//! caught. Touching an address outside every window panics.

use crate::{PhysMapper, Platform};
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, PhysicalRange, Size4K};

/// Fill byte of freshly created windows.
pub const GARBAGE: u8 = 0xA5;

#[derive(Clone)]
#[repr(C, align(4096))]
struct Frame([u8; 4096]);

struct Window {
    range: PhysicalRange,
    frames: NonNull<Frame>,
    len: usize,
}

impl Window {
    #[allow(clippy::cast_possible_truncation)]
    fn new(range: PhysicalRange) -> Self {
        let len = range.page_count::<Size4K>() as usize;
        let frames: Box<[Frame]> = vec![Frame([GARBAGE; 4096]); len].into_boxed_slice();
        let frames = NonNull::from(Box::leak(frames)).cast::<Frame>();
        Self { range, frames, len }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.frames.as_ptr(), self.len);
        // SAFETY: `frames` came from `Box::leak` of a boxed slice of `len` frames.
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// A sparse physical address space backed by host memory.
///
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::sim::{SimulatedMemory, GARBAGE};
/// let mem = SimulatedMemory::new().with_window(PhysicalAddress::new(0x30_0000), 0x2000);
/// assert_eq!(mem.read_u8(PhysicalAddress::new(0x30_1fff)), GARBAGE);
/// ```
#[derive(Default)]
pub struct SimulatedMemory {
    windows: Vec<Window>,
}

impl SimulatedMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window covering `[start, start + len)`, grown outward to whole pages.
    ///
    /// # Panics
    /// If the window overlaps an existing one.
    #[must_use]
    pub fn with_window(mut self, start: PhysicalAddress, len: u64) -> Self {
        self.add_window(start, len);
        self
    }

    /// See [`SimulatedMemory::with_window`].
    ///
    /// # Panics
    /// If the window overlaps an existing one.
    pub fn add_window(&mut self, start: PhysicalAddress, len: u64) {
        let range = PhysicalRange::from_start_len(start, len).align_outward::<Size4K>();
        assert!(
            self.windows.iter().all(|w| !w.range.overlaps(&range)),
            "simulated window {range} overlaps an existing window"
        );
        self.windows.push(Window::new(range));
    }

    /// Whether `[pa, pa + len)` lies entirely inside one window.
    #[must_use]
    pub fn is_backed(&self, pa: PhysicalAddress, len: u64) -> bool {
        self.window_of(pa, len).is_some()
    }

    fn window_of(&self, pa: PhysicalAddress, len: u64) -> Option<&Window> {
        let wanted = PhysicalRange::from_start_len(pa, len);
        self.windows.iter().find(|w| {
            w.range.contains(pa) && wanted.end().as_u64() <= w.range.end().as_u64()
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn host_ptr(&self, pa: PhysicalAddress, len: u64) -> *mut u8 {
        let Some(window) = self.window_of(pa, len) else {
            panic!("access to unbacked physical memory at {pa:#x} (+{len:#x})");
        };
        let offset = (pa - window.range.start()) as usize;
        // SAFETY: the offset stays inside the window's allocation.
        unsafe { window.frames.as_ptr().cast::<u8>().add(offset) }
    }

    /// Read one byte.
    ///
    /// # Panics
    /// If `pa` is not backed.
    #[must_use]
    pub fn read_u8(&self, pa: PhysicalAddress) -> u8 {
        // SAFETY: `host_ptr` checked the byte is inside a window.
        unsafe { self.host_ptr(pa, 1).read() }
    }

    /// Read a little-endian `u64`.
    ///
    /// # Panics
    /// If the 8 bytes at `pa` are not backed.
    #[must_use]
    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        // SAFETY: `host_ptr` checked all 8 bytes are inside a window.
        unsafe { self.host_ptr(pa, 8).cast::<u64>().read_unaligned() }
    }

    /// Copy `bytes` into simulated memory at `pa`.
    ///
    /// # Panics
    /// If the destination is not backed.
    pub fn write_bytes(&self, pa: PhysicalAddress, bytes: &[u8]) {
        let dst = self.host_ptr(pa, bytes.len() as u64);
        // SAFETY: `host_ptr` checked the destination is inside a window.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) }
    }
}

impl PhysMapper for SimulatedMemory {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.host_ptr(pa, size_of::<T>() as u64).cast::<T>();
        assert!(ptr.is_aligned(), "misaligned access at {pa:#x}");
        // SAFETY: backed and aligned; the caller promises validity and no aliasing.
        unsafe { &mut *ptr }
    }

    unsafe fn phys_to_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = self.host_ptr(pa, len as u64);
        // SAFETY: backed; the caller promises no aliasing.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}

/// A [`Platform`] that records root-table loads instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    /// Every root table passed to [`Platform::load_root_table`], in order.
    pub loaded: Vec<PhysicalPage<Size4K>>,
}

impl Platform for RecordingPlatform {
    unsafe fn load_root_table(&mut self, root: PhysicalPage<Size4K>) {
        self.loaded.push(root);
    }

    fn halt_forever(&mut self) -> ! {
        panic!("platform halted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_start_out_as_garbage() {
        let mem = SimulatedMemory::new().with_window(PhysicalAddress::new(0x1000), 0x1000);
        assert_eq!(
            mem.read_u64(PhysicalAddress::new(0x1ff8)),
            u64::from_ne_bytes([GARBAGE; 8])
        );
    }

    #[test]
    fn writes_are_visible_through_the_mapper() {
        let mem = SimulatedMemory::new().with_window(PhysicalAddress::new(0x20_0000), 0x2000);
        mem.write_bytes(PhysicalAddress::new(0x20_1000), &42u64.to_le_bytes());
        let value: &mut u64 = unsafe { mem.phys_to_mut(PhysicalAddress::new(0x20_1000)) };
        assert_eq!(*value, 42);
        *value = 7;
        assert_eq!(mem.read_u8(PhysicalAddress::new(0x20_1000)), 7);
    }

    #[test]
    #[should_panic(expected = "unbacked physical memory")]
    fn access_outside_windows_panics() {
        let mem = SimulatedMemory::new().with_window(PhysicalAddress::new(0x20_0000), 0x1000);
        let _ = mem.read_u8(PhysicalAddress::new(0x20_1000));
    }

    #[test]
    #[should_panic(expected = "unbacked physical memory")]
    fn access_straddling_a_window_end_panics() {
        let mem = SimulatedMemory::new().with_window(PhysicalAddress::new(0x20_0000), 0x1000);
        let _ = mem.read_u64(PhysicalAddress::new(0x20_0ffc));
    }

    #[test]
    fn recording_platform_keeps_roots() {
        let mut p = RecordingPlatform::default();
        let root = PhysicalPage::from_frame_index(0x300);
        unsafe { p.load_root_table(root) };
        assert_eq!(p.loaded, vec![root]);
    }
}
