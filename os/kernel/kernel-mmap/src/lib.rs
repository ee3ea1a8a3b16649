//! # Boot Memory Map Reader
//!
//! Read-only view over the Multiboot2 boot-information blob handed to the
//! kernel by the bootloader, with just enough understanding of its tags to
//! discover physical RAM.
//!
//! ## Layout
//!
//! ```text
//! +0   total_size: u32        ─┐ fixed 8-byte header
//! +4   reserved:   u32        ─┘
//! +8   tag { type: u32, size: u32, payload... }   padded to 8 bytes
//!      tag ...
//!      tag { type: 0, size: 8 }                   end tag
//! ```
//!
//! The memory-map tag (type 6) carries `entry_size` and `entry_version`
//! followed by fixed-stride descriptors `{ addr: u64, len: u64, type: u32, reserved: u32 }`.
//! Descriptors are always read at the advertised `entry_size`, which may be
//! larger than the 24 bytes this crate understands.
//!
//! ## Usage
//!
//! ```rust
//! # use kernel_mmap::{BootInformation, RegionKind};
//! # use kernel_memory_addresses::PhysicalAddress;
//! let mut blob = Vec::new();
//! for word in [56u32, 0, 6, 40, 24, 0] {
//!     blob.extend_from_slice(&word.to_le_bytes());
//! }
//! blob.extend_from_slice(&0x10_0000u64.to_le_bytes());
//! blob.extend_from_slice(&0xff0_0000u64.to_le_bytes());
//! for word in [1u32, 0, 0, 8] {
//!     blob.extend_from_slice(&word.to_le_bytes());
//! }
//!
//! let info = BootInformation::parse(&blob, PhysicalAddress::new(0x9_0000)).unwrap();
//! let mmap = info.memory_map().unwrap();
//! let region = mmap.regions().next().unwrap();
//! assert_eq!(region.kind, RegionKind::Available);
//! assert_eq!(mmap.summary().total_frames, 0xff00);
//! ```
//!
//! All reads are bounds checked against the blob's self-reported size; the
//! only unsafe entry point is [`BootInformation::from_addr`].

#![cfg_attr(not(any(test, doctest)), no_std)]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

mod boot_info;
#[cfg(any(test, feature = "builder"))]
pub mod builder;
mod error;
mod memory_map;

pub use boot_info::{BootInformation, Tag, TagIter};
pub use error::BootInfoError;
pub use memory_map::{MemoryMap, MemoryRegion, MemoryRegions, MemorySummary, RegionKind};

/// Tag type terminating the tag list.
pub const TAG_END: u32 = 0;

/// Tag type of the memory map.
pub const TAG_MEMORY_MAP: u32 = 6;

/// Size of the fixed boot-information header, and of every tag header.
pub const HEADER_SIZE: usize = 8;

/// Smallest descriptor stride that still holds `addr`, `len` and `type`.
pub const MIN_ENTRY_SIZE: u32 = 24;

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}
