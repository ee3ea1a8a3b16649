//! Host-side construction of Multiboot2 boot-information blobs.
//!
//! Only compiled for tests or with the `builder` feature.

use crate::{HEADER_SIZE, MIN_ENTRY_SIZE, TAG_END, TAG_MEMORY_MAP};
use alloc::vec::Vec;

/// Assembles a boot-information blob tag by tag.
///
/// ```rust,ignore
/// let blob = BootInfoBuilder::new()
///     .tag(1, b"console=ttyS0\0")
///     .memory_map(&[(0x0, 0x9_fc00, 1), (0x10_0000, 0x3ff0_0000, 1)])
///     .build();
/// ```
#[derive(Debug, Default, Clone)]
pub struct BootInfoBuilder {
    tags: Vec<u8>,
}

impl BootInfoBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tag of type `typ` carrying `payload`, padded to 8 bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tag(mut self, typ: u32, payload: &[u8]) -> Self {
        let size = (HEADER_SIZE + payload.len()) as u32;
        self.tags.extend_from_slice(&typ.to_le_bytes());
        self.tags.extend_from_slice(&size.to_le_bytes());
        self.tags.extend_from_slice(payload);
        self.pad();
        self
    }

    /// Append a memory-map tag with 24-byte descriptors `(addr, len, type)`.
    #[must_use]
    pub fn memory_map(self, entries: &[(u64, u64, u32)]) -> Self {
        self.memory_map_with_stride(MIN_ENTRY_SIZE, entries)
    }

    /// Append a memory-map tag whose descriptors are `entry_size` bytes apart.
    ///
    /// Descriptors are truncated or zero-extended to the stride.
    #[must_use]
    pub fn memory_map_with_stride(self, entry_size: u32, entries: &[(u64, u64, u32)]) -> Self {
        let stride = entry_size as usize;
        let mut payload = Vec::with_capacity(8 + stride * entries.len());
        payload.extend_from_slice(&entry_size.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        for &(addr, len, typ) in entries {
            let mut descriptor = Vec::with_capacity(stride.max(24));
            descriptor.extend_from_slice(&addr.to_le_bytes());
            descriptor.extend_from_slice(&len.to_le_bytes());
            descriptor.extend_from_slice(&typ.to_le_bytes());
            descriptor.extend_from_slice(&0u32.to_le_bytes());
            descriptor.resize(stride, 0);
            payload.extend_from_slice(&descriptor);
        }

        self.tag(TAG_MEMORY_MAP, &payload)
    }

    /// Finish the blob: header, tags, end tag.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(self) -> Vec<u8> {
        let total_size = HEADER_SIZE + self.tags.len() + HEADER_SIZE;
        let mut blob = Vec::with_capacity(total_size);
        blob.extend_from_slice(&(total_size as u32).to_le_bytes());
        blob.extend_from_slice(&0u32.to_le_bytes());
        blob.extend_from_slice(&self.tags);
        blob.extend_from_slice(&TAG_END.to_le_bytes());
        blob.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        blob
    }

    fn pad(&mut self) {
        while !self.tags.len().is_multiple_of(HEADER_SIZE) {
            self.tags.push(0);
        }
    }
}
