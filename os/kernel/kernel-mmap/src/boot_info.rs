use crate::{
    BootInfoError, HEADER_SIZE, MIN_ENTRY_SIZE, MemoryMap, TAG_END, TAG_MEMORY_MAP, read_u32,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalRange, align_up};

/// A validated view of the boot-information blob.
///
/// The view only borrows the bytes; nothing is copied and nothing is retained
/// once the caller drops it.
#[derive(Copy, Clone)]
pub struct BootInformation<'a> {
    bytes: &'a [u8],
    addr: PhysicalAddress,
}

impl<'a> BootInformation<'a> {
    /// Wrap `bytes`, which live at physical address `addr`.
    ///
    /// The blob is truncated to its self-reported `total_size`.
    ///
    /// # Errors
    /// - [`BootInfoError::HeaderTooShort`] if the header (or the size it reports) is below 8 bytes.
    /// - [`BootInfoError::SizeExceedsBuffer`] if `total_size` exceeds `bytes`.
    pub fn parse(bytes: &'a [u8], addr: PhysicalAddress) -> Result<Self, BootInfoError> {
        let available = bytes.len();
        let total_size = read_u32(bytes, 0)
            .map(|v| v as usize)
            .ok_or(BootInfoError::HeaderTooShort { available })?;

        if total_size < HEADER_SIZE || available < HEADER_SIZE {
            return Err(BootInfoError::HeaderTooShort { available });
        }
        if total_size > available {
            return Err(BootInfoError::SizeExceedsBuffer {
                total_size,
                available,
            });
        }

        Ok(Self {
            bytes: &bytes[..total_size],
            addr,
        })
    }

    /// Build the view from the raw address the bootloader passed in.
    ///
    /// # Safety
    /// `addr` must point at a readable Multiboot2 boot-information structure
    /// whose whole extent (as reported in its header) stays mapped and
    /// unmodified for `'a`.
    ///
    /// # Errors
    /// See [`BootInformation::parse`].
    pub unsafe fn from_addr(addr: PhysicalAddress) -> Result<Self, BootInfoError> {
        let ptr = addr.as_u64() as *const u8;
        // SAFETY: the caller guarantees the header is readable.
        let total_size = unsafe { core::ptr::read_unaligned(ptr.cast::<u32>()) } as usize;
        // SAFETY: the caller guarantees `total_size` bytes are readable.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, total_size.max(HEADER_SIZE)) };
        Self::parse(bytes, addr)
    }

    /// Size of the blob in bytes, as reported by its header.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.addr
    }

    /// The physical bytes occupied by the blob itself.
    #[inline]
    #[must_use]
    pub const fn physical_range(&self) -> PhysicalRange {
        PhysicalRange::from_start_len(self.addr, self.bytes.len() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn tags(&self) -> TagIter<'a> {
        TagIter {
            bytes: self.bytes,
            offset: HEADER_SIZE,
            done: false,
        }
    }

    /// Locate and validate the memory-map tag.
    ///
    /// # Errors
    /// - [`BootInfoError::Malformed`] if the tag list is corrupt or runs out before its end tag.
    /// - [`BootInfoError::MissingMemoryMap`] if the list ends without one.
    /// - [`BootInfoError::InvalidEntrySize`] if the descriptor stride is too small.
    pub fn memory_map(&self) -> Result<MemoryMap<'a>, BootInfoError> {
        // Walk the whole list so that a missing end tag is caught too.
        let mut found = None;
        for tag in self.tags() {
            let tag = tag?;
            if tag.typ == TAG_MEMORY_MAP && found.is_none() {
                found = Some(tag);
            }
        }
        let tag = found.ok_or(BootInfoError::MissingMemoryMap)?;

        let (Some(entry_size), Some(entry_version)) =
            (read_u32(tag.payload, 0), read_u32(tag.payload, 4))
        else {
            return Err(BootInfoError::Malformed { offset: tag.offset });
        };

        if entry_size < MIN_ENTRY_SIZE {
            return Err(BootInfoError::InvalidEntrySize { entry_size });
        }

        Ok(MemoryMap::new(entry_size, entry_version, &tag.payload[8..]))
    }
}

impl core::fmt::Debug for BootInformation<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootInformation")
            .field("addr", &self.addr)
            .field("total_size", &self.bytes.len())
            .finish()
    }
}

/// One tag of the boot-information blob.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Tag type (`6` for the memory map).
    pub typ: u32,
    /// Size including the 8-byte tag header, excluding padding.
    pub size: u32,
    /// Offset of the tag header from the start of the blob.
    pub offset: usize,
    /// Bytes following the tag header.
    pub payload: &'a [u8],
}

/// Iterator over the tags of a [`BootInformation`].
///
/// Yields each tag up to (not including) the end tag. A corrupt tag, or
/// running out of bytes before the end tag, is reported once as an error,
/// after which the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct TagIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> TagIter<'a> {
    fn fail(&mut self) -> Option<Result<Tag<'a>, BootInfoError>> {
        self.done = true;
        log::warn!("Malformed boot information tag at offset {:#x}", self.offset);
        Some(Err(BootInfoError::Malformed {
            offset: self.offset,
        }))
    }
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Result<Tag<'a>, BootInfoError>;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.offset >= self.bytes.len() {
            // The list must close with an end tag.
            return self.fail();
        }

        let (Some(typ), Some(size)) = (
            read_u32(self.bytes, self.offset),
            read_u32(self.bytes, self.offset + 4),
        ) else {
            return self.fail();
        };

        if typ == TAG_END {
            self.done = true;
            return None;
        }

        let len = size as usize;
        let Some(end) = self.offset.checked_add(len) else {
            return self.fail();
        };
        if len < HEADER_SIZE || end > self.bytes.len() {
            return self.fail();
        }

        let tag = Tag {
            typ,
            size,
            offset: self.offset,
            payload: &self.bytes[self.offset + HEADER_SIZE..end],
        };

        self.offset += align_up(u64::from(size), HEADER_SIZE as u64) as usize;
        Some(Ok(tag))
    }
}

impl core::iter::FusedIterator for TagIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BootInfoBuilder;

    const AT: PhysicalAddress = PhysicalAddress::new(0x9_0000);

    #[test]
    fn header_is_validated() {
        assert_eq!(
            BootInformation::parse(&[8, 0, 0], AT).unwrap_err(),
            BootInfoError::HeaderTooShort { available: 3 }
        );
        assert_eq!(
            BootInformation::parse(&[4, 0, 0, 0, 0, 0, 0, 0], AT).unwrap_err(),
            BootInfoError::HeaderTooShort { available: 8 }
        );
        assert_eq!(
            BootInformation::parse(&[64, 0, 0, 0, 0, 0, 0, 0], AT).unwrap_err(),
            BootInfoError::SizeExceedsBuffer {
                total_size: 64,
                available: 8
            }
        );
    }

    #[test]
    fn physical_range_covers_reported_size() {
        let blob = BootInfoBuilder::new().memory_map(&[(0, 0x9_f000, 1)]).build();
        let info = BootInformation::parse(&blob, AT).unwrap();
        assert_eq!(info.total_size(), blob.len());
        assert_eq!(info.physical_range().start(), AT);
        assert_eq!(info.physical_range().len(), blob.len() as u64);
    }

    #[test]
    fn trailing_bytes_beyond_total_size_are_ignored() {
        let mut blob = BootInfoBuilder::new().memory_map(&[(0, 0x9_f000, 1)]).build();
        let reported = blob.len();
        blob.extend_from_slice(&[0xAA; 32]);
        let info = BootInformation::parse(&blob, AT).unwrap();
        assert_eq!(info.total_size(), reported);
    }

    #[test]
    fn unknown_tags_are_skipped_with_padding() {
        let blob = BootInfoBuilder::new()
            .tag(1, b"cmdline\0")
            .tag(2, b"loader")
            .memory_map(&[(0x10_0000, 0x10_0000, 1)])
            .tag(21, &[0u8; 4])
            .build();
        let info = BootInformation::parse(&blob, AT).unwrap();

        let tags: Vec<_> = info.tags().map(Result::unwrap).collect();
        assert_eq!(
            tags.iter().map(|t| t.typ).collect::<Vec<_>>(),
            vec![1, 2, 6, 21]
        );
        assert_eq!(tags[1].size, 14);
        assert_eq!(tags[1].payload, b"loader");
        assert!(tags.iter().all(|t| t.offset % 8 == 0));

        let mmap = info.memory_map().unwrap();
        assert_eq!(mmap.len(), 1);
    }

    #[test]
    fn missing_memory_map() {
        let blob = BootInfoBuilder::new().tag(1, b"cmdline\0").build();
        let info = BootInformation::parse(&blob, AT).unwrap();
        assert_eq!(
            info.memory_map().unwrap_err(),
            BootInfoError::MissingMemoryMap
        );
    }

    #[test]
    fn undersized_tag_is_malformed_and_fuses() {
        let mut blob = BootInfoBuilder::new().tag(1, b"cmdline\0").build();
        // Shrink the first tag's size below its own header.
        blob[12..16].copy_from_slice(&4u32.to_le_bytes());
        let info = BootInformation::parse(&blob, AT).unwrap();

        let mut tags = info.tags();
        assert_eq!(
            tags.next(),
            Some(Err(BootInfoError::Malformed { offset: 8 }))
        );
        assert_eq!(tags.next(), None);
        assert_eq!(
            info.memory_map().unwrap_err(),
            BootInfoError::Malformed { offset: 8 }
        );
    }

    #[test]
    fn tag_running_past_total_size_is_malformed() {
        let mut blob = BootInfoBuilder::new().tag(1, b"cmdline\0").build();
        blob[12..16].copy_from_slice(&0x1000u32.to_le_bytes());
        let info = BootInformation::parse(&blob, AT).unwrap();
        assert!(matches!(
            info.tags().next(),
            Some(Err(BootInfoError::Malformed { .. }))
        ));
    }

    #[test]
    fn entry_size_below_descriptor_is_rejected() {
        let blob = BootInfoBuilder::new()
            .memory_map_with_stride(16, &[(0, 0x1000, 1)])
            .build();
        let info = BootInformation::parse(&blob, AT).unwrap();
        assert_eq!(
            info.memory_map().unwrap_err(),
            BootInfoError::InvalidEntrySize { entry_size: 16 }
        );
    }

    #[test]
    fn blob_without_end_tag_is_malformed() {
        let mut blob = BootInfoBuilder::new()
            .memory_map(&[(0x10_0000, 0x10_0000, 1)])
            .build();
        // Drop the end tag and shrink the header's total size to match.
        blob.truncate(blob.len() - 8);
        let total = u32::try_from(blob.len()).unwrap();
        blob[0..4].copy_from_slice(&total.to_le_bytes());
        let info = BootInformation::parse(&blob, AT).unwrap();

        let mut tags = info.tags();
        assert_eq!(tags.next().map(|t| t.unwrap().typ), Some(TAG_MEMORY_MAP));
        assert_eq!(
            tags.next(),
            Some(Err(BootInfoError::Malformed { offset: blob.len() }))
        );
        assert_eq!(tags.next(), None);
        assert_eq!(
            info.memory_map().unwrap_err(),
            BootInfoError::Malformed { offset: blob.len() }
        );
    }
}
