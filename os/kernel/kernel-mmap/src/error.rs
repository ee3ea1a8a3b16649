/// Why the boot-information blob could not be read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootInfoError {
    #[error("boot information shorter than its 8-byte header ({available} bytes)")]
    HeaderTooShort { available: usize },
    #[error("boot information claims {total_size} bytes but only {available} are available")]
    SizeExceedsBuffer { total_size: usize, available: usize },
    #[error("malformed tag at offset {offset:#x}")]
    Malformed { offset: usize },
    #[error("no memory map tag present")]
    MissingMemoryMap,
    #[error("memory map entry size {entry_size} is smaller than a descriptor")]
    InvalidEntrySize { entry_size: u32 },
}
