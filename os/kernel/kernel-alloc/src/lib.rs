//! # Physical Memory Management
//!
//! Frame allocation for the kernel and the boot-time sequence that sets it up.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │       Initialization Orchestrator ([`pmm`])         │
//! │    • memory-map totals and reservations             │
//! │    • page-table arena and bitmap placement          │
//! │    • identity map + CR3 switch                      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Bitmap Frame Allocator ([`frame_alloc`])       │
//! │    • one bit per 4 KiB frame                        │
//! │    • circular first-fit scan from the last hit      │
//! │    • no heap, storage carved from physical memory   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kernel_alloc::{PmmConfig, init_physical_memory};
//!
//! let mut pm = unsafe {
//!     init_physical_memory(&boot_info, kernel_image, &PmmConfig::default(), &mapper, &mut platform)
//! }?;
//! if let Some(frame) = pm.frames.allocate() {
//!     pm.frames.free(frame);
//! }
//! ```
//!
//! ## Performance Characteristics
//!
//! * **Allocation**: O(n) worst case, amortized near O(1) for sequential use
//! * **Free**: O(1)
//! * **Memory Overhead**: 1 bit per 4 KiB frame up to the highest usable address

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod frame_alloc;
pub mod pmm;

pub use crate::frame_alloc::{BitmapError, BitmapFrameAlloc, FrameIndex, FreeError};
pub use crate::pmm::{InitError, MemoryLayout, PhysicalMemory, PmmConfig, init_physical_memory};
