//! # Kernel Memory Configuration
//!
//! Compile-time constants that the early memory subsystem, the kernel entry
//! and the linker script have to agree on.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1 MiB)        │
//!             │  (BIOS, boot information, ...)  │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//!             ├─────────────────────────────────┤ _kernel_end
//!             │   Page-table arena              │
//!             │ (PAGE_TABLE_RESERVE_BYTES)      │
//!             ├─────────────────────────────────┤
//!             │    Available RAM                │
//! EARLY_      │  (bootloader identity maps      │
//! IDENTITY_   │   everything below this line)   │
//! LIMIT       ├─────────────────────────────────┤ 0x4000_0000 (1 GiB)
//!             │    Available RAM                │
//!             └─────────────────────────────────┘
//! ```
//!
//! The page-table arena has to sit below [`EARLY_IDENTITY_LIMIT`](memory::EARLY_IDENTITY_LIMIT)
//! because the tables are written through the bootloader's identity map
//! before the kernel's own one is active.
//!
//! ## Build Script Integration
//! ```rust
//! use kernel_info::memory::PHYS_LOAD;
//!
//! println!("cargo:rustc-link-arg=--defsym=PHYS_LOAD={PHYS_LOAD:#x}");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
