//! # Kernel Entry Point
//!
//! ## Entry contract
//! The boot stub jumps to [`_start`] in 64-bit long mode with
//! - interrupts disabled,
//! - `[0, 1 GiB)` identity mapped (see [`kernel_vmem::info::EARLY_IDENTITY_LIMIT`]),
//! - `RDI` holding the physical address of the Multiboot2 boot information.
//!
//! From there [`init::kernel_main`] brings up physical memory and halts.
//!
//! Hosted builds (workspace tests) compile to an empty binary.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![allow(unsafe_code)]

#[cfg(target_os = "none")]
mod init;
#[cfg(target_os = "none")]
mod platform;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use kernel_vmem::Platform;

    log::error!("Kernel panic: {info}");
    platform::X86Platform.halt_forever()
}

/// The kernel entry point.
///
/// # Naked function & Stack
/// The bootloader's stack is of unknown size and location, so we switch to
/// [`BOOT_STACK`](init::boot_stack::BOOT_STACK) before any Rust code runs.
/// `RDI` is preserved across the switch and handed on per the SysV ABI.
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".text._start")]
pub extern "C" fn _start(_mb_info_addr: u64) -> ! {
    core::arch::naked_asm!(
        "cli",

        // Visible on -debugcon before anything else can go wrong.
        "mov    dx, 0x402",
        "mov    al, 'K'",
        "out    dx, al",

        // Save the boot information address.
        "mov r12, rdi",

        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // Emulate a CALL by pushing a dummy return address (so RSP % 16 == 8 at entry)
        "push 0",
        "xor rbp, rbp",

        "mov rdi, r12",
        "jmp {rust_entry}",
        stack_sym = sym init::boot_stack::BOOT_STACK,
        stack_size = const init::boot_stack::BOOT_STACK_SIZE,
        rust_entry = sym init::kernel_main,
    );
}

#[cfg(not(target_os = "none"))]
fn main() {}
