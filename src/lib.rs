//! vioboot - a minimal AArch64 boot stage
//!
//! Loads a kernel image from a FAT32 partition on a virtio-mmio block device
//! (QEMU `virt`) and jumps to it. No heap, no interrupts: every device is
//! polled and every buffer is fixed size.
//!
//! The library is `no_std`; host builds exist for the test suite, which
//! replaces the hardware with in-memory disks and a simulated virtio device.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod boot;
pub mod config;
pub mod drivers;
pub mod fs;
pub mod logger;
pub mod time;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use core::panic::PanicInfo;

/// Global panic handler
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    arch::aarch64::halt()
}
