//! vioboot - main entry point
//!
//! On `aarch64-unknown-none` this is the boot stage itself: `_start` (see
//! `arch::aarch64::entry`) calls [`rust_main`]. Host builds only print a
//! hint; the library is exercised through `cargo test`.

#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_std, no_main)]

/// Rust entry point called from assembly once the stack and BSS are set up
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[unsafe(no_mangle)]
pub extern "C" fn rust_main() -> ! {
    vioboot::boot::boot_main(&vioboot::config::BootConfig::DEFAULT)
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn main() {
    eprintln!("vioboot runs on aarch64-unknown-none (QEMU virt); build with --target");
}
