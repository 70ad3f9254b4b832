//! Architecture support
//!
//! Only the bare-metal AArch64 target has an architecture layer; host builds
//! (tests) never touch system registers.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub mod aarch64;
