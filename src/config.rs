//! Boot configuration
//!
//! Everything the boot stage needs to know about the machine and the image
//! it loads. `BootConfig::DEFAULT` describes the QEMU `virt` machine and is
//! what the binary uses.

use crate::drivers::serial::PL011_VIRT_BASE;

/// Where and how to look for the virtio-mmio block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtioConfig {
    /// Physical address of the first register window
    pub mmio_base: u64,
    /// Distance between consecutive register windows
    pub slot_stride: u64,
    /// Number of windows to scan
    pub slot_count: usize,
    /// Per-request completion deadline in milliseconds
    pub io_timeout_ms: u64,
}

impl VirtioConfig {
    /// QEMU `virt`: 32 windows of 0x200 bytes at 0x0A00_0000.
    pub const DEFAULT: Self = Self {
        mmio_base: 0x0A00_0000,
        slot_stride: 0x200,
        slot_count: 32,
        io_timeout_ms: 1000,
    };
}

impl Default for VirtioConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Boot stage configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Kernel file name in 8.3 directory form
    pub kernel_name: [u8; 11],
    /// Address the kernel is loaded at and entered from
    pub load_address: u64,
    /// Largest kernel accepted, in bytes
    pub max_kernel_size: u32,
    /// Kernels smaller than this only produce a warning
    pub small_kernel_warning: u32,
    /// MBR partition holding the FAT32 volume (0-3)
    pub partition: u8,
    /// PL011 base address for diagnostics
    pub uart_base: u64,
    pub virtio: VirtioConfig,
}

impl BootConfig {
    pub const DEFAULT: Self = Self {
        kernel_name: *b"KERNEL  BIN",
        load_address: 0x4008_0000,
        max_kernel_size: 16 * 1024 * 1024,
        small_kernel_warning: 100,
        partition: 0,
        uart_base: PL011_VIRT_BASE,
        virtio: VirtioConfig::DEFAULT,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
