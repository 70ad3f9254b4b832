//! virtio-mmio register block
//!
//! Offsets are in bytes from the start of a device's register window. The
//! legacy-only registers (version 1) and the modern-only ones (version 2)
//! overlap the same window.

pub const MAGIC_VALUE: u64 = 0x000;
pub const VERSION: u64 = 0x004;
pub const DEVICE_ID: u64 = 0x008;
pub const VENDOR_ID: u64 = 0x00C;
pub const DEVICE_FEATURES: u64 = 0x010;
pub const DEVICE_FEATURES_SEL: u64 = 0x014;
pub const DRIVER_FEATURES: u64 = 0x020;
pub const DRIVER_FEATURES_SEL: u64 = 0x024;
/// Legacy only
pub const GUEST_PAGE_SIZE: u64 = 0x028;
pub const QUEUE_SEL: u64 = 0x030;
pub const QUEUE_NUM_MAX: u64 = 0x034;
pub const QUEUE_NUM: u64 = 0x038;
/// Legacy only
pub const QUEUE_ALIGN: u64 = 0x03C;
/// Legacy only
pub const QUEUE_PFN: u64 = 0x040;
/// Modern only
pub const QUEUE_READY: u64 = 0x044;
pub const QUEUE_NOTIFY: u64 = 0x050;
pub const INTERRUPT_STATUS: u64 = 0x060;
pub const INTERRUPT_ACK: u64 = 0x064;
pub const STATUS: u64 = 0x070;
/// Modern only, low/high pairs
pub const QUEUE_DESC_LOW: u64 = 0x080;
pub const QUEUE_AVAIL_LOW: u64 = 0x090;
pub const QUEUE_USED_LOW: u64 = 0x0A0;

/// Expected MAGIC_VALUE ("virt")
pub const MAGIC: u32 = 0x7472_6976;

/// Size of one device register window
pub const WINDOW_SIZE: usize = 0x200;

/// Device status bits
pub mod status {
    pub const ACKNOWLEDGE: u32 = 0x01;
    pub const DRIVER: u32 = 0x02;
    pub const DRIVER_OK: u32 = 0x04;
    pub const FEATURES_OK: u32 = 0x08;
    pub const DEVICE_NEEDS_RESET: u32 = 0x40;
    pub const FAILED: u32 = 0x80;
}
