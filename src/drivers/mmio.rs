//! Memory-Mapped I/O (MMIO) Register Abstraction
//!
//! Every register access in the crate goes through [`MmioRegion`]. Accesses
//! are volatile (via tock-registers) and, in debug builds, bounds checked
//! against the size of the region.
//!
//! # Example
//!
//! ```rust,ignore
//! use vioboot::drivers::mmio::MmioRegion;
//!
//! let uart = MmioRegion::new(0x0900_0000, 0x1000).unwrap();
//! let flags = uart.read32(0x18);
//! uart.write32(0x00, b'A' as u32);
//! ```

use core::ptr::NonNull;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};

/// A memory-mapped register block.
#[derive(Clone, Copy)]
pub struct MmioRegion {
    /// Base address of the register block
    base: NonNull<u8>,
    /// Size of the block in bytes (used for bounds checking)
    #[cfg(debug_assertions)]
    size: usize,
}

// SAFETY: MmioRegion only contains a pointer to device register space, which
// stays mapped (identity) for the whole lifetime of the boot stage.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Create a register block view from a base address and size.
    ///
    /// Returns `None` for a null base.
    ///
    /// The caller must make sure `[base, base + size)` is device register
    /// space (or, in tests, memory that outlives the region).
    pub fn new(base: u64, #[allow(unused_variables)] size: usize) -> Option<Self> {
        let base = NonNull::new(base as usize as *mut u8)?;
        Some(Self {
            base,
            #[cfg(debug_assertions)]
            size,
        })
    }

    /// Base address of this region.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base.as_ptr() as usize as u64
    }

    /// Create a sub-region at `offset`.
    #[inline]
    pub fn subregion(&self, offset: u64, size: usize) -> Self {
        #[cfg(debug_assertions)]
        {
            assert!(
                (offset as usize).saturating_add(size) <= self.size,
                "MMIO subregion out of bounds: offset={:#x}, size={:#x}, region_size={:#x}",
                offset,
                size,
                self.size
            );
        }
        // SAFETY: offset stays inside the parent block, so the pointer is
        // non-null whenever the parent base is.
        let base = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset as usize)) };
        Self {
            base,
            #[cfg(debug_assertions)]
            size,
        }
    }

    #[cfg(debug_assertions)]
    #[inline]
    fn check_bounds(&self, offset: u64, access_size: usize) {
        let end = (offset as usize).saturating_add(access_size);
        assert!(
            end <= self.size,
            "MMIO access out of bounds: offset={:#x}, access_size={}, region_size={:#x}",
            offset,
            access_size,
            self.size
        );
    }

    /// Read a 32-bit register.
    #[inline]
    pub fn read32(&self, offset: u64) -> u32 {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 4);

        let reg = unsafe { &*(self.base.as_ptr().add(offset as usize) as *const ReadOnly<u32>) };
        reg.get()
    }

    /// Write a 32-bit register.
    #[inline]
    pub fn write32(&self, offset: u64, value: u32) {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 4);

        let reg = unsafe { &*(self.base.as_ptr().add(offset as usize) as *const WriteOnly<u32>) };
        reg.set(value);
    }

    /// Read-modify-write a 32-bit register.
    #[inline]
    pub fn modify32<F>(&self, offset: u64, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 4);

        let reg = unsafe { &*(self.base.as_ptr().add(offset as usize) as *const ReadWrite<u32>) };
        let old = reg.get();
        reg.set(f(old));
    }

    /// Write a 64-bit value as two 32-bit registers, low word first.
    ///
    /// virtio-mmio exposes queue addresses as `*_LOW`/`*_HIGH` register pairs
    /// which must be written as separate 32-bit accesses.
    #[inline]
    pub fn write64_lo_hi(&self, offset: u64, value: u64) {
        #[cfg(debug_assertions)]
        self.check_bounds(offset, 8);

        let lo = value as u32;
        let hi = (value >> 32) as u32;
        let lo_reg =
            unsafe { &*(self.base.as_ptr().add(offset as usize) as *const WriteOnly<u32>) };
        let hi_reg =
            unsafe { &*(self.base.as_ptr().add(offset as usize + 4) as *const WriteOnly<u32>) };
        lo_reg.set(lo);
        hi_reg.set(hi);
    }
}

impl core::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        #[cfg(debug_assertions)]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .field("size", &format_args!("{:#x}", self.size))
                .finish()
        }
        #[cfg(not(debug_assertions))]
        {
            f.debug_struct("MmioRegion")
                .field("base", &format_args!("{:#x}", self.base()))
                .finish()
        }
    }
}
