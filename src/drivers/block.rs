//! Block Device Abstraction
//!
//! The filesystem reads sectors exclusively through the [`BlockDevice`]
//! trait. The virtio-blk transport implements it for real hardware; tests
//! substitute an in-memory disk.

use core::fmt;

/// Standard sector size (512 bytes)
pub const SECTOR_SIZE: usize = 512;

/// Unified error type for block operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// Device absent, unsupported version, undersized queue or rejected features
    InitError,
    /// The device did not complete a request before the deadline
    Timeout,
    /// The device reported a failed request
    IoError,
    /// Buffer too small for the requested sectors
    InvalidArgument,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BlockError::InitError => "block device initialization failed",
            BlockError::Timeout => "block request timed out",
            BlockError::IoError => "block device reported an I/O error",
            BlockError::InvalidArgument => "invalid block request",
        };
        f.write_str(msg)
    }
}

/// Trait for sector-addressed storage devices
pub trait BlockDevice {
    /// Read one 512-byte sector into the start of `buffer`.
    ///
    /// `buffer` must hold at least [`SECTOR_SIZE`] bytes.
    fn read_sector(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), BlockError>;

    /// Read `count` consecutive sectors starting at `lba`.
    ///
    /// Sectors are read one at a time; the first failure aborts the loop and
    /// leaves the sectors already read in place.
    fn read_sectors(&mut self, lba: u64, count: u32, buffer: &mut [u8]) -> Result<(), BlockError> {
        let needed = count as usize * SECTOR_SIZE;
        if buffer.len() < needed {
            return Err(BlockError::InvalidArgument);
        }

        buffer[..needed]
            .chunks_exact_mut(SECTOR_SIZE)
            .zip(lba..)
            .try_for_each(|(chunk, sector)| self.read_sector(sector, chunk))
    }
}
