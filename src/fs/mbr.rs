//! MBR (Master Boot Record) partition table
//!
//! Sector 0 of the disk: 446 bytes of boot code, four 16-byte partition
//! entries at 0x1BE and the 0xAA55 signature at 0x1FE.

use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// Boot signature shared by the MBR and the FAT boot sector (bytes 0x55 0xAA)
pub const BOOT_SIGNATURE: u16 = 0xAA55;

/// Number of primary partition entries
pub const PARTITION_COUNT: usize = 4;

/// Byte offset of the partition table
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// FAT32 with CHS addressing
pub const PARTITION_TYPE_FAT32_CHS: u8 = 0x0B;
/// FAT32 with LBA addressing
pub const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;

/// MBR partition entry
#[repr(C, packed)]
#[derive(FromBytes, Immutable, KnownLayout, Unaligned, Debug, Clone, Copy)]
pub struct PartitionEntry {
    /// 0x80 if bootable
    pub boot_flag: u8,
    /// CHS address of the first sector (unused)
    pub chs_start: [u8; 3],
    /// Partition type
    pub partition_type: u8,
    /// CHS address of the last sector (unused)
    pub chs_end: [u8; 3],
    /// First sector of the partition
    pub lba_start: u32,
    /// Number of sectors
    pub sector_count: u32,
}

impl PartitionEntry {
    /// Check if the slot is unused
    pub fn is_empty(&self) -> bool {
        self.partition_type == 0
    }

    /// Check if the type byte names either FAT32 variant
    pub fn is_fat32(&self) -> bool {
        let kind = self.partition_type;
        kind == PARTITION_TYPE_FAT32_CHS || kind == PARTITION_TYPE_FAT32_LBA
    }

    /// Check if the boot flag is set
    pub fn is_bootable(&self) -> bool {
        self.boot_flag == 0x80
    }
}

/// Master Boot Record
#[repr(C, packed)]
#[derive(FromBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
pub struct MasterBootRecord {
    pub bootstrap: [u8; PARTITION_TABLE_OFFSET],
    pub partitions: [PartitionEntry; PARTITION_COUNT],
    pub signature: u16,
}

impl MasterBootRecord {
    /// Parse a sector; `None` if it is shorter than 512 bytes.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        let Ok((mbr, _)) = Self::read_from_prefix(sector) else {
            return None;
        };
        Some(mbr)
    }

    /// Check the boot signature
    pub fn is_valid(&self) -> bool {
        self.signature == BOOT_SIGNATURE
    }

    /// Get a partition entry by index (0-3)
    pub fn partition(&self, index: usize) -> Option<PartitionEntry> {
        let partitions = self.partitions;
        partitions.get(index).copied()
    }
}

impl core::fmt::Debug for MasterBootRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let signature = self.signature;
        let partitions = self.partitions;
        f.debug_struct("MasterBootRecord")
            .field("partitions", &partitions)
            .field("signature", &format_args!("{:#06x}", signature))
            .finish()
    }
}
