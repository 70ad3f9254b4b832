//! In-memory disks for filesystem tests
//!
//! [`MemoryDisk`] is a [`BlockDevice`] over a byte vector with read counting
//! and fault injection. [`ImageBuilder`] lays out an MBR-partitioned FAT32
//! volume with files and directories, and lets tests poke at the raw
//! structures afterwards.

use crate::drivers::block::{BlockDevice, BlockError, SECTOR_SIZE};
use crate::fs::mbr::{BOOT_SIGNATURE, PARTITION_TABLE_OFFSET, PARTITION_TYPE_FAT32_LBA};
use std::vec;
use std::vec::Vec;

pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// FAT32 end-of-chain value written by the builder
pub const EOC: u32 = 0x0FFF_FFFF;

/// A sector-addressed disk backed by memory
pub struct MemoryDisk {
    data: Vec<u8>,
    reads: usize,
    fail_lba: Option<(u64, BlockError)>,
    fail_after: Option<(usize, BlockError)>,
}

impl MemoryDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: 0,
            fail_lba: None,
            fail_after: None,
        }
    }

    /// Number of `read_sector` calls so far
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Fail every read of `lba` with `error`.
    pub fn fail_lba(&mut self, lba: u64, error: BlockError) {
        self.fail_lba = Some((lba, error));
    }

    /// Fail every read after the first `count` with `error`.
    pub fn fail_after(&mut self, count: usize, error: BlockError) {
        self.fail_after = Some((self.reads + count, error));
    }
}

impl BlockDevice for MemoryDisk {
    fn read_sector(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), BlockError> {
        self.reads += 1;

        if let Some((bad, error)) = self.fail_lba {
            if bad == lba {
                return Err(error);
            }
        }
        if let Some((limit, error)) = self.fail_after {
            if self.reads > limit {
                return Err(error);
            }
        }
        if buffer.len() < SECTOR_SIZE {
            return Err(BlockError::InvalidArgument);
        }

        let start = lba as usize * SECTOR_SIZE;
        let Some(sector) = self.data.get(start..start + SECTOR_SIZE) else {
            return Err(BlockError::IoError);
        };
        buffer[..SECTOR_SIZE].copy_from_slice(sector);
        Ok(())
    }
}

/// Encode a 32-byte short directory record.
pub fn dir_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut record = [0u8; 32];
    record[..11].copy_from_slice(name);
    record[11] = attr;
    record[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    record[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    record[28..32].copy_from_slice(&size.to_le_bytes());
    record
}

/// Where the next record of a directory goes
struct DirCursor {
    first: u32,
    cluster: u32,
    index: usize,
}

/// Builds an MBR disk with one FAT32 partition
pub struct ImageBuilder {
    image: Vec<u8>,
    partition_start: u32,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    fat_size: u32,
    cluster_count: u32,
    next_free: u32,
    dirs: Vec<DirCursor>,
}

impl ImageBuilder {
    /// Root directory cluster
    pub const ROOT: u32 = 2;

    /// A volume with `sectors_per_cluster` and room for 512 clusters.
    pub fn new(sectors_per_cluster: u8) -> Self {
        let partition_start = 64u32;
        let reserved_sectors = 32u16;
        let num_fats = 2u8;
        let fat_size = 4u32;
        // Entries 0 and 1 are reserved
        let cluster_count = fat_size * (SECTOR_SIZE as u32 / 4) - 2;
        let total_sectors = partition_start
            + reserved_sectors as u32
            + num_fats as u32 * fat_size
            + cluster_count * sectors_per_cluster as u32;

        let mut builder = Self {
            image: vec![0u8; total_sectors as usize * SECTOR_SIZE],
            partition_start,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            fat_size,
            cluster_count,
            next_free: Self::ROOT + 1,
            dirs: vec![DirCursor {
                first: Self::ROOT,
                cluster: Self::ROOT,
                index: 0,
            }],
        };

        builder.write_mbr();
        builder.write_boot_sector(total_sectors - partition_start);
        builder.set_fat(0, 0x0FFF_FFF8);
        builder.set_fat(1, EOC);
        builder.set_fat(Self::ROOT, EOC);
        builder.add_entry(
            Self::ROOT,
            dir_entry(b"VIOBOOT    ", ATTR_VOLUME_ID, 0, 0),
        );
        builder
    }

    fn write_mbr(&mut self) {
        let entry = PARTITION_TABLE_OFFSET;
        let sectors = (self.image.len() / SECTOR_SIZE) as u32 - self.partition_start;
        self.image[entry] = 0x80;
        self.image[entry + 4] = PARTITION_TYPE_FAT32_LBA;
        self.image[entry + 8..entry + 12].copy_from_slice(&self.partition_start.to_le_bytes());
        self.image[entry + 12..entry + 16].copy_from_slice(&sectors.to_le_bytes());
        self.image[0x1FE..0x200].copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());
    }

    fn write_boot_sector(&mut self, total_sectors: u32) {
        let start = self.partition_start as usize * SECTOR_SIZE;
        let bs = &mut self.image[start..start + SECTOR_SIZE];
        bs[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        bs[3..11].copy_from_slice(b"VIOBOOT ");
        bs[0x0B..0x0D].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        bs[0x0D] = self.sectors_per_cluster;
        bs[0x0E..0x10].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        bs[0x10] = self.num_fats;
        bs[0x15] = 0xF8;
        bs[0x18..0x1A].copy_from_slice(&63u16.to_le_bytes());
        bs[0x1A..0x1C].copy_from_slice(&255u16.to_le_bytes());
        bs[0x1C..0x20].copy_from_slice(&self.partition_start.to_le_bytes());
        bs[0x20..0x24].copy_from_slice(&total_sectors.to_le_bytes());
        bs[0x24..0x28].copy_from_slice(&self.fat_size.to_le_bytes());
        bs[0x2C..0x30].copy_from_slice(&Self::ROOT.to_le_bytes());
        bs[0x30..0x32].copy_from_slice(&1u16.to_le_bytes());
        bs[0x32..0x34].copy_from_slice(&6u16.to_le_bytes());
        bs[0x40] = 0x80;
        bs[0x42] = 0x29;
        bs[0x43..0x47].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        bs[0x47..0x52].copy_from_slice(b"NO NAME    ");
        bs[0x52..0x5A].copy_from_slice(b"FAT32   ");
        bs[0x1FE..0x200].copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());
    }

    /// First sector of the partition (the boot sector)
    pub fn partition_start(&self) -> u64 {
        self.partition_start as u64
    }

    /// Absolute LBA of the first FAT
    pub fn fat_start(&self) -> u64 {
        self.partition_start() + self.reserved_sectors as u64
    }

    /// Absolute LBA of cluster 2
    pub fn data_start(&self) -> u64 {
        self.fat_start() + self.num_fats as u64 * self.fat_size as u64
    }

    pub fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    fn cluster_offset(&self, cluster: u32) -> usize {
        let lba = self.data_start() + (cluster as u64 - 2) * self.sectors_per_cluster as u64;
        lba as usize * SECTOR_SIZE
    }

    /// Mutable view of one cluster's bytes
    pub fn cluster_mut(&mut self, cluster: u32) -> &mut [u8] {
        let offset = self.cluster_offset(cluster);
        let size = self.cluster_size();
        &mut self.image[offset..offset + size]
    }

    /// Mutable view of the boot sector
    pub fn boot_sector_mut(&mut self) -> &mut [u8] {
        let start = self.partition_start as usize * SECTOR_SIZE;
        &mut self.image[start..start + SECTOR_SIZE]
    }

    /// Mutable view of the MBR
    pub fn mbr_mut(&mut self) -> &mut [u8] {
        &mut self.image[..SECTOR_SIZE]
    }

    /// Write a FAT entry in every FAT copy.
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        for copy in 0..self.num_fats as u64 {
            let fat = (self.fat_start() + copy * self.fat_size as u64) as usize * SECTOR_SIZE;
            let at = fat + cluster as usize * 4;
            self.image[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn allocate(&mut self) -> u32 {
        let cluster = self.next_free;
        assert!(cluster < self.cluster_count + 2, "test image full");
        self.next_free += 1;
        self.set_fat(cluster, EOC);
        cluster
    }

    /// Append a raw 32-byte record to directory `dir`, growing its chain
    /// when the current cluster is full.
    pub fn add_entry(&mut self, dir: u32, record: [u8; 32]) {
        let per_cluster = self.cluster_size() / 32;
        let position = self
            .dirs
            .iter()
            .position(|d| d.first == dir)
            .expect("unknown directory");

        if self.dirs[position].index == per_cluster {
            let next = self.allocate();
            let current = self.dirs[position].cluster;
            self.set_fat(current, next);
            self.dirs[position].cluster = next;
            self.dirs[position].index = 0;
        }

        let DirCursor { cluster, index, .. } = self.dirs[position];
        let offset = self.cluster_offset(cluster) + index * 32;
        self.image[offset..offset + 32].copy_from_slice(&record);
        self.dirs[position].index += 1;
    }

    /// Store `data` in a fresh chain; returns the first cluster (0 if empty).
    pub fn write_data(&mut self, data: &[u8]) -> u32 {
        let mut first = 0;
        let mut previous: Option<u32> = None;
        for chunk in data.chunks(self.cluster_size()) {
            let cluster = self.allocate();
            let offset = self.cluster_offset(cluster);
            self.image[offset..offset + chunk.len()].copy_from_slice(chunk);
            match previous {
                Some(prev) => self.set_fat(prev, cluster),
                None => first = cluster,
            }
            previous = Some(cluster);
        }
        first
    }

    /// Add a file to `dir`; returns its first cluster.
    pub fn add_file(&mut self, dir: u32, name: &[u8; 11], data: &[u8]) -> u32 {
        let first = self.write_data(data);
        self.add_entry(dir, dir_entry(name, ATTR_ARCHIVE, first, data.len() as u32));
        first
    }

    /// Add a subdirectory (with `.` and `..`) to `dir`; returns its cluster.
    pub fn add_dir(&mut self, dir: u32, name: &[u8; 11]) -> u32 {
        let cluster = self.allocate();
        self.dirs.push(DirCursor {
            first: cluster,
            cluster,
            index: 0,
        });
        let parent = if dir == Self::ROOT { 0 } else { dir };
        self.add_entry(cluster, dir_entry(b".          ", ATTR_DIRECTORY, cluster, 0));
        self.add_entry(cluster, dir_entry(b"..         ", ATTR_DIRECTORY, parent, 0));
        self.add_entry(dir, dir_entry(name, ATTR_DIRECTORY, cluster, 0));
        cluster
    }

    pub fn build(self) -> Vec<u8> {
        self.image
    }

    pub fn into_disk(self) -> MemoryDisk {
        MemoryDisk::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_disk_reads_and_counts() {
        let mut data = vec![0u8; 4 * SECTOR_SIZE];
        data[2 * SECTOR_SIZE] = 0x42;
        let mut disk = MemoryDisk::new(data);
        let mut buffer = [0u8; SECTOR_SIZE];

        disk.read_sector(2, &mut buffer).unwrap();
        assert_eq!(buffer[0], 0x42);
        assert_eq!(disk.read_sector(4, &mut buffer), Err(BlockError::IoError));
        assert_eq!(disk.reads(), 2);
    }

    #[test]
    fn test_memory_disk_fault_injection() {
        let mut disk = MemoryDisk::new(vec![0u8; 4 * SECTOR_SIZE]);
        let mut buffer = [0u8; SECTOR_SIZE];

        disk.fail_lba(1, BlockError::Timeout);
        assert!(disk.read_sector(0, &mut buffer).is_ok());
        assert_eq!(disk.read_sector(1, &mut buffer), Err(BlockError::Timeout));

        disk.fail_after(1, BlockError::IoError);
        assert!(disk.read_sector(2, &mut buffer).is_ok());
        assert_eq!(disk.read_sector(3, &mut buffer), Err(BlockError::IoError));
    }

    #[test]
    fn test_builder_chains_file_clusters() {
        let mut builder = ImageBuilder::new(1);
        let data = vec![7u8; 3 * SECTOR_SIZE];
        let first = builder.add_file(ImageBuilder::ROOT, b"DATA    BIN", &data);
        let fat = builder.fat_start() as usize * SECTOR_SIZE;
        let image = builder.build();

        let entry = |c: u32| {
            let at = fat + c as usize * 4;
            u32::from_le_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]])
        };
        assert_eq!(entry(first), first + 1);
        assert_eq!(entry(first + 1), first + 2);
        assert_eq!(entry(first + 2), EOC);
    }
}
