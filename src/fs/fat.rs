//! FAT32 filesystem driver
//!
//! Read-only access to a FAT32 volume inside an MBR partition: parse the boot
//! sector, find a file by its 8.3 name anywhere in the directory tree and
//! stream its cluster chain into memory.
//!
//! All memory the driver needs beyond a sector lives in a caller-provided
//! [`FatScratch`], so nothing cluster-sized ends up on the stack.

use core::fmt;

use heapless::Vec;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::drivers::block::{BlockDevice, BlockError, SECTOR_SIZE};
use crate::fs::SHORT_NAME_LEN;
use crate::fs::mbr::{BOOT_SIGNATURE, MasterBootRecord, PartitionEntry};

/// Largest supported cluster (128 sectors of 512 bytes)
pub const MAX_CLUSTER_SIZE: usize = 128 * SECTOR_SIZE;

/// Size of a short directory record
const DIR_ENTRY_SIZE: usize = 32;

/// FAT32 entries only use the low 28 bits
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// First end-of-chain value; everything from here to 0x0FFF_FFFF ends a chain
pub const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

/// Data clusters are numbered from 2
const FIRST_DATA_CLUSTER: u32 = 2;

/// Maximum directory nesting searched by [`Fat32Volume::open`]
pub const MAX_DIRECTORY_DEPTH: usize = 32;

/// First name byte of a deleted record
const DELETED_MARKER: u8 = 0xE5;
/// First name byte standing in for a literal 0xE5
const ESCAPED_E5: u8 = 0x05;

/// Directory entry attributes
const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

/// FAT32 boot sector
#[repr(C, packed)]
#[derive(FromBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
pub struct BiosParameterBlock {
    /// Jump instruction
    pub jmp: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    /// Sectors before the first FAT, boot sector included
    pub reserved_sectors: u16,
    pub num_fats: u8,
    /// Zero on FAT32
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub media_type: u8,
    /// Zero on FAT32
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub sectors_per_fat_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub backup_boot_sector: u16,
    pub reserved: [u8; 12],
    pub drive_number: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub volume_serial: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
    pub boot_code: [u8; 420],
    pub signature: u16,
}

/// FAT short directory record
#[repr(C, packed)]
#[derive(FromBytes, Immutable, KnownLayout, Unaligned, Clone, Copy, Debug)]
pub struct DirectoryEntry {
    /// 8.3 name, space padded, no separator
    pub name: [u8; SHORT_NAME_LEN],
    pub attr: u8,
    pub nt_reserved: u8,
    pub creation_time_tenths: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub last_access_date: u16,
    pub first_cluster_hi: u16,
    pub modification_time: u16,
    pub modification_date: u16,
    pub first_cluster_lo: u16,
    pub file_size: u32,
}

impl DirectoryEntry {
    /// Get the first cluster number
    pub fn first_cluster(&self) -> u32 {
        ((self.first_cluster_hi as u32) << 16) | (self.first_cluster_lo as u32)
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == 0x00
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == DELETED_MARKER
    }

    pub fn is_lfn(&self) -> bool {
        (self.attr & ATTR_LFN) == ATTR_LFN
    }

    pub fn is_volume_id(&self) -> bool {
        (self.attr & ATTR_VOLUME_ID) != 0
    }

    pub fn is_directory(&self) -> bool {
        (self.attr & ATTR_DIRECTORY) != 0
    }

    /// `.` or `..`
    pub fn is_dot(&self) -> bool {
        self.name[0] == b'.'
    }

    /// The name as stored on disk, with the 0x05 escape undone
    pub fn short_name(&self) -> [u8; SHORT_NAME_LEN] {
        let mut name = self.name;
        if name[0] == ESCAPED_E5 {
            name[0] = DELETED_MARKER;
        }
        name
    }
}

/// FAT filesystem error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    /// Bad MBR or boot sector, unsupported geometry or partition type
    InitError,
    /// The block device timed out
    Timeout,
    /// A sector read failed or the cluster chain is corrupt
    IoError,
    /// No file with that name in the tree
    NotFound,
    /// Operation on a closed handle
    InvalidState,
    /// Bad partition index, name or buffer
    InvalidArgument,
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FatError::InitError => "not a usable FAT32 volume",
            FatError::Timeout => "disk read timed out",
            FatError::IoError => "disk read failed",
            FatError::NotFound => "file not found",
            FatError::InvalidState => "file handle is not open",
            FatError::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl From<BlockError> for FatError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::Timeout => FatError::Timeout,
            BlockError::InvalidArgument => FatError::InvalidArgument,
            BlockError::InitError | BlockError::IoError => FatError::IoError,
        }
    }
}

/// Volume layout derived from the boot sector. LBAs are absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    /// Sectors per FAT
    pub fat_size: u32,
    pub root_cluster: u32,
    pub partition_start: u64,
    /// First sector of the first FAT
    pub fat_start: u64,
    /// First sector of cluster 2
    pub data_start: u64,
}

impl Geometry {
    /// Validate a boot sector and derive the layout of the volume at `partition_start`.
    pub fn from_bpb(bpb: &BiosParameterBlock, partition_start: u64) -> Result<Self, FatError> {
        // Copy fields out of the packed struct
        let signature = bpb.signature;
        let bytes_per_sector = bpb.bytes_per_sector;
        let sectors_per_cluster = bpb.sectors_per_cluster;
        let reserved_sectors = bpb.reserved_sectors;
        let num_fats = bpb.num_fats;
        let fat_size = bpb.sectors_per_fat_32;
        let root_cluster = bpb.root_cluster;

        if signature != BOOT_SIGNATURE {
            log::error!("FAT: bad boot sector signature {:#06x}", signature);
            return Err(FatError::InitError);
        }

        // Sectors come from the block device, which only knows 512 bytes
        if bytes_per_sector as usize != SECTOR_SIZE {
            log::error!(
                "FAT: unsupported bytes_per_sector {} (expected {})",
                bytes_per_sector,
                SECTOR_SIZE
            );
            return Err(FatError::InitError);
        }

        if sectors_per_cluster == 0
            || sectors_per_cluster > 128
            || !sectors_per_cluster.is_power_of_two()
        {
            log::error!(
                "FAT: invalid sectors_per_cluster {} (expected power of 2, 1-128)",
                sectors_per_cluster
            );
            return Err(FatError::InitError);
        }

        if num_fats == 0 || num_fats > 2 {
            log::error!("FAT: invalid num_fats {} (expected 1 or 2)", num_fats);
            return Err(FatError::InitError);
        }

        if reserved_sectors == 0 {
            log::error!("FAT: invalid reserved_sectors 0");
            return Err(FatError::InitError);
        }

        if fat_size == 0 {
            log::error!("FAT: invalid sectors_per_fat 0");
            return Err(FatError::InitError);
        }

        if root_cluster < FIRST_DATA_CLUSTER {
            log::error!("FAT: invalid root cluster {}", root_cluster);
            return Err(FatError::InitError);
        }

        let fat_start = partition_start + reserved_sectors as u64;
        let data_start = fat_start + num_fats as u64 * fat_size as u64;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            fat_size,
            root_cluster,
            partition_start,
            fat_start,
            data_start,
        })
    }

    /// Bytes per cluster
    pub fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * self.bytes_per_sector as usize
    }

    /// First sector of a cluster. Cluster numbering starts at 2; clusters 0
    /// and 1 map to the start of the data region.
    pub fn cluster_to_lba(&self, cluster: u32) -> u64 {
        let index = cluster.saturating_sub(FIRST_DATA_CLUSTER) as u64;
        self.data_start + index * self.sectors_per_cluster as u64
    }

    /// Number of entries one FAT holds, which bounds any cluster chain
    pub fn fat_entries(&self) -> u32 {
        let per_sector = self.bytes_per_sector as u32 / 4;
        self.fat_size.saturating_mul(per_sector)
    }

    /// FAT sector holding the entry for `cluster`, and the entry's index in it
    fn fat_entry_location(&self, cluster: u32) -> (u64, usize) {
        let entries_per_sector = self.bytes_per_sector as usize / 4;
        let byte_offset = cluster as u64 * 4;
        let sector = self.fat_start + byte_offset / self.bytes_per_sector as u64;
        (sector, cluster as usize % entries_per_sector)
    }
}

/// Working memory for a mounted volume
pub struct FatScratch {
    /// One directory cluster
    dir: [u8; MAX_CLUSTER_SIZE],
    /// One FAT sector
    fat_sector: [u8; SECTOR_SIZE],
}

impl FatScratch {
    pub const fn new() -> Self {
        Self {
            dir: [0; MAX_CLUSTER_SIZE],
            fat_sector: [0; SECTOR_SIZE],
        }
    }
}

impl Default for FatScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// An open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    start_cluster: u32,
    size: u32,
    /// Cluster [`Fat32Volume::read`] reads next
    cursor: u32,
    open: bool,
}

impl FileHandle {
    /// A handle that is not open; reading it fails with `InvalidState`.
    pub const fn closed() -> Self {
        Self {
            start_cluster: 0,
            size: 0,
            cursor: 0,
            open: false,
        }
    }

    fn open(entry: &DirectoryEntry) -> Self {
        let start_cluster = entry.first_cluster();
        Self {
            start_cluster,
            size: entry.file_size,
            cursor: start_cluster,
            open: true,
        }
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    /// File size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Move the cursor back to the first cluster
    pub fn rewind(&mut self) {
        self.cursor = self.start_cluster;
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}

/// A disk with a valid MBR
pub struct FatDisk<'d, D: BlockDevice> {
    device: &'d mut D,
    mbr: MasterBootRecord,
}

impl<'d, D: BlockDevice> FatDisk<'d, D> {
    /// Read and validate the MBR in sector 0.
    pub fn init(device: &'d mut D) -> Result<Self, FatError> {
        let mut sector = [0u8; SECTOR_SIZE];
        if let Err(e) = device.read_sector(0, &mut sector) {
            log::error!("FAT: failed to read MBR: {}", e);
            return Err(FatError::InitError);
        }

        let Some(mbr) = MasterBootRecord::parse(&sector) else {
            return Err(FatError::InitError);
        };
        if !mbr.is_valid() {
            let signature = mbr.signature;
            log::error!("FAT: bad MBR signature {:#06x}", signature);
            return Err(FatError::InitError);
        }

        for (index, entry) in (0..4).filter_map(|i| mbr.partition(i).map(|e| (i, e))) {
            if entry.is_empty() {
                continue;
            }
            let kind = entry.partition_type;
            let start = entry.lba_start;
            let count = entry.sector_count;
            log::debug!(
                "MBR partition {}: type {:#04x}, start {}, {} sectors",
                index,
                kind,
                start,
                count
            );
        }

        Ok(Self { device, mbr })
    }

    /// Get a partition table entry (0-3)
    pub fn partition(&self, index: usize) -> Option<PartitionEntry> {
        self.mbr.partition(index)
    }

    /// Mount the FAT32 volume in partition `index` (0-3).
    pub fn mount(
        self,
        index: usize,
        scratch: &'d mut FatScratch,
    ) -> Result<Fat32Volume<'d, D>, FatError> {
        let Some(entry) = self.partition(index) else {
            log::error!("FAT: partition index {} out of range", index);
            return Err(FatError::InvalidArgument);
        };

        // Either FAT32 variant is accepted
        let kind = entry.partition_type;
        if !entry.is_fat32() {
            log::error!("FAT: partition {} has type {:#04x}, not FAT32", index, kind);
            return Err(FatError::InitError);
        }

        let partition_start = entry.lba_start as u64;
        let mut sector = [0u8; SECTOR_SIZE];
        self.device.read_sector(partition_start, &mut sector)?;

        let Ok((bpb, _)) = BiosParameterBlock::read_from_prefix(&sector[..]) else {
            return Err(FatError::InitError);
        };
        let geometry = Geometry::from_bpb(&bpb, partition_start)?;

        log::info!(
            "FAT32: partition {} at LBA {}, {} bytes/cluster, root cluster {}",
            index,
            partition_start,
            geometry.cluster_size(),
            geometry.root_cluster
        );
        log::debug!(
            "FAT32: fat_start {}, data_start {}",
            geometry.fat_start,
            geometry.data_start
        );

        Ok(Fat32Volume {
            device: self.device,
            geometry,
            scratch,
        })
    }
}

/// Directory being scanned by [`Fat32Volume::open`]
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// First cluster of the directory
    first: u32,
    cluster: u32,
    /// Next record to look at within `cluster`
    index: usize,
    /// Clusters of the chain followed so far
    hops: u32,
}

impl Frame {
    fn new(first: u32) -> Self {
        Self {
            first,
            cluster: first,
            index: 0,
            hops: 0,
        }
    }
}

/// A mounted FAT32 volume
pub struct Fat32Volume<'d, D: BlockDevice> {
    device: &'d mut D,
    geometry: Geometry,
    scratch: &'d mut FatScratch,
}

impl<'d, D: BlockDevice> Fat32Volume<'d, D> {
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// First sector of a cluster
    pub fn cluster_to_lba(&self, cluster: u32) -> u64 {
        self.geometry.cluster_to_lba(cluster)
    }

    /// Look up the FAT entry for `cluster` (low 28 bits).
    pub fn next_cluster(&mut self, cluster: u32) -> Result<u32, FatError> {
        let (sector, index) = self.geometry.fat_entry_location(cluster);
        self.device.read_sector(sector, &mut self.scratch.fat_sector)?;

        let at = index * 4;
        let raw = &self.scratch.fat_sector[at..at + 4];
        let entry = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(entry & FAT32_ENTRY_MASK)
    }

    /// Read a whole directory cluster into the scratch buffer
    fn load_dir_cluster(&mut self, cluster: u32) -> Result<(), FatError> {
        let lba = self.geometry.cluster_to_lba(cluster);
        let size = self.geometry.cluster_size();
        self.device.read_sectors(
            lba,
            self.geometry.sectors_per_cluster as u32,
            &mut self.scratch.dir[..size],
        )?;
        Ok(())
    }

    /// Find a file by its 11-byte 8.3 name anywhere in the directory tree.
    ///
    /// The search is depth-first in storage order: every subdirectory is
    /// searched when it is met, before the rest of its parent.
    pub fn open(&mut self, name: &[u8]) -> Result<FileHandle, FatError> {
        let Ok(target) = <[u8; SHORT_NAME_LEN]>::try_from(name) else {
            return Err(FatError::InvalidArgument);
        };

        let records = self.geometry.cluster_size() / DIR_ENTRY_SIZE;
        let max_hops = self.geometry.fat_entries();
        // One frame always fits; the error arm is unreachable
        let mut stack: Vec<Frame, MAX_DIRECTORY_DEPTH> =
            Vec::from_slice(&[Frame::new(self.geometry.root_cluster)])
                .map_err(|_| FatError::InvalidState)?;

        'frames: while let Some(frame) = stack.last().copied() {
            self.load_dir_cluster(frame.cluster)?;

            let mut index = frame.index;
            while index < records {
                let offset = index * DIR_ENTRY_SIZE;
                index += 1;
                let Ok((entry, _)) = DirectoryEntry::read_from_prefix(&self.scratch.dir[offset..])
                else {
                    break;
                };

                if entry.is_end() {
                    stack.pop();
                    continue 'frames;
                }
                if entry.is_lfn() || entry.is_deleted() || entry.is_volume_id() {
                    continue;
                }

                if entry.is_directory() {
                    let child = entry.first_cluster();
                    if entry.is_dot() || child < FIRST_DATA_CLUSTER {
                        continue;
                    }
                    if stack.iter().any(|open| open.first == child) {
                        log::warn!("FAT: directory loop at cluster {}, skipping", child);
                        continue;
                    }
                    if let Some(parent) = stack.last_mut() {
                        parent.index = index;
                    }
                    if stack.push(Frame::new(child)).is_err() {
                        log::warn!(
                            "FAT: directory tree deeper than {}, skipping cluster {}",
                            MAX_DIRECTORY_DEPTH,
                            child
                        );
                        // The parent cluster is still loaded
                        continue;
                    }
                    continue 'frames;
                }

                if entry.short_name() == target {
                    let handle = FileHandle::open(&entry);
                    log::debug!(
                        "FAT: found file at cluster {}, {} bytes",
                        handle.start_cluster,
                        handle.size
                    );
                    return Ok(handle);
                }
            }

            // Cluster exhausted without an end record: follow the directory chain
            let next = self.next_cluster(frame.cluster)?;
            if (FIRST_DATA_CLUSTER..END_OF_CHAIN).contains(&next) {
                if frame.hops >= max_hops {
                    log::error!(
                        "FAT: directory at cluster {} never ends its chain",
                        frame.first
                    );
                    return Err(FatError::IoError);
                }
                if let Some(top) = stack.last_mut() {
                    top.cluster = next;
                    top.index = 0;
                    top.hops += 1;
                }
            } else {
                stack.pop();
            }
        }

        Err(FatError::NotFound)
    }

    /// Read the file's cluster chain into `buffer`, starting at the handle's
    /// cursor; returns the number of bytes written.
    ///
    /// Whole clusters are always written, so `buffer` must be the file size
    /// rounded up to a cluster. A buffer too small for the next cluster fails
    /// with `InvalidArgument` and holds the clusters read so far.
    pub fn read(&mut self, handle: &mut FileHandle, buffer: &mut [u8]) -> Result<usize, FatError> {
        if !handle.open {
            return Err(FatError::InvalidState);
        }

        // Empty files own no clusters
        if handle.size == 0 && handle.cursor < FIRST_DATA_CLUSTER {
            return Ok(0);
        }

        let cluster_size = self.geometry.cluster_size();
        let mut written = 0usize;

        loop {
            let cluster = handle.cursor;
            if cluster < FIRST_DATA_CLUSTER {
                log::error!("FAT: corrupt cluster chain (link to {})", cluster);
                return Err(FatError::IoError);
            }

            let Some(window) = buffer.get_mut(written..written + cluster_size) else {
                log::error!(
                    "FAT: buffer of {} bytes too small for cluster {}",
                    buffer.len(),
                    cluster
                );
                return Err(FatError::InvalidArgument);
            };

            let lba = self.geometry.cluster_to_lba(cluster);
            self.device
                .read_sectors(lba, self.geometry.sectors_per_cluster as u32, window)?;
            written += cluster_size;

            let next = self.next_cluster(cluster)?;
            if next >= END_OF_CHAIN {
                break;
            }
            handle.cursor = next;
        }

        log::trace!("FAT: read {} bytes", written);
        Ok(written)
    }
}
