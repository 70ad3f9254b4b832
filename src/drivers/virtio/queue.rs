//! Split virtqueue memory layout
//!
//! One queue of [`QUEUE_SIZE`] entries laid out for the legacy (version 1)
//! transport: the descriptor table and available ring share the first page,
//! the used ring starts on the next page boundary. The same region also
//! serves version 2 devices, which take the three addresses separately.
//!
//! The block request header and status byte live in the same region so a
//! transport context owns everything the device touches except the caller's
//! data buffer.

/// Number of queue entries programmed into the device
pub const QUEUE_SIZE: usize = 16;

/// Guest page size / legacy queue alignment
pub const PAGE_SIZE: usize = 4096;

/// Descriptor continues via the `next` field
pub const DESC_F_NEXT: u16 = 1 << 0;
/// Buffer is device write-only
pub const DESC_F_WRITE: u16 = 1 << 1;

/// Block read request type
pub const VIRTIO_BLK_T_IN: u32 = 0;

/// Block request status values
pub const VIRTIO_BLK_S_OK: u8 = 0;
pub const VIRTIO_BLK_S_IOERR: u8 = 1;

/// Virtqueue descriptor
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Guest physical address of the buffer
    pub addr: u64,
    /// Buffer length in bytes
    pub len: u32,
    /// DESC_F_* flags
    pub flags: u16,
    /// Index of the chained descriptor when DESC_F_NEXT is set
    pub next: u16,
}

impl Descriptor {
    const EMPTY: Self = Self {
        addr: 0,
        len: 0,
        flags: 0,
        next: 0,
    };
}

/// Driver-to-device ring
#[repr(C)]
pub struct AvailRing {
    pub flags: u16,
    pub idx: u16,
    pub ring: [u16; QUEUE_SIZE],
    pub used_event: u16,
}

/// Completed chain reported by the device
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UsedElem {
    /// Head index of the completed chain
    pub id: u32,
    /// Bytes written by the device
    pub len: u32,
}

/// Device-to-driver ring (starts on its own page for legacy devices)
#[repr(C, align(4096))]
pub struct UsedRing {
    pub flags: u16,
    pub idx: u16,
    pub ring: [UsedElem; QUEUE_SIZE],
    pub avail_event: u16,
}

/// virtio-blk request header
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRequest {
    /// VIRTIO_BLK_T_*
    pub kind: u32,
    pub reserved: u32,
    /// Sector in 512-byte units
    pub sector: u64,
}

/// All memory shared with the device for one queue
#[repr(C, align(4096))]
pub struct QueueMemory {
    pub desc: [Descriptor; QUEUE_SIZE],
    pub avail: AvailRing,
    pub used: UsedRing,
    pub request: BlockRequest,
    pub status: u8,
}

impl QueueMemory {
    /// Zeroed queue memory, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            desc: [Descriptor::EMPTY; QUEUE_SIZE],
            avail: AvailRing {
                flags: 0,
                idx: 0,
                ring: [0; QUEUE_SIZE],
                used_event: 0,
            },
            used: UsedRing {
                flags: 0,
                idx: 0,
                ring: [UsedElem { id: 0, len: 0 }; QUEUE_SIZE],
                avail_event: 0,
            },
            request: BlockRequest {
                kind: 0,
                reserved: 0,
                sector: 0,
            },
            status: 0,
        }
    }
}

impl Default for QueueMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the available ring from the start of [`QueueMemory`]
pub const AVAIL_OFFSET: usize = core::mem::offset_of!(QueueMemory, avail);

/// Byte offset of the used ring from the start of [`QueueMemory`]
pub const USED_OFFSET: usize = core::mem::offset_of!(QueueMemory, used);
