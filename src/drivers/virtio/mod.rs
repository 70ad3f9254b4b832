//! virtio-mmio block driver
//!
//! Minimal polled virtio-blk transport: no interrupts, no heap, zero
//! negotiated features and a single request queue. Exactly one request is in
//! flight at a time; the descriptor chain in [`QueueMemory`] is rebuilt for
//! every read.
//!
//! Both the legacy (version 1) and modern (version 2) MMIO register layouts
//! are supported.

pub mod queue;
pub mod regs;


use crate::config::VirtioConfig;
use crate::drivers::block::{BlockDevice, BlockError, SECTOR_SIZE};
use crate::drivers::mmio::MmioRegion;
use crate::time::Timeout;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::{Ordering, fence};

pub use queue::QueueMemory;
use queue::{
    BlockRequest, DESC_F_NEXT, DESC_F_WRITE, Descriptor, PAGE_SIZE, QUEUE_SIZE, VIRTIO_BLK_S_OK,
    VIRTIO_BLK_T_IN,
};
use regs::status;

/// A virtio-blk device with its request queue
pub struct VirtioBlk<'q> {
    regs: MmioRegion,
    version: u32,
    /// Queue memory shared with the device; borrowed for `'q`
    queue: NonNull<QueueMemory>,
    io_timeout_ms: u64,
    _queue: PhantomData<&'q mut QueueMemory>,
}

impl<'q> VirtioBlk<'q> {
    /// Scan the configured register windows and initialize the first device
    /// that answers with the virtio magic, a non-zero device id and version
    /// 1 or 2.
    pub fn probe(config: &VirtioConfig, queue: &'q mut QueueMemory) -> Result<Self, BlockError> {
        let window = config.slot_stride as usize;
        let span = window.saturating_mul(config.slot_count);
        let mmio = MmioRegion::new(config.mmio_base, span).ok_or(BlockError::InitError)?;

        for slot in 0..config.slot_count {
            let regs = mmio.subregion(slot as u64 * config.slot_stride, window);
            if regs.read32(regs::MAGIC_VALUE) == regs::MAGIC
                && regs.read32(regs::DEVICE_ID) != 0
                && matches!(regs.read32(regs::VERSION), 1 | 2)
            {
                log::debug!("virtio-mmio: device in slot {} at {:#x}", slot, regs.base());
                return Self::new(regs, queue, config.io_timeout_ms);
            }
        }

        log::error!(
            "virtio-mmio: no device in {} slots at {:#x}",
            config.slot_count,
            config.mmio_base
        );
        Err(BlockError::InitError)
    }

    /// Initialize the device behind `regs` and program queue 0 with `queue`.
    pub fn new(
        regs: MmioRegion,
        queue: &'q mut QueueMemory,
        io_timeout_ms: u64,
    ) -> Result<Self, BlockError> {
        let magic = regs.read32(regs::MAGIC_VALUE);
        if magic != regs::MAGIC {
            log::error!("virtio-mmio: bad magic {:#010x}", magic);
            return Err(BlockError::InitError);
        }

        let version = regs.read32(regs::VERSION);
        if version != 1 && version != 2 {
            log::error!("virtio-mmio: unsupported version {}", version);
            return Err(BlockError::InitError);
        }

        let device_id = regs.read32(regs::DEVICE_ID);
        if device_id == 0 {
            log::error!("virtio-mmio: empty slot at {:#x}", regs.base());
            return Err(BlockError::InitError);
        }

        log::info!(
            "virtio-mmio v{}: device {} vendor {:#x}",
            version,
            device_id,
            regs.read32(regs::VENDOR_ID)
        );

        // Reset, then announce ourselves
        regs.write32(regs::STATUS, 0);
        regs.modify32(regs::STATUS, |s| s | status::ACKNOWLEDGE);
        regs.modify32(regs::STATUS, |s| s | status::DRIVER);

        // Accept no optional features
        regs.write32(regs::DEVICE_FEATURES_SEL, 0);
        log::debug!(
            "virtio-mmio: device features {:#010x}",
            regs.read32(regs::DEVICE_FEATURES)
        );
        regs.write32(regs::DRIVER_FEATURES_SEL, 0);
        regs.write32(regs::DRIVER_FEATURES, 0);

        regs.modify32(regs::STATUS, |s| s | status::FEATURES_OK);
        confirm_features(&regs)?;

        regs.write32(regs::QUEUE_SEL, 0);
        let max = regs.read32(regs::QUEUE_NUM_MAX);
        if (max as usize) < QUEUE_SIZE {
            log::error!("virtio-mmio: queue 0 too small ({} < {})", max, QUEUE_SIZE);
            return Err(BlockError::InitError);
        }
        regs.write32(regs::QUEUE_NUM, QUEUE_SIZE as u32);

        let queue = NonNull::from(queue);
        // SAFETY: the device was just reset, nothing references the queue.
        unsafe { ptr::write_bytes(queue.as_ptr(), 0, 1) };
        let base = queue.as_ptr() as usize as u64;

        if version == 1 {
            let pfn = base / PAGE_SIZE as u64;
            let Ok(pfn) = u32::try_from(pfn) else {
                log::error!("virtio-mmio: queue at {:#x} beyond legacy PFN range", base);
                return Err(BlockError::InitError);
            };
            regs.write32(regs::GUEST_PAGE_SIZE, PAGE_SIZE as u32);
            regs.write32(regs::QUEUE_ALIGN, PAGE_SIZE as u32);
            regs.write32(regs::QUEUE_PFN, pfn);
        } else {
            regs.write64_lo_hi(regs::QUEUE_DESC_LOW, base);
            regs.write64_lo_hi(regs::QUEUE_AVAIL_LOW, base + queue::AVAIL_OFFSET as u64);
            regs.write64_lo_hi(regs::QUEUE_USED_LOW, base + queue::USED_OFFSET as u64);
            regs.write32(regs::QUEUE_READY, 1);
        }

        regs.modify32(regs::STATUS, |s| s | status::DRIVER_OK);
        log::debug!("virtio-mmio: queue 0 at {:#x}, {} entries", base, QUEUE_SIZE);

        Ok(Self {
            regs,
            version,
            queue,
            io_timeout_ms,
            _queue: PhantomData,
        })
    }

    /// Transport version reported by the device (1 = legacy, 2 = modern)
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Base address of the device's register window
    pub fn base(&self) -> u64 {
        self.regs.base()
    }

    /// Read one sector, giving up when `timeout` expires.
    ///
    /// A timed-out request is not cancelled; the queue is left as is.
    pub fn read_sector_timeout(
        &mut self,
        lba: u64,
        buffer: &mut [u8],
        timeout: Timeout,
    ) -> Result<(), BlockError> {
        if buffer.len() < SECTOR_SIZE {
            return Err(BlockError::InvalidArgument);
        }

        let q = self.queue.as_ptr();
        let used_before;

        // SAFETY: `q` is the queue memory borrowed for 'q; the device only
        // writes the used ring, the status byte and the data buffer.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*q).status), 0xFF);
            ptr::write_volatile(
                ptr::addr_of_mut!((*q).request),
                BlockRequest {
                    kind: VIRTIO_BLK_T_IN,
                    reserved: 0,
                    sector: lba,
                },
            );

            let desc = ptr::addr_of_mut!((*q).desc) as *mut Descriptor;
            ptr::write_volatile(
                desc,
                Descriptor {
                    addr: ptr::addr_of!((*q).request) as usize as u64,
                    len: size_of::<BlockRequest>() as u32,
                    flags: DESC_F_NEXT,
                    next: 1,
                },
            );
            ptr::write_volatile(
                desc.add(1),
                Descriptor {
                    addr: buffer.as_mut_ptr() as usize as u64,
                    len: SECTOR_SIZE as u32,
                    flags: DESC_F_WRITE | DESC_F_NEXT,
                    next: 2,
                },
            );
            ptr::write_volatile(
                desc.add(2),
                Descriptor {
                    addr: ptr::addr_of!((*q).status) as usize as u64,
                    len: 1,
                    flags: DESC_F_WRITE,
                    next: 0,
                },
            );

            let avail_idx = ptr::read_volatile(ptr::addr_of!((*q).avail.idx));
            used_before = ptr::read_volatile(ptr::addr_of!((*q).used.idx));

            let slot = avail_idx as usize % QUEUE_SIZE;
            ptr::write_volatile(ptr::addr_of_mut!((*q).avail.ring[slot]), 0);
            fence(Ordering::SeqCst);
            ptr::write_volatile(ptr::addr_of_mut!((*q).avail.idx), avail_idx.wrapping_add(1));
            fence(Ordering::SeqCst);
        }

        self.regs.write32(regs::QUEUE_NOTIFY, 0);

        let mut completed = false;
        while !timeout.is_expired() {
            fence(Ordering::SeqCst);
            // SAFETY: as above
            let used = unsafe { ptr::read_volatile(ptr::addr_of!((*q).used.idx)) };
            if used != used_before {
                completed = true;
                break;
            }
            core::hint::spin_loop();
        }

        if !completed {
            log::error!("virtio-blk: read of sector {} timed out", lba);
            return Err(BlockError::Timeout);
        }

        let isr = self.regs.read32(regs::INTERRUPT_STATUS);
        if isr != 0 {
            self.regs.write32(regs::INTERRUPT_ACK, isr);
        }

        // SAFETY: the device has completed the request
        let request_status = unsafe { ptr::read_volatile(ptr::addr_of!((*q).status)) };
        if request_status != VIRTIO_BLK_S_OK {
            log::error!(
                "virtio-blk: sector {} failed with status {}",
                lba,
                request_status
            );
            if self.regs.read32(regs::STATUS) & status::DEVICE_NEEDS_RESET != 0 {
                log::warn!("virtio-blk: device needs reset");
            }
            return Err(BlockError::IoError);
        }

        Ok(())
    }
}

impl BlockDevice for VirtioBlk<'_> {
    fn read_sector(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), BlockError> {
        let timeout = Timeout::from_ms(self.io_timeout_ms);
        self.read_sector_timeout(lba, buffer, timeout)
    }
}

/// Check that FEATURES_OK latched; a device that cleared it is marked FAILED.
fn confirm_features(regs: &MmioRegion) -> Result<(), BlockError> {
    if regs.read32(regs::STATUS) & status::FEATURES_OK == 0 {
        log::error!("virtio-mmio: device rejected feature set");
        regs.modify32(regs::STATUS, |s| s | status::FAILED);
        return Err(BlockError::InitError);
    }
    Ok(())
}
