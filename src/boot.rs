//! Boot sequence
//!
//! [`load_kernel`] is the device-independent part: mount the configured
//! partition, find the kernel and copy it into memory. On bare metal,
//! [`boot_main`] wraps it with device discovery and the final jump, and halts
//! on any failure.

use core::fmt;

use crate::config::BootConfig;
use crate::drivers::block::{BlockDevice, BlockError};
use crate::fs::fat::{FatDisk, FatError, FatScratch};

/// Why the boot stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Block device discovery or initialization failed
    Device(BlockError),
    /// Mounting, lookup or loading failed
    Filesystem(FatError),
    /// The kernel does not fit the configured load region
    KernelTooLarge { size: u32, max: u32 },
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Device(e) => write!(f, "block device: {}", e),
            BootError::Filesystem(e) => write!(f, "filesystem: {}", e),
            BootError::KernelTooLarge { size, max } => {
                write!(f, "kernel too large ({} bytes, maximum {})", size, max)
            }
        }
    }
}

impl From<BlockError> for BootError {
    fn from(err: BlockError) -> Self {
        BootError::Device(err)
    }
}

impl From<FatError> for BootError {
    fn from(err: FatError) -> Self {
        BootError::Filesystem(err)
    }
}

/// Load the kernel named in `config` from `device` into the start of `memory`.
///
/// Returns the kernel size in bytes. `memory` must have room for the kernel
/// rounded up to a whole cluster.
pub fn load_kernel<D: BlockDevice>(
    device: &mut D,
    scratch: &mut FatScratch,
    config: &BootConfig,
    memory: &mut [u8],
) -> Result<u32, BootError> {
    log::info!("[2] Initializing FAT32 filesystem");
    let disk = FatDisk::init(device)?;
    let mut volume = disk.mount(config.partition as usize, scratch)?;

    log::info!(
        "[3] Searching for kernel file {:?}",
        core::str::from_utf8(&config.kernel_name).unwrap_or("<non-ascii>")
    );
    let mut kernel = volume.open(&config.kernel_name)?;
    let size = kernel.size();
    log::info!("    Kernel file found: {:#x} ({} bytes)", size, size);

    if size > config.max_kernel_size {
        log::error!(
            "Kernel too large: {} bytes (maximum {:#x})",
            size,
            config.max_kernel_size
        );
        return Err(BootError::KernelTooLarge {
            size,
            max: config.max_kernel_size,
        });
    }
    if size < config.small_kernel_warning {
        log::warn!(
            "Kernel suspiciously small (< {} bytes)",
            config.small_kernel_warning
        );
    }

    // The reader always writes whole clusters
    let cluster_size = volume.geometry().cluster_size();
    let window = (size as usize).div_ceil(cluster_size) * cluster_size;
    let Some(target) = memory.get_mut(..window) else {
        log::error!(
            "Kernel needs {} bytes, load region has {}",
            window,
            memory.len()
        );
        return Err(BootError::KernelTooLarge {
            size,
            max: config.max_kernel_size,
        });
    };

    log::info!("[4] Loading kernel to {:#x}", config.load_address);
    volume.read(&mut kernel, target)?;

    Ok(size)
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod platform {
    use spin::Mutex;

    use super::{BootError, load_kernel};
    use crate::arch::aarch64;
    use crate::config::BootConfig;
    use crate::drivers::serial;
    use crate::drivers::virtio::{QueueMemory, VirtioBlk};
    use crate::fs::fat::{FatScratch, MAX_CLUSTER_SIZE};
    use crate::logger;

    static QUEUE: Mutex<QueueMemory> = Mutex::new(QueueMemory::new());
    static SCRATCH: Mutex<FatScratch> = Mutex::new(FatScratch::new());

    fn load(config: &BootConfig) -> Result<u32, BootError> {
        let mut queue = QUEUE.lock();
        let mut scratch = SCRATCH.lock();

        log::info!("[1] Initializing virtio block device");
        let mut disk = VirtioBlk::probe(&config.virtio, &mut queue)?;
        log::info!(
            "    virtio-blk v{} ready at {:#x}",
            disk.version(),
            disk.base()
        );

        // SAFETY: the load region is RAM below this image and nothing else
        // uses it.
        let memory = unsafe {
            core::slice::from_raw_parts_mut(
                config.load_address as usize as *mut u8,
                config.max_kernel_size as usize + MAX_CLUSTER_SIZE,
            )
        };
        load_kernel(&mut disk, &mut scratch, config, memory)
    }

    /// Run the boot sequence; jumps to the kernel or halts.
    pub fn boot_main(config: &BootConfig) -> ! {
        serial::init(config.uart_base);
        logger::init(log::LevelFilter::Info);

        log::info!("vioboot v{} starting", env!("CARGO_PKG_VERSION"));

        match load(config) {
            Ok(size) => {
                log::info!("[5] Kernel loaded: {} bytes at {:#x}", size, config.load_address);
                log::info!("[6] Transferring control to {:#x}", config.load_address);
                // SAFETY: a complete image was just copied to the load address
                unsafe { aarch64::jump_to(config.load_address) }
            }
            Err(e) => {
                log::error!("FATAL: {}", e);
                log::error!("SYSTEM HALTED");
                aarch64::halt()
            }
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use platform::boot_main;
