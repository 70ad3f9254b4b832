//! AArch64 architecture support
//!
//! Generic timer access, the halt loop and the final jump into the loaded
//! image.

pub mod entry;

/// Read the physical counter (CNTPCT_EL0)
#[inline]
pub fn read_cntpct() -> u64 {
    let value: u64;
    unsafe {
        core::arch::asm!("isb", "mrs {}, cntpct_el0", out(reg) value, options(nomem, nostack));
    }
    value
}

/// Read the counter frequency in Hz (CNTFRQ_EL0)
#[inline]
pub fn read_cntfrq() -> u64 {
    let value: u64;
    unsafe {
        core::arch::asm!("mrs {}, cntfrq_el0", out(reg) value, options(nomem, nostack));
    }
    value
}

/// Park the CPU forever.
pub fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
    }
}

/// Transfer control to a loaded image.
///
/// # Safety
///
/// `entry` must be the address of executable code that never returns to the
/// caller's stack frame.
pub unsafe fn jump_to(entry: u64) -> ! {
    // Make the freshly written image visible to instruction fetch.
    unsafe {
        core::arch::asm!("dsb sy", "ic iallu", "dsb sy", "isb", options(nostack));
    }

    let kernel_entry: extern "C" fn() -> ! = unsafe { core::mem::transmute(entry as usize) };
    kernel_entry()
}
