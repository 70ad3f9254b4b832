//! PL011 UART serial port driver
//!
//! Polled, transmit-only driver for the ARM PL011 found on the QEMU `virt`
//! machine. QEMU brings the UART up already configured, so there is no baud
//! rate or line setup here.

use crate::drivers::mmio::MmioRegion;
use core::fmt::{self, Write};
use spin::Mutex;

/// PL011 base address on the QEMU `virt` machine
pub const PL011_VIRT_BASE: u64 = 0x0900_0000;

/// Size of the PL011 register block
const PL011_REGION_SIZE: usize = 0x1000;

/// PL011 register offsets
mod registers {
    pub const DR: u64 = 0x000; // Data register
    pub const FR: u64 = 0x018; // Flag register
}

/// Flag register bits
mod fr {
    pub const TXFF: u32 = 1 << 5; // Transmit FIFO full
}

/// Global serial port instance
static SERIAL: Mutex<Option<Pl011>> = Mutex::new(None);

/// Maximum iterations to wait for TX FIFO space (prevents a hang on missing hardware)
const TX_TIMEOUT_ITERATIONS: u32 = 100_000;

/// A PL011 UART
pub struct Pl011 {
    regs: MmioRegion,
    /// Cleared when the transmit FIFO stops draining
    functional: bool,
}

impl Pl011 {
    /// Create a driver for the UART at `regs`.
    pub fn new(regs: MmioRegion) -> Self {
        Self {
            regs,
            functional: true,
        }
    }

    /// Write a byte, waiting for room in the transmit FIFO.
    pub fn write_byte(&mut self, byte: u8) {
        if !self.functional {
            return;
        }

        let mut timeout = TX_TIMEOUT_ITERATIONS;
        while self.regs.read32(registers::FR) & fr::TXFF != 0 {
            timeout -= 1;
            if timeout == 0 {
                self.functional = false;
                return;
            }
            core::hint::spin_loop();
        }

        self.regs.write32(registers::DR, byte as u32);
    }
}

impl Write for Pl011 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Initialize the global serial port at `base`.
pub fn init(base: u64) {
    if let Some(regs) = MmioRegion::new(base, PL011_REGION_SIZE) {
        *SERIAL.lock() = Some(Pl011::new(regs));
    }
}

/// Write formatted output to the serial port
pub fn write_fmt(args: fmt::Arguments) {
    if let Some(ref mut serial) = *SERIAL.lock() {
        let _ = serial.write_fmt(args);
    }
}

/// Macro for printing to serial
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::drivers::serial::write_fmt(format_args!($($arg)*))
    };
}

/// Macro for printing to serial with newline
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
