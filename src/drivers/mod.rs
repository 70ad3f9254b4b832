//! Hardware drivers
//!
//! Only what the boot stage touches: the PL011 console and the virtio-mmio
//! block transport, both built on the shared MMIO register helpers.

pub mod block;
pub mod mmio;
pub mod serial;
pub mod virtio;
