//! Filesystem support
//!
//! MBR partition table parsing and a read-only FAT32 driver, enough to find
//! a kernel image by its 8.3 name and load it.

pub mod fat;
pub mod mbr;

#[cfg(test)]
pub(crate) mod testdisk;

/// Length of a short name in directory form (8 name bytes + 3 extension bytes)
pub const SHORT_NAME_LEN: usize = 11;

/// Convert a `NAME.EXT` style file name to the 11-byte directory form
///
/// The name part is everything before the first `.`, truncated to 8 bytes;
/// the extension is what follows, truncated to 3 bytes. Both are space padded
/// and upper-cased, so `"test.txt"` becomes `b"TEST    TXT"`.
pub fn format_filename(name: &str) -> [u8; SHORT_NAME_LEN] {
    let mut short = [b' '; SHORT_NAME_LEN];

    let (base, ext) = match name.split_once('.') {
        Some((base, ext)) => (base, ext),
        None => (name, ""),
    };

    for (dst, src) in short[..8].iter_mut().zip(base.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    for (dst, src) in short[8..].iter_mut().zip(ext.bytes()) {
        *dst = src.to_ascii_uppercase();
    }

    short
}
