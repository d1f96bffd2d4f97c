//! Decompressor family for SCI resource volumes
//!
//! Every on-disk resource record carries a compression tag; this crate
//! turns the tag plus the packed bytes back into the declared number
//! of plain bytes. All decompressors are stateless functions and every
//! one of them treats the caller-declared output size as a hard
//! ceiling -- malformed input fails with a sanity-check error instead
//! of writing a single byte past the bound.

pub mod error;

mod bits;
mod dcl;
mod huffman;
mod lzw;
mod stac;

use tracing::debug;

pub use error::{Error, Result};

/// Absolute cap on a single decompressed resource, independent of the
/// size declared in any container header.
pub const MAX_UNPACKED_SIZE: usize = 16 * 1024 * 1024;

/// Compression scheme of one packed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Stored uncompressed
    None,
    /// SCI0 Huffman with embedded node table
    Huffman,
    /// LZW, 9-bit initial codes, explicit resets only
    Lzw,
    /// LZW, 9-bit initial codes, implicit reset on a full dictionary
    Lzw1,
    /// LZW picture-data profile, 10-bit initial codes, implicit resets
    LzwPic,
    /// PKWARE DCL-explode (SCI1.1 volumes)
    Dcl,
    /// LZS / STAC (SCI32 volumes)
    Stac,
}

/// Decompress `input` into exactly `unpacked_len` bytes.
pub fn decompress(tag: Compression, input: &[u8], unpacked_len: usize) -> Result<Vec<u8>> {
    if unpacked_len > MAX_UNPACKED_SIZE {
        return Err(Error::OutputTooLarge {
            declared: unpacked_len,
            max: MAX_UNPACKED_SIZE,
        });
    }

    debug!(?tag, packed = input.len(), unpacked_len, "decompressing resource");

    match tag {
        Compression::None => copy(input, unpacked_len),
        Compression::Huffman => huffman::unpack(input, unpacked_len),
        Compression::Lzw => lzw::unpack(input, unpacked_len, lzw::LZW),
        Compression::Lzw1 => lzw::unpack(input, unpacked_len, lzw::LZW1),
        Compression::LzwPic => lzw::unpack(input, unpacked_len, lzw::LZW_PIC),
        Compression::Dcl => dcl::unpack(input, unpacked_len),
        Compression::Stac => stac::unpack(input, unpacked_len),
    }
}

fn copy(input: &[u8], unpacked_len: usize) -> Result<Vec<u8>> {
    if input.len() < unpacked_len {
        return Err(Error::TruncatedData {
            expected: ((unpacked_len - input.len()) * 8) as u32,
        });
    }
    Ok(input[..unpacked_len].to_vec())
}
