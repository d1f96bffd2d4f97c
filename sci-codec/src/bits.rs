//! Bit-level readers over a byte slice
//!
//! The SCI codecs disagree on bit order: Huffman and LZS consume bits
//! most-significant-first, LZW and DCL-explode least-significant-first.
//! Both readers fail with `TruncatedData` instead of padding past the
//! end of the input.

use crate::error::{Error, Result};

/// Most-significant-bit-first reader (Huffman, LZS)
pub(crate) struct MsbReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> MsbReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, byte: 0, bit: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<u32> {
        let Some(&b) = self.data.get(self.byte) else {
            return Err(Error::TruncatedData { expected: 1 });
        };
        let bit = u32::from((b >> (7 - self.bit)) & 1);
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(bit)
    }

    /// Read `n` bits (n <= 16), first bit read becomes the most
    /// significant bit of the result.
    pub(crate) fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 16);
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }
}

/// Least-significant-bit-first reader (LZW, DCL-explode)
pub(crate) struct LsbReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> LsbReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, byte: 0, bit: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<u32> {
        let Some(&b) = self.data.get(self.byte) else {
            return Err(Error::TruncatedData { expected: 1 });
        };
        let bit = u32::from((b >> self.bit) & 1);
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(bit)
    }

    /// Read `n` bits (n <= 16), first bit read becomes the least
    /// significant bit of the result.
    pub(crate) fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 16);
        let mut value = 0u32;
        for i in 0..n {
            value |= self.read_bit()? << i;
        }
        Ok(value)
    }
}
