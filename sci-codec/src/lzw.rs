//! SCI LZW decompression
//!
//! Codes are read least-significant-bit-first. Code 0x100 resets the
//! dictionary, 0x101 ends the stream; 0x102 is the first dictionary
//! code. The dictionary stores `(start, len)` spans into the output
//! already produced; referencing a code copies `len + 1` bytes, the
//! extra byte being whichever byte followed the span in the output.
//!
//! The three volume-format profiles share this machinery and differ
//! only in the initial code width and in whether a full dictionary
//! resets implicitly or only on an explicit 0x100 code.

use tracing::trace;

use crate::bits::LsbReader;
use crate::error::{Error, Result};

const RESET_CODE: u32 = 0x100;
const END_CODE: u32 = 0x101;
const FIRST_TOKEN: u32 = 0x102;
const MAX_BITS: u32 = 12;
const TABLE_SIZE: usize = 1 << MAX_BITS;

/// Per-tag LZW parameters
#[derive(Debug, Clone, Copy)]
pub(crate) struct Profile {
    /// Code width at stream start and after each reset
    pub initial_bits: u32,
    /// Reset the dictionary when it fills instead of saturating
    pub auto_reset: bool,
}

/// Plain data profile: explicit resets only.
pub(crate) const LZW: Profile = Profile { initial_bits: 9, auto_reset: false };
/// Later-generation profile: the encoder relies on implicit resets.
pub(crate) const LZW1: Profile = Profile { initial_bits: 9, auto_reset: true };
/// Picture-data profile: wider initial codes, implicit resets.
pub(crate) const LZW_PIC: Profile = Profile { initial_bits: 10, auto_reset: true };

struct Dict {
    spans: Vec<(usize, usize)>,
    next: u32,
    bits: u32,
    end_token: u32,
    initial_bits: u32,
}

impl Dict {
    fn new(initial_bits: u32) -> Self {
        let mut dict = Self {
            spans: vec![(0, 0); TABLE_SIZE],
            next: 0,
            bits: 0,
            end_token: 0,
            initial_bits,
        };
        dict.reset();
        dict
    }

    fn reset(&mut self) {
        self.next = FIRST_TOKEN;
        self.bits = self.initial_bits;
        self.end_token = (1 << self.initial_bits) - 1;
    }

    fn is_full(&self) -> bool {
        self.bits == MAX_BITS && self.next > self.end_token
    }

    fn register(&mut self, start: usize, len: usize) {
        if self.next > self.end_token && self.bits < MAX_BITS {
            self.bits += 1;
            self.end_token = (self.end_token << 1) + 1;
        }
        if self.next <= self.end_token {
            self.spans[self.next as usize] = (start, len);
            self.next += 1;
        }
    }
}

/// Decompress an LZW stream into exactly `unpacked_len` bytes.
pub(crate) fn unpack(input: &[u8], unpacked_len: usize, profile: Profile) -> Result<Vec<u8>> {
    let mut reader = LsbReader::new(input);
    let mut dict = Dict::new(profile.initial_bits);
    let mut out = Vec::with_capacity(unpacked_len);

    loop {
        let token = reader.read_bits(dict.bits)?;
        if token == END_CODE {
            break;
        }
        if token == RESET_CODE {
            dict.reset();
            continue;
        }

        let (start, len) = if token < 0x100 {
            if out.len() >= unpacked_len {
                return Err(Error::SanityCheckFailed(
                    "LZW literal past declared output".into(),
                ));
            }
            let start = out.len();
            out.push(token as u8);
            (start, 1)
        } else {
            if token >= dict.next {
                return Err(Error::SanityCheckFailed(format!(
                    "LZW code {token:#x} references an unassigned dictionary slot"
                )));
            }
            let (src, src_len) = dict.spans[token as usize];
            let len = src_len + 1;
            if out.len() + len > unpacked_len {
                return Err(Error::SanityCheckFailed(
                    "LZW copy past declared output".into(),
                ));
            }
            let start = out.len();
            // Byte-at-a-time: the span may overlap the bytes being
            // appended (the classic self-referential code).
            for i in 0..len {
                let b = out[src + i];
                out.push(b);
            }
            (start, len)
        };

        dict.register(start, len);
        if profile.auto_reset && dict.is_full() {
            trace!("LZW dictionary full, implicit reset");
            dict.reset();
        }
    }

    if out.len() != unpacked_len {
        return Err(Error::SanityCheckFailed(format!(
            "LZW stream ended at {} of {} declared bytes",
            out.len(),
            unpacked_len
        )));
    }
    Ok(out)
}
