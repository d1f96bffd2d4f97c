//! PKWARE DCL "explode" decompression
//!
//! Used by the SCI1.1 generation of resource volumes. The stream
//! starts with a literal-mode byte and a dictionary-width byte (4, 5
//! or 6 -- the three parameter combinations the format permits), then
//! a sequence of LSB-first flag bits: 0 introduces a raw literal, 1 a
//! length/distance copy. Copy lengths are prefix-coded with the
//! transmitted-bit-reversed code table below; the maximum encodable
//! copy length doubles as the end-of-stream marker. SCI volumes only
//! ever use binary literal mode.

use tracing::trace;

use crate::bits::LsbReader;
use crate::error::{Error, Result};

/// Copy length that terminates the stream (symbol 15, all extra bits set).
const END_OF_STREAM: usize = 519;

const LEN_BITS: [u32; 16] = [3, 2, 3, 3, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 7, 7];
const LEN_CODE: [u32; 16] = [5, 3, 1, 6, 10, 2, 12, 20, 4, 24, 8, 48, 16, 32, 64, 0];
const EX_LEN_BITS: [u32; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
const LEN_BASE: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 14, 22, 38, 70, 134, 262];

/// Code widths for the 64 distance symbols; the codes themselves are
/// derived canonically and bit-reversed for LSB-first transmission.
const DIST_WIDTHS: [u32; 64] = [
    2, //
    4, 4, //
    5, 5, 5, 5, //
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, //
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, //
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
];

fn reverse_bits(code: u32, width: u32) -> u32 {
    let mut out = 0;
    for i in 0..width {
        out |= ((code >> i) & 1) << (width - 1 - i);
    }
    out
}

/// Canonical prefix codes for `widths`, bit-reversed per symbol so the
/// decoder can match them while accumulating bits LSB-first.
fn build_codes(widths: &[u32]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..widths.len()).collect();
    order.sort_by_key(|&i| (widths[i], i));
    let mut codes = vec![0u32; widths.len()];
    let mut code = 0u32;
    let mut prev_width = widths[order[0]];
    for &i in &order {
        code <<= widths[i] - prev_width;
        prev_width = widths[i];
        codes[i] = reverse_bits(code, widths[i]);
        code += 1;
    }
    codes
}

fn read_symbol(reader: &mut LsbReader<'_>, bits: &[u32], codes: &[u32]) -> Result<usize> {
    let max_width = bits.iter().copied().max().unwrap_or(0);
    let mut acc = 0u32;
    for depth in 1..=max_width {
        acc |= reader.read_bit()? << (depth - 1);
        for (symbol, (&w, &c)) in bits.iter().zip(codes.iter()).enumerate() {
            if w == depth && c == acc {
                return Ok(symbol);
            }
        }
    }
    Err(Error::SanityCheckFailed(
        "DCL prefix code matches no symbol".into(),
    ))
}

/// Decompress a DCL-explode stream into exactly `unpacked_len` bytes.
pub(crate) fn unpack(input: &[u8], unpacked_len: usize) -> Result<Vec<u8>> {
    if input.len() < 2 {
        return Err(Error::TruncatedData { expected: 16 });
    }
    let mode = input[0];
    let dict_width = u32::from(input[1]);
    if mode != 0 {
        // ASCII literal mode exists in the wild but never in SCI data.
        return Err(Error::SanityCheckFailed(format!(
            "DCL literal mode {mode} unsupported"
        )));
    }
    if !(4..=6).contains(&dict_width) {
        return Err(Error::SanityCheckFailed(format!(
            "DCL dictionary width {dict_width} out of range"
        )));
    }
    trace!(dict_width, "DCL stream header");

    let dist_codes = build_codes(&DIST_WIDTHS);
    let mut reader = LsbReader::new(&input[2..]);
    let mut out = Vec::with_capacity(unpacked_len);

    loop {
        if reader.read_bit()? == 0 {
            if out.len() >= unpacked_len {
                return Err(Error::SanityCheckFailed(
                    "DCL literal past declared output".into(),
                ));
            }
            out.push(reader.read_bits(8)? as u8);
            continue;
        }

        let symbol = read_symbol(&mut reader, &LEN_BITS, &LEN_CODE)?;
        let length =
            LEN_BASE[symbol] + reader.read_bits(EX_LEN_BITS[symbol])? as usize + 2;
        if length == END_OF_STREAM {
            break;
        }

        let dist_symbol = read_symbol(&mut reader, &DIST_WIDTHS, &dist_codes)?;
        let low_bits = if length == 2 { 2 } else { dict_width };
        let distance =
            ((dist_symbol << low_bits) | reader.read_bits(low_bits)? as usize) + 1;

        if distance > out.len() {
            return Err(Error::SanityCheckFailed(format!(
                "DCL back-reference of {distance} into {} written bytes",
                out.len()
            )));
        }
        if out.len() + length > unpacked_len {
            return Err(Error::SanityCheckFailed(
                "DCL copy past declared output".into(),
            ));
        }
        let start = out.len() - distance;
        for i in 0..length {
            let b = out[start + i];
            out.push(b);
        }
    }

    if out.len() != unpacked_len {
        return Err(Error::SanityCheckFailed(format!(
            "DCL stream ended at {} of {} declared bytes",
            out.len(),
            unpacked_len
        )));
    }
    Ok(out)
}
