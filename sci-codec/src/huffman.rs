//! SCI0 Huffman decompression
//!
//! The compressed block embeds its own symbol table: a node count, a
//! terminator byte and `count` two-byte nodes of `{value, siblings}`.
//! The low nibble of `siblings` is the jump for a 1 bit (zero meaning
//! "read an 8-bit literal from the stream"), the high nibble the jump
//! for a 0 bit. Decoding stops when the literal escape yields the
//! terminator symbol.

use tracing::trace;

use crate::bits::MsbReader;
use crate::error::{Error, Result};

const LITERAL: u16 = 0x100;

fn next_symbol(nodes: &[u8], reader: &mut MsbReader<'_>) -> Result<u16> {
    let mut p = 0usize;
    loop {
        let siblings = *nodes
            .get(p + 1)
            .ok_or_else(|| Error::SanityCheckFailed("Huffman node jump out of table".into()))?;
        if siblings == 0 {
            return Ok(u16::from(nodes[p]));
        }
        let jump = if reader.read_bit()? == 1 {
            let right = siblings & 0x0F;
            if right == 0 {
                return Ok(LITERAL | reader.read_bits(8)? as u16);
            }
            right
        } else {
            siblings >> 4
        };
        p += usize::from(jump) * 2;
    }
}

/// Decompress a Huffman-packed block into exactly `unpacked_len` bytes.
pub(crate) fn unpack(input: &[u8], unpacked_len: usize) -> Result<Vec<u8>> {
    if input.len() < 2 {
        return Err(Error::TruncatedData {
            expected: (2 - input.len() as u32) * 8,
        });
    }
    let node_count = usize::from(input[0]);
    let terminator = u16::from(input[1]) | LITERAL;
    let table_end = 2 + node_count * 2;
    let nodes = input
        .get(2..table_end)
        .ok_or_else(|| Error::SanityCheckFailed("Huffman node table past end of input".into()))?;

    trace!(node_count, "Huffman table parsed");

    let mut reader = MsbReader::new(&input[table_end..]);
    let mut out = Vec::with_capacity(unpacked_len);
    loop {
        let symbol = next_symbol(nodes, &mut reader)?;
        if symbol == terminator {
            break;
        }
        if out.len() == unpacked_len {
            return Err(Error::SanityCheckFailed(
                "Huffman stream longer than declared output".into(),
            ));
        }
        out.push(symbol as u8);
    }
    if out.len() != unpacked_len {
        return Err(Error::SanityCheckFailed(format!(
            "Huffman stream ended at {} of {} declared bytes",
            out.len(),
            unpacked_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single root node whose 1-branch is the literal escape. Every
    // output byte is coded as 1 + eight literal bits.
    fn literal_only_stream(payload: &[u8], terminator: u8) -> Vec<u8> {
        let mut packed = vec![1, terminator, 0x00, 0x10];
        let mut acc = 0u16;
        let mut nbits = 0u32;
        let mut push_bits = |packed: &mut Vec<u8>, value: u16, n: u32| {
            for i in (0..n).rev() {
                acc = (acc << 1) | ((value >> i) & 1);
                nbits += 1;
                if nbits == 8 {
                    packed.push(acc as u8);
                    acc = 0;
                    nbits = 0;
                }
            }
        };
        for &b in payload {
            push_bits(&mut packed, 0x100 | u16::from(b), 9);
        }
        push_bits(&mut packed, 0x100 | u16::from(terminator), 9);
        if nbits > 0 {
            packed.push((acc << (8 - nbits)) as u8);
        }
        packed
    }

    #[test]
    fn literal_escape_roundtrip() {
        let payload = b"huffman literal path";
        let packed = literal_only_stream(payload, 0xFF);
        assert_eq!(unpack(&packed, payload.len()).unwrap(), payload);
    }

    #[test]
    fn tree_coded_symbols() {
        // Three nodes: root branches 0 -> node1 ('a'), and the
        // 1-branch low nibble 2 -> node2 ('b').
        let mut packed = vec![3, 0x00, 0x00, 0x12, b'a', 0x00, b'b', 0x00];
        // 0 1 0 then terminator as literal needs escape; node2 path is
        // unreachable for the escape, so terminate via node values only
        // is impossible -- craft the table so 1 at the root escapes.
        packed[3] = 0x10; // 0 -> node1, 1 -> literal escape
        // bits: 0 ('a'), 0 ('a'), 1 + 0x00 terminator
        packed.extend_from_slice(&[0b0_0_1_00000, 0b000_00000]);
        assert_eq!(unpack(&packed, 2).unwrap(), b"aa");
    }

    #[test]
    fn overlong_stream_is_rejected() {
        let payload = b"abc";
        let packed = literal_only_stream(payload, 0xFF);
        assert!(matches!(
            unpack(&packed, 2),
            Err(Error::SanityCheckFailed(_))
        ));
    }

    #[test]
    fn truncated_table_is_rejected() {
        assert!(unpack(&[10, 0xFF, 0x00], 4).is_err());
    }
}
