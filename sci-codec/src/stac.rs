//! LZS (STAC Electronics) decompression, ANSI X3.241
//!
//! The SCI32 generation compresses volume data with LZS. Bits are
//! consumed most-significant-first: a 0 flag introduces an 8-bit
//! literal, a 1 flag a back-reference with a 7-bit (flag 1) or 11-bit
//! (flag 0) offset. A 7-bit offset of zero ends the stream. Lengths
//! are coded in 2-bit steps with 4-bit nibble continuation above 7.

use crate::bits::MsbReader;
use crate::error::{Error, Result};

fn read_length(reader: &mut MsbReader<'_>) -> Result<usize> {
    match reader.read_bits(2)? {
        0 => Ok(2),
        1 => Ok(3),
        2 => Ok(4),
        _ => match reader.read_bits(2)? {
            0 => Ok(5),
            1 => Ok(6),
            2 => Ok(7),
            _ => {
                let mut length = 8usize;
                loop {
                    let nibble = reader.read_bits(4)? as usize;
                    length += nibble;
                    if nibble != 15 {
                        return Ok(length);
                    }
                }
            }
        },
    }
}

/// Decompress an LZS stream into exactly `unpacked_len` bytes.
pub(crate) fn unpack(input: &[u8], unpacked_len: usize) -> Result<Vec<u8>> {
    let mut reader = MsbReader::new(input);
    let mut out = Vec::with_capacity(unpacked_len);

    loop {
        if reader.read_bit()? == 0 {
            if out.len() >= unpacked_len {
                return Err(Error::SanityCheckFailed(
                    "LZS literal past declared output".into(),
                ));
            }
            out.push(reader.read_bits(8)? as u8);
            continue;
        }

        let offset = if reader.read_bit()? == 1 {
            let short = reader.read_bits(7)? as usize;
            if short == 0 {
                break;
            }
            short
        } else {
            reader.read_bits(11)? as usize
        };

        if offset > out.len() {
            return Err(Error::SanityCheckFailed(format!(
                "LZS back-reference of {offset} into {} written bytes",
                out.len()
            )));
        }
        let length = read_length(&mut reader)?;
        if out.len() + length > unpacked_len {
            return Err(Error::SanityCheckFailed(
                "LZS copy past declared output".into(),
            ));
        }
        let start = out.len() - offset;
        for i in 0..length {
            let b = out[start + i];
            out.push(b);
        }
    }

    if out.len() != unpacked_len {
        return Err(Error::SanityCheckFailed(format!(
            "LZS stream ended at {} of {} declared bytes",
            out.len(),
            unpacked_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MsbWriter {
        out: Vec<u8>,
        acc: u16,
        nbits: u32,
    }

    impl MsbWriter {
        fn new() -> Self {
            Self { out: Vec::new(), acc: 0, nbits: 0 }
        }

        fn push(&mut self, value: u16, n: u32) {
            for i in (0..n).rev() {
                self.acc = (self.acc << 1) | ((value >> i) & 1);
                self.nbits += 1;
                if self.nbits == 8 {
                    self.out.push(self.acc as u8);
                    self.acc = 0;
                    self.nbits = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            // end marker: 1, 1, offset 0
            self.push(0b11, 2);
            self.push(0, 7);
            if self.nbits > 0 {
                self.out.push((self.acc << (8 - self.nbits)) as u8);
            }
            self.out
        }
    }

    fn encode_literals(data: &[u8]) -> Vec<u8> {
        let mut w = MsbWriter::new();
        for &b in data {
            w.push(0, 1);
            w.push(u16::from(b), 8);
        }
        w.finish()
    }

    #[test]
    fn literal_stream_roundtrip() {
        let data = b"stac literal stream".to_vec();
        let packed = encode_literals(&data);
        assert_eq!(unpack(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn short_offset_copy() {
        // "abc" then copy offset 3 length 3 -> "abcabc"
        let mut w = MsbWriter::new();
        for &b in b"abc" {
            w.push(0, 1);
            w.push(u16::from(b), 8);
        }
        w.push(0b11, 2);
        w.push(3, 7);
        w.push(0b01, 2); // length 3
        assert_eq!(unpack(&w.finish(), 6).unwrap(), b"abcabc");
    }

    #[test]
    fn long_length_nibbles() {
        // "x" then copy offset 1 length 25 (8 + 15 + 2)
        let mut w = MsbWriter::new();
        w.push(0, 1);
        w.push(u16::from(b'x'), 8);
        w.push(0b11, 2);
        w.push(1, 7);
        w.push(0b1111, 4);
        w.push(15, 4);
        w.push(2, 4);
        let out = unpack(&w.finish(), 26).unwrap();
        assert_eq!(out, vec![b'x'; 26]);
    }

    #[test]
    fn eleven_bit_offset() {
        let mut data: Vec<u8> = (0u16..200).map(|i| (i % 251) as u8).collect();
        let mut w = MsbWriter::new();
        for &b in &data {
            w.push(0, 1);
            w.push(u16::from(b), 8);
        }
        // copy the first 4 bytes from offset 200 (needs 11-bit form)
        w.push(0b10, 2);
        w.push(200, 11);
        w.push(0b10, 2); // length 4
        let head = data[0..4].to_vec();
        data.extend_from_slice(&head);
        assert_eq!(unpack(&w.finish(), data.len()).unwrap(), data);
    }

    #[test]
    fn offset_past_start_is_rejected() {
        let mut w = MsbWriter::new();
        w.push(0, 1);
        w.push(u16::from(b'a'), 8);
        w.push(0b11, 2);
        w.push(9, 7);
        w.push(0b00, 2);
        assert!(matches!(
            unpack(&w.finish(), 8),
            Err(Error::SanityCheckFailed(_))
        ));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let packed = encode_literals(b"abcdef");
        let cut = &packed[..packed.len() - 2];
        assert!(unpack(cut, 6).is_err());
    }
}
