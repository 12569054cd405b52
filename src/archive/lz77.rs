// archive/lz77.rs from wadforge
//
// Implements the decompression routine for the Wii's LZ77 compression scheme.

use std::io::{Cursor, Read, Seek, SeekFrom};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LZ77Error {
    #[error("compression is type `{0:#04X}` but only 0x10 is supported")]
    InvalidCompressionType(u8),
    #[error("back-reference at output position {0} reaches before the start of the data")]
    BadReference(usize),
    #[error("LZ77 data is not in a valid format")]
    IO(#[from] std::io::Error),
}

/// Decompresses LZ77-compressed data and returns the decompressed result. Data both with and
/// without the leading `LZ77` magic is accepted, since data embedded in another file usually
/// loses the magic.
pub fn decompress_lz77(data: &[u8]) -> Result<Vec<u8>, LZ77Error> {
    let mut buf = Cursor::new(data);
    let mut magic = [0u8; 4];
    buf.read_exact(&mut magic)?;
    if &magic != b"LZ77" {
        buf.seek(SeekFrom::Start(0))?;
    }
    // The Wii only ever shipped compression type 0x10.
    let compression_type = buf.read_u8()?;
    if compression_type != 0x10 {
        return Err(LZ77Error::InvalidCompressionType(compression_type));
    }
    // The decompressed size is stored as three little-endian bytes.
    let decompressed_size = buf.read_u24::<LittleEndian>()? as usize;
    let mut out_buf = vec![0u8; decompressed_size];
    let mut pos = 0;
    while pos < decompressed_size {
        let flag = buf.read_u8()?;
        // Each flag bit, highest first, says whether the next unit is a back-reference or a
        // literal byte.
        for shift in (0..8).rev() {
            if pos >= decompressed_size {
                break;
            }
            if flag & (1 << shift) != 0 {
                let reference = buf.read_u16::<BigEndian>()?;
                let length = 3 + ((reference >> 12) & 0xF) as usize;
                let back = (reference & 0xFFF) as usize + 1;
                if back > pos {
                    return Err(LZ77Error::BadReference(pos));
                }
                let mut offset = pos - back;
                for _ in 0..length {
                    out_buf[pos] = out_buf[offset];
                    pos += 1;
                    offset += 1;
                    if pos >= decompressed_size {
                        break;
                    }
                }
            } else {
                out_buf[pos] = buf.read_u8()?;
                pos += 1;
            }
        }
    }
    Ok(out_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_run_decompresses() {
        // Three literal bytes under one all-zero flag byte.
        let data = [0x10, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c'];
        assert_eq!(decompress_lz77(&data).unwrap(), b"abc");
    }

    #[test]
    fn magic_prefix_is_skipped() {
        let data = [b'L', b'Z', b'7', b'7', 0x10, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c'];
        assert_eq!(decompress_lz77(&data).unwrap(), b"abc");
    }

    #[test]
    fn back_reference_copies_earlier_output() {
        // Three literals, then a reference of length 3 reaching back 3 bytes.
        let data = [0x10, 0x06, 0x00, 0x00, 0x10, b'a', b'b', b'c', 0x00, 0x02];
        assert_eq!(decompress_lz77(&data).unwrap(), b"abcabc");
    }

    #[test]
    fn overlapping_reference_repeats_bytes() {
        // One literal, then a reference of length 4 reaching back 1 byte, which has to re-read
        // bytes it just produced.
        let data = [0x10, 0x05, 0x00, 0x00, 0x40, b'x', 0x10, 0x00];
        assert_eq!(decompress_lz77(&data).unwrap(), b"xxxxx");
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let data = [0x11, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c'];
        assert!(matches!(
            decompress_lz77(&data),
            Err(LZ77Error::InvalidCompressionType(0x11))
        ));
    }
}
