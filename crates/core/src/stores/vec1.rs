//! The `VEC1` vector file: a 12-byte header (`"VEC1"`, `count: i32`,
//! `dim: i32`, host byte order) followed by `count * dim` `f32` values.

use crate::error::{FormatError, IndexError, Result};
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 4] = b"VEC1";
pub const HEADER_LEN: u64 = 12;
/// Byte offset of the `count` field; `dim` follows it.
pub const COUNT_OFFSET: u64 = 4;

pub fn encode_counts(count: i32, dim: i32) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&count.to_ne_bytes());
    bytes[4..].copy_from_slice(&dim.to_ne_bytes());
    bytes
}

pub fn write_header<W: Write>(writer: &mut W, count: i32, dim: i32) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&encode_counts(count, dim))
}

pub fn write_vector<W: Write>(writer: &mut W, vector: &[f32]) -> io::Result<()> {
    for value in vector {
        writer.write_all(&value.to_ne_bytes())?;
    }
    Ok(())
}

/// Reads and validates the header, returning `(count, dim)`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<(usize, usize)> {
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header).map_err(|error| match error.kind() {
        io::ErrorKind::UnexpectedEof => IndexError::Format(FormatError::ShortHeader),
        _ => IndexError::Io(error),
    })?;

    if &header[..4] != MAGIC {
        return Err(FormatError::BadMagic.into());
    }

    let count = i32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    let dim = i32::from_ne_bytes([header[8], header[9], header[10], header[11]]);
    if count < 0 || dim <= 0 {
        return Err(FormatError::InvalidHeader { count, dim }.into());
    }

    Ok((count as usize, dim as usize))
}

/// Reads `count` vectors of `dim` floats. `payload_len` is the number of
/// bytes left after the header; a header promising more than that is
/// rejected before anything is allocated.
pub fn read_vectors<R: Read>(
    reader: &mut R,
    count: usize,
    dim: usize,
    payload_len: u64,
) -> Result<Vec<Vec<f32>>> {
    let needed = (count as u64)
        .checked_mul(dim as u64)
        .and_then(|values| values.checked_mul(4));
    if needed.map_or(true, |needed| needed > payload_len) {
        return Err(FormatError::Truncated { expected: count }.into());
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut vectors = Vec::with_capacity(count);
    let mut raw = vec![0u8; dim * 4];

    for _ in 0..count {
        reader.read_exact(&mut raw).map_err(|error| match error.kind() {
            io::ErrorKind::UnexpectedEof => {
                IndexError::Format(FormatError::Truncated { expected: count })
            }
            _ => IndexError::Io(error),
        })?;
        let vector = raw
            .chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        vectors.push(vector);
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(magic: &[u8; 4], count: i32, dim: i32) -> Vec<u8> {
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&encode_counts(count, dim));
        bytes
    }

    #[test]
    fn header_layout_is_magic_count_dim() {
        let mut bytes = Vec::new();
        write_header(&mut bytes, 3, 2).expect("vec write");
        assert_eq!(&bytes[..4], b"VEC1");
        assert_eq!(&bytes[4..8], &3i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_ne_bytes());
        assert_eq!(bytes.len() as u64, HEADER_LEN);
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let cases = [
            (header_bytes(b"VEC2", 1, 1), FormatError::BadMagic),
            (header_bytes(b"VEC1", -1, 4), FormatError::InvalidHeader { count: -1, dim: 4 }),
            (header_bytes(b"VEC1", 2, 0), FormatError::InvalidHeader { count: 2, dim: 0 }),
            (b"VEC1".to_vec(), FormatError::ShortHeader),
        ];

        for (bytes, expected) in cases {
            match read_header(&mut Cursor::new(bytes)) {
                Err(IndexError::Format(actual)) => assert_eq!(actual, expected),
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut bytes = Vec::new();
        write_vector(&mut bytes, &[1.0, 2.0, 3.0]).expect("vec write");
        let len = bytes.len() as u64;
        let result = read_vectors(&mut Cursor::new(bytes), 2, 3, len);
        assert!(matches!(
            result,
            Err(IndexError::Format(FormatError::Truncated { expected: 2 }))
        ));
    }

    #[test]
    fn oversized_header_is_rejected_without_allocating() {
        let result = read_vectors(&mut Cursor::new(Vec::new()), i32::MAX as usize, i32::MAX as usize, 0);
        assert!(matches!(
            result,
            Err(IndexError::Format(FormatError::Truncated { .. }))
        ));

        let overflow = read_vectors(&mut Cursor::new(Vec::new()), usize::MAX, 2, u64::MAX);
        assert!(matches!(
            overflow,
            Err(IndexError::Format(FormatError::Truncated { .. }))
        ));

        let empty = read_vectors(&mut Cursor::new(Vec::new()), 0, i32::MAX as usize, 0);
        assert!(matches!(empty, Ok(vectors) if vectors.is_empty()));
    }
}
