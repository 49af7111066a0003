//! Helpers for traversing RLP without materialising values.
//!
//! These operate directly on encoded bytes, splitting off one value at a
//! time. The trie uses them to walk node encodings and decide whether a
//! child reference is a hash or an embedded node.

use crate::{DecodeError, Kind};

/// Splits the first RLP value off `b`, returning its kind, its payload and
/// the remaining input.
pub fn split(b: &[u8]) -> Result<(Kind, &[u8], &[u8]), DecodeError> {
    let (kind, head_len, payload_len) = read_kind(b)?;
    Ok((
        kind,
        &b[head_len..head_len + payload_len],
        &b[head_len + payload_len..],
    ))
}

/// Splits the first value off `b`, which must be a string. Returns the
/// string payload and the remaining input.
pub fn split_string(b: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    match split(b)? {
        (Kind::List, _, _) => Err(DecodeError::ExpectedString),
        (_, content, rest) => Ok((content, rest)),
    }
}

/// Splits the first value off `b`, which must be a list. Returns the list
/// payload and the remaining input.
pub fn split_list(b: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    match split(b)? {
        (Kind::List, content, rest) => Ok((content, rest)),
        _ => Err(DecodeError::ExpectedList),
    }
}

/// Counts the values encoded back-to-back in `b`.
pub fn count_values(b: &[u8]) -> Result<usize, DecodeError> {
    let mut b = b;
    let mut count = 0;
    while !b.is_empty() {
        let (_, head_len, payload_len) = read_kind(b)?;
        b = &b[head_len + payload_len..];
        count += 1;
    }
    Ok(count)
}

/// Parses the header of the first value in `buf`, returning its kind, the
/// header length and the payload length.
fn read_kind(buf: &[u8]) -> Result<(Kind, usize, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::UnexpectedEof);
    }
    let b = buf[0];
    let (kind, head_len, payload_len) = match b {
        0x00..=0x7f => (Kind::Byte, 0, 1),
        0x80..=0xb7 => {
            let size = (b - 0x80) as usize;
            // reject strings that should have been single bytes
            if size == 1 && buf.len() > 1 && buf[1] <= 0x7f {
                return Err(DecodeError::CanonSize);
            }
            (Kind::String, 1, size)
        }
        0xb8..=0xbf => {
            let lol = (b - 0xb7) as usize;
            (Kind::String, 1 + lol, read_size(&buf[1..], lol)?)
        }
        0xc0..=0xf7 => (Kind::List, 1, (b - 0xc0) as usize),
        0xf8..=0xff => {
            let lol = (b - 0xf7) as usize;
            (Kind::List, 1 + lol, read_size(&buf[1..], lol)?)
        }
    };
    if payload_len > buf.len() - head_len {
        return Err(DecodeError::InputTooShort);
    }
    Ok((kind, head_len, payload_len))
}

fn read_size(b: &[u8], len_of_len: usize) -> Result<usize, DecodeError> {
    if len_of_len > b.len() {
        return Err(DecodeError::UnexpectedEof);
    }
    if b[0] == 0 {
        return Err(DecodeError::CanonSize);
    }
    let mut size = 0u64;
    for byte in &b[..len_of_len] {
        size = (size << 8) | u64::from(*byte);
    }
    if size < 56 {
        return Err(DecodeError::CanonSize);
    }
    usize::try_from(size).map_err(|_| DecodeError::InputTooShort)
}
