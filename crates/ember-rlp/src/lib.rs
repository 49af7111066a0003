//! Ember RLP serialization.
//!
//! This crate implements the Recursive Length Prefix encoding used for all
//! consensus data structures. RLP knows exactly two kinds of value: byte
//! strings and lists of values. Everything else (integers, booleans, structs)
//! is mapped onto those two.
//!
//! # Wire Format
//!
//! With `L` the payload length in bytes:
//!
//! - single byte `b <= 0x7f`: the byte itself
//! - string, `L <= 55`: `0x80 + L`, then the bytes
//! - string, `L > 55`: `0xB7 + len(L)`, then `L` big-endian, then the bytes
//! - list, payload `P <= 55`: `0xC0 + P`, then the item encodings
//! - list, `P > 55`: `0xF7 + len(P)`, then `P` big-endian, then the items
//!
//! Integers are big-endian with no leading zero bytes; zero is the empty
//! string. Booleans encode as `0x80`/`0x01`. Decoding is strict: any
//! non-canonical form is rejected, never silently accepted.
//!
//! # Usage
//!
//! Encoding goes through [`Encodable`] and an [`EncoderBuffer`], decoding
//! through [`Decodable`] and a pull-style [`Stream`]:
//!
//! ```
//! use ember_rlp::{decode_from_bytes, encode_to_bytes};
//!
//! let enc = encode_to_bytes(&1024u64);
//! assert_eq!(enc, vec![0x82, 0x04, 0x00]);
//! assert_eq!(decode_from_bytes::<u64>(&enc).unwrap(), 1024);
//! ```
//!
//! # Struct fields
//!
//! Struct types encode as the list of their fields, written by hand in the
//! type's `Encodable`/`Decodable` impls. Three conventions from the wire
//! protocol are supported by dedicated combinators:
//!
//! - trailing *optional* fields: encode them only while a non-default suffix
//!   remains; decode them as `Option<T>`, which yields `None` once the
//!   enclosing list is exhausted.
//! - a *tail* field: [`Stream::decode_tail`] absorbs all remaining list
//!   elements without an inner list header.
//! - *nilable* pointers: [`Stream::decode_nil`] turns the empty string or
//!   the empty list (per [`NilKind`]) into `None`, and
//!   [`EncoderBuffer::write_empty_string`]/[`EncoderBuffer::write_empty_list`]
//!   produce them.

mod decode;
mod encode;
mod raw;

pub use decode::{decode_from_bytes, decode_list, Decodable, DecodeError, Kind, NilKind, Stream};
pub use encode::{encode_list, encode_to_bytes, Encodable, EncoderBuffer, ListHandle, RawValue};
pub use raw::{count_values, split, split_list, split_string};

/// The RLP encoding of the empty string.
pub const EMPTY_STRING: [u8; 1] = [0x80];

/// The RLP encoding of the empty list.
pub const EMPTY_LIST: [u8; 1] = [0xC0];

/// Maximum nesting depth accepted by the streaming decoder.
pub const MAX_DEPTH: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let enc = encode_to_bytes(&"dog");
        assert_eq!(enc, vec![0x83, b'd', b'o', b'g']);
        assert_eq!(decode_from_bytes::<String>(&enc).unwrap(), "dog");
    }

    #[test]
    fn test_list_of_strings() {
        let mut buf = EncoderBuffer::new();
        let lh = buf.list_start();
        buf.write_str("cat");
        buf.write_str("dog");
        buf.list_end(lh);
        assert_eq!(
            buf.finish(),
            vec![0xC8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(encode_to_bytes(&[0u8; 0][..]), EMPTY_STRING);
        assert_eq!(encode_to_bytes(&0u64), EMPTY_STRING);
        let mut buf = EncoderBuffer::new();
        buf.write_empty_list();
        assert_eq!(buf.finish(), EMPTY_LIST);
    }
}
