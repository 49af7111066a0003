//! RLP decoding.
//!
//! Decoding is pull-style: a [`Stream`] wraps the input, [`Stream::kind`]
//! peeks at the next value and the typed accessors consume it. All values are
//! self-delimiting, so no out-of-band length is needed. The decoder is
//! strict: non-canonical encodings are rejected with a [`DecodeError`] rather
//! than silently accepted.

use thiserror::Error;

use crate::MAX_DEPTH;

/// Errors that can occur during decoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A string was expected but the input holds a list.
    #[error("rlp: expected input string or byte")]
    ExpectedString,

    /// A list was expected but the input holds a string.
    #[error("rlp: expected input list")]
    ExpectedList,

    /// A header encodes a size that would fit a smaller header.
    #[error("rlp: non-canonical size information")]
    CanonSize,

    /// An integer has leading zero bytes.
    #[error("rlp: non-canonical integer (leading zero bytes)")]
    CanonInt,

    /// A value does not fit the target type.
    #[error("rlp: value size exceeds target type")]
    ValueTooLarge,

    /// A header promises more payload bytes than the input holds.
    #[error("rlp: value larger than available input")]
    InputTooShort,

    /// An element extends past the end of its containing list.
    #[error("rlp: element is larger than containing list")]
    ElemTooLarge,

    /// The input holds extra data after the first value.
    #[error("rlp: input contains more than one value")]
    MoreThanOneValue,

    /// A decoded structure left trailing bytes unconsumed.
    #[error("rlp: unexpected trailing bytes")]
    UnexpectedTrailingBytes,

    /// The input ended in the middle of a value.
    #[error("rlp: unexpected end of input")]
    UnexpectedEof,

    /// List nesting exceeds [`MAX_DEPTH`].
    #[error("rlp: nesting depth limit exceeded")]
    NestingTooDeep,

    /// `list_end` was called before the list payload was fully consumed.
    #[error("rlp: call of list_end not positioned at end of list")]
    NotAtEol,

    /// A string is not valid UTF-8.
    #[error("rlp: invalid UTF-8 in string")]
    InvalidUtf8,

    /// A byte array has the wrong length.
    #[error("rlp: byte array length mismatch (expected {expected}, got {actual})")]
    ByteArrayLength { expected: usize, actual: usize },

    /// A type-specific decoding error.
    #[error("rlp: {0}")]
    Custom(&'static str),
}

/// The kind of the next value in a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A single byte below `0x80`, its own encoding.
    Byte,
    /// A byte string.
    String,
    /// A list of values.
    List,
}

/// The RLP kind a missing ("nil") value decodes from and encodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NilKind {
    /// Nil round-trips through the empty string.
    String,
    /// Nil round-trips through the empty list.
    List,
}

/// A parsed value header: kind, header length, payload length.
#[derive(Debug, Clone, Copy)]
struct Header {
    kind: Kind,
    head_len: usize,
    payload_len: usize,
    byteval: u8,
}

/// A pull-style decoder over an RLP-encoded byte slice.
pub struct Stream<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute end offsets of the enclosing lists, innermost last.
    stack: Vec<usize>,
    /// Parsed header of the next value, if already peeked.
    head: Option<Header>,
}

impl<'a> Stream<'a> {
    /// Creates a stream over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            head: None,
        }
    }

    /// Returns the number of input bytes left in the current context.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit() - self.pos
    }

    /// Returns whether the current list has more elements. Outside of a list
    /// this reports whether any input is left.
    #[must_use]
    pub fn more_in_list(&self) -> bool {
        self.pos < self.limit()
    }

    fn limit(&self) -> usize {
        self.stack.last().copied().unwrap_or(self.data.len())
    }

    /// Peeks at the kind of the next value without consuming it.
    pub fn kind(&mut self) -> Result<Kind, DecodeError> {
        Ok(self.peek()?.kind)
    }

    fn peek(&mut self) -> Result<Header, DecodeError> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let limit = self.limit();
        if self.pos >= limit {
            return Err(DecodeError::UnexpectedEof);
        }
        let b = self.data[self.pos];
        let head = match b {
            0x00..=0x7f => Header {
                kind: Kind::Byte,
                head_len: 0,
                payload_len: 1,
                byteval: b,
            },
            0x80..=0xb7 => Header {
                kind: Kind::String,
                head_len: 1,
                payload_len: (b - 0x80) as usize,
                byteval: 0,
            },
            0xb8..=0xbf => {
                let payload_len = self.read_size((b - 0xb7) as usize)?;
                Header {
                    kind: Kind::String,
                    head_len: 1 + (b - 0xb7) as usize,
                    payload_len,
                    byteval: 0,
                }
            }
            0xc0..=0xf7 => Header {
                kind: Kind::List,
                head_len: 1,
                payload_len: (b - 0xc0) as usize,
                byteval: 0,
            },
            0xf8..=0xff => {
                let payload_len = self.read_size((b - 0xf7) as usize)?;
                Header {
                    kind: Kind::List,
                    head_len: 1 + (b - 0xf7) as usize,
                    payload_len,
                    byteval: 0,
                }
            }
        };
        let total = head.head_len + head.payload_len;
        if total > limit - self.pos {
            return Err(if self.stack.is_empty() {
                DecodeError::InputTooShort
            } else {
                DecodeError::ElemTooLarge
            });
        }
        self.head = Some(head);
        Ok(head)
    }

    /// Reads the big-endian size of a long-form header. Sizes below 56 and
    /// sizes with leading zero bytes are not canonical.
    fn read_size(&self, len_of_len: usize) -> Result<usize, DecodeError> {
        let start = self.pos + 1;
        if start + len_of_len > self.data.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.data[start..start + len_of_len];
        if bytes[0] == 0 {
            return Err(DecodeError::CanonSize);
        }
        let mut size = 0u64;
        for b in bytes {
            size = (size << 8) | u64::from(*b);
        }
        if size < 56 {
            return Err(DecodeError::CanonSize);
        }
        usize::try_from(size).map_err(|_| DecodeError::InputTooShort)
    }

    fn advance(&mut self, head: Header) {
        self.pos += head.head_len + head.payload_len;
        self.head = None;
    }

    /// Consumes the next value as a byte string, borrowing from the input.
    pub fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let head = self.peek()?;
        match head.kind {
            Kind::Byte => {
                let out = &self.data[self.pos..self.pos + 1];
                self.advance(head);
                Ok(out)
            }
            Kind::String => {
                let start = self.pos + head.head_len;
                let out = &self.data[start..start + head.payload_len];
                if head.payload_len == 1 && out[0] <= 0x7f {
                    // should have been encoded as a single byte
                    return Err(DecodeError::CanonSize);
                }
                self.advance(head);
                Ok(out)
            }
            Kind::List => Err(DecodeError::ExpectedString),
        }
    }

    /// Consumes the next value as an unsigned integer of at most `max_bytes`
    /// payload bytes.
    fn uint(&mut self, max_bytes: usize) -> Result<u64, DecodeError> {
        let head = self.peek()?;
        match head.kind {
            Kind::Byte => {
                if head.byteval == 0 {
                    // canonical zero is the empty string
                    return Err(DecodeError::CanonInt);
                }
                let v = u64::from(head.byteval);
                self.advance(head);
                Ok(v)
            }
            Kind::String => {
                if head.payload_len > max_bytes {
                    return Err(DecodeError::ValueTooLarge);
                }
                let start = self.pos + head.head_len;
                let payload = &self.data[start..start + head.payload_len];
                if payload.len() > 1 && payload[0] == 0 {
                    return Err(DecodeError::CanonInt);
                }
                let mut v = 0u64;
                for b in payload {
                    v = (v << 8) | u64::from(*b);
                }
                if head.payload_len > 0 && v < 0x80 {
                    // should have been encoded as a single byte
                    return Err(DecodeError::CanonSize);
                }
                self.advance(head);
                Ok(v)
            }
            Kind::List => Err(DecodeError::ExpectedString),
        }
    }

    /// Consumes the next value as a `u64`.
    pub fn uint64(&mut self) -> Result<u64, DecodeError> {
        self.uint(8)
    }

    /// Consumes the next value as a boolean (`0x80` false, `0x01` true).
    pub fn bool_value(&mut self) -> Result<bool, DecodeError> {
        match self.uint(1)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::Custom("invalid boolean value")),
        }
    }

    /// Enters the next value, which must be a list. Returns its payload size.
    pub fn list(&mut self) -> Result<usize, DecodeError> {
        let head = self.peek()?;
        if head.kind != Kind::List {
            return Err(DecodeError::ExpectedList);
        }
        if self.stack.len() >= MAX_DEPTH {
            return Err(DecodeError::NestingTooDeep);
        }
        self.pos += head.head_len;
        self.stack.push(self.pos + head.payload_len);
        self.head = None;
        Ok(head.payload_len)
    }

    /// Leaves the current list. The payload must be fully consumed.
    pub fn list_end(&mut self) -> Result<(), DecodeError> {
        let end = self
            .stack
            .pop()
            .ok_or(DecodeError::Custom("list_end called outside of a list"))?;
        if self.pos != end {
            return Err(DecodeError::NotAtEol);
        }
        Ok(())
    }

    /// Consumes the next value and returns its full encoding, header
    /// included.
    pub fn raw(&mut self) -> Result<&'a [u8], DecodeError> {
        let head = self.peek()?;
        let total = head.head_len + head.payload_len;
        let out = &self.data[self.pos..self.pos + total];
        self.advance(head);
        Ok(out)
    }

    /// Decodes a nilable value: the empty value of `kind` yields `None`,
    /// anything else decodes as `T`.
    pub fn decode_nil<T: Decodable>(
        &mut self,
        kind: NilKind,
    ) -> Result<Option<T>, DecodeError> {
        let head = self.peek()?;
        let is_nil = match (head.kind, kind) {
            (Kind::String, NilKind::String) => head.payload_len == 0,
            (Kind::List, NilKind::List) => head.payload_len == 0,
            _ => false,
        };
        if is_nil {
            self.advance(head);
            return Ok(None);
        }
        T::decode(self).map(Some)
    }

    /// Absorbs all remaining elements of the current list. This is the
    /// decode side of a tail field: the elements carry no inner list header.
    pub fn decode_tail<T: Decodable>(&mut self) -> Result<Vec<T>, DecodeError> {
        let mut out = Vec::new();
        while self.more_in_list() {
            out.push(T::decode(self)?);
        }
        Ok(out)
    }
}

/// A type that can be read from RLP.
pub trait Decodable: Sized {
    /// Decodes a value from the stream.
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError>;
}

/// Decodes a single value from `data`. Trailing input is an error.
pub fn decode_from_bytes<T: Decodable>(data: &[u8]) -> Result<T, DecodeError> {
    let mut s = Stream::new(data);
    let v = T::decode(&mut s)?;
    if s.remaining() > 0 {
        return Err(DecodeError::MoreThanOneValue);
    }
    Ok(v)
}

/// Decodes a homogeneous RLP list into a vector.
///
/// The counterpart of [`encode_list`](crate::encode_list); byte strings do
/// not go through this.
pub fn decode_list<T: Decodable>(s: &mut Stream<'_>) -> Result<Vec<T>, DecodeError> {
    s.list()?;
    let out = s.decode_tail()?;
    s.list_end()?;
    Ok(out)
}

macro_rules! impl_decodable_uint {
    ($($t:ty),*) => {
        $(impl Decodable for $t {
            fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
                let v = s.uint(std::mem::size_of::<$t>())?;
                Ok(v as $t)
            }
        })*
    };
}

impl_decodable_uint!(u8, u16, u32, u64, usize);

impl Decodable for bool {
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
        s.bool_value()
    }
}

impl Decodable for Vec<u8> {
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
        Ok(s.bytes()?.to_vec())
    }
}

impl<const N: usize> Decodable for [u8; N] {
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
        let b = s.bytes()?;
        b.try_into().map_err(|_| DecodeError::ByteArrayLength {
            expected: N,
            actual: b.len(),
        })
    }
}

impl Decodable for String {
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
        let b = s.bytes()?;
        String::from_utf8(b.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// Inside a list, `Option<T>` implements the trailing-optional convention:
/// once the list is exhausted the value is `None`.
impl<T: Decodable> Decodable for Option<T> {
    fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
        if s.more_in_list() {
            T::decode(s).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_to_bytes, Encodable, EncoderBuffer};

    #[test]
    fn test_decode_uint() {
        assert_eq!(decode_from_bytes::<u64>(&[0x80]).unwrap(), 0);
        assert_eq!(decode_from_bytes::<u64>(&[0x01]).unwrap(), 1);
        assert_eq!(decode_from_bytes::<u64>(&[0x7f]).unwrap(), 0x7f);
        assert_eq!(decode_from_bytes::<u64>(&[0x81, 0x80]).unwrap(), 0x80);
        assert_eq!(decode_from_bytes::<u64>(&[0x82, 0x04, 0x00]).unwrap(), 1024);
    }

    #[test]
    fn test_reject_non_canonical_single_byte() {
        // 0x00..0x7f must be encoded as themselves
        assert_eq!(
            decode_from_bytes::<u64>(&[0x81, 0x00]),
            Err(DecodeError::CanonSize)
        );
        assert_eq!(
            decode_from_bytes::<Vec<u8>>(&[0x81, 0x42]),
            Err(DecodeError::CanonSize)
        );
    }

    #[test]
    fn test_reject_leading_zero_int() {
        assert_eq!(
            decode_from_bytes::<u64>(&[0x82, 0x00, 0x01]),
            Err(DecodeError::CanonInt)
        );
        // single zero byte is non-canonical zero
        assert_eq!(decode_from_bytes::<u64>(&[0x00]), Err(DecodeError::CanonInt));
    }

    #[test]
    fn test_reject_non_canonical_long_header() {
        // long form used for a size that fits the short form
        assert_eq!(
            decode_from_bytes::<Vec<u8>>(&[0xB8, 0x01, 0x42]),
            Err(DecodeError::CanonSize)
        );
        // leading zero in the size
        let mut input = vec![0xB9, 0x00, 0x38];
        input.extend_from_slice(&[0u8; 56]);
        assert_eq!(
            decode_from_bytes::<Vec<u8>>(&input),
            Err(DecodeError::CanonSize)
        );
    }

    #[test]
    fn test_reject_oversized_value() {
        assert_eq!(
            decode_from_bytes::<u8>(&[0x82, 0x04, 0x00]),
            Err(DecodeError::ValueTooLarge)
        );
    }

    #[test]
    fn test_reject_truncated_input() {
        assert_eq!(
            decode_from_bytes::<Vec<u8>>(&[0x83, 1, 2]),
            Err(DecodeError::InputTooShort)
        );
    }

    #[test]
    fn test_reject_trailing_value() {
        assert_eq!(
            decode_from_bytes::<u64>(&[0x01, 0x02]),
            Err(DecodeError::MoreThanOneValue)
        );
    }

    #[test]
    fn test_kind_mismatch() {
        assert_eq!(
            decode_from_bytes::<u64>(&[0xC0]),
            Err(DecodeError::ExpectedString)
        );
        let mut s = Stream::new(&[0x83, b'd', b'o', b'g']);
        assert_eq!(s.list(), Err(DecodeError::ExpectedList));
    }

    #[test]
    fn test_decode_string_list() {
        let data = [0xC8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let mut s = Stream::new(&data);
        s.list().unwrap();
        assert_eq!(String::decode(&mut s).unwrap(), "cat");
        assert_eq!(String::decode(&mut s).unwrap(), "dog");
        s.list_end().unwrap();
    }

    #[test]
    fn test_list_end_requires_consumption() {
        let data = [0xC8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let mut s = Stream::new(&data);
        s.list().unwrap();
        assert_eq!(String::decode(&mut s).unwrap(), "cat");
        assert_eq!(s.list_end(), Err(DecodeError::NotAtEol));
    }

    #[test]
    fn test_element_bounded_by_list() {
        // list of size 2 containing a 3-byte string header
        let data = [0xC2, 0x83, b'c'];
        let mut s = Stream::new(&data);
        s.list().unwrap();
        assert_eq!(s.bytes(), Err(DecodeError::ElemTooLarge));
    }

    #[test]
    fn test_round_trip_values() {
        for v in [0u64, 1, 127, 128, 256, 1024, u64::MAX] {
            assert_eq!(
                decode_from_bytes::<u64>(&encode_to_bytes(&v)).unwrap(),
                v
            );
        }
        for v in [vec![], vec![0u8], vec![0x80u8], vec![1u8; 55], vec![2u8; 400]] {
            assert_eq!(
                decode_from_bytes::<Vec<u8>>(&encode_to_bytes(&v)).unwrap(),
                v
            );
        }
        assert!(decode_from_bytes::<bool>(&encode_to_bytes(&true)).unwrap());
        assert!(!decode_from_bytes::<bool>(&encode_to_bytes(&false)).unwrap());
    }

    #[test]
    fn test_byte_array() {
        let arr = [7u8; 32];
        let enc = encode_to_bytes(&arr);
        assert_eq!(decode_from_bytes::<[u8; 32]>(&enc).unwrap(), arr);
        assert_eq!(
            decode_from_bytes::<[u8; 16]>(&enc),
            Err(DecodeError::ByteArrayLength {
                expected: 16,
                actual: 32
            })
        );
    }

    // A block-header-shaped struct exercising the trailing-optional
    // convention: `base_fee` is omitted when absent.
    #[derive(Debug, PartialEq)]
    struct SampleHeader {
        number: u64,
        extra: Vec<u8>,
        base_fee: Option<u64>,
    }

    impl Encodable for SampleHeader {
        fn encode(&self, out: &mut EncoderBuffer) {
            let lh = out.list_start();
            out.write_uint(self.number);
            out.write_bytes(&self.extra);
            if let Some(fee) = self.base_fee {
                out.write_uint(fee);
            }
            out.list_end(lh);
        }
    }

    impl Decodable for SampleHeader {
        fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
            s.list()?;
            let number = u64::decode(s)?;
            let extra = Vec::<u8>::decode(s)?;
            let base_fee = Option::<u64>::decode(s)?;
            s.list_end()?;
            Ok(Self {
                number,
                extra,
                base_fee,
            })
        }
    }

    #[test]
    fn test_optional_trailing_field() {
        let with = SampleHeader {
            number: 7,
            extra: b"x".to_vec(),
            base_fee: Some(1000),
        };
        let without = SampleHeader {
            number: 7,
            extra: b"x".to_vec(),
            base_fee: None,
        };
        let enc_with = encode_to_bytes(&with);
        let enc_without = encode_to_bytes(&without);
        assert!(enc_without.len() < enc_with.len());
        assert_eq!(decode_from_bytes::<SampleHeader>(&enc_with).unwrap(), with);
        assert_eq!(
            decode_from_bytes::<SampleHeader>(&enc_without).unwrap(),
            without
        );
    }

    // A transaction-envelope-shaped struct exercising the tail convention:
    // `payloads` absorbs all trailing list elements.
    #[derive(Debug, PartialEq)]
    struct SampleEnvelope {
        version: u64,
        payloads: Vec<Vec<u8>>,
    }

    impl Encodable for SampleEnvelope {
        fn encode(&self, out: &mut EncoderBuffer) {
            let lh = out.list_start();
            out.write_uint(self.version);
            for p in &self.payloads {
                out.write_bytes(p);
            }
            out.list_end(lh);
        }
    }

    impl Decodable for SampleEnvelope {
        fn decode(s: &mut Stream<'_>) -> Result<Self, DecodeError> {
            s.list()?;
            let version = u64::decode(s)?;
            let payloads = s.decode_tail()?;
            s.list_end()?;
            Ok(Self { version, payloads })
        }
    }

    #[test]
    fn test_tail_field() {
        let env = SampleEnvelope {
            version: 2,
            payloads: vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()],
        };
        let enc = encode_to_bytes(&env);
        assert_eq!(decode_from_bytes::<SampleEnvelope>(&enc).unwrap(), env);

        let empty = SampleEnvelope {
            version: 2,
            payloads: vec![],
        };
        let enc = encode_to_bytes(&empty);
        assert_eq!(decode_from_bytes::<SampleEnvelope>(&enc).unwrap(), empty);
    }

    #[test]
    fn test_nil_round_trip() {
        // nil pointer as empty string
        let mut buf = EncoderBuffer::new();
        buf.write_empty_string();
        let enc = buf.finish();
        let mut s = Stream::new(&enc);
        assert_eq!(
            s.decode_nil::<Vec<u8>>(NilKind::String).unwrap(),
            None
        );

        // nil pointer as empty list
        let mut buf = EncoderBuffer::new();
        buf.write_empty_list();
        let enc = buf.finish();
        let mut s = Stream::new(&enc);
        assert_eq!(s.decode_nil::<u64>(NilKind::List).unwrap(), None);

        // present value decodes through
        let enc = encode_to_bytes(&b"dog"[..]);
        let mut s = Stream::new(&enc);
        assert_eq!(
            s.decode_nil::<Vec<u8>>(NilKind::String).unwrap(),
            Some(b"dog".to_vec())
        );
    }

    #[test]
    fn test_nesting_depth_limit() {
        // a well-formed nest of 1100 lists: [[[...[]...]]]
        let mut buf = EncoderBuffer::new();
        let handles: Vec<_> = (0..1100).map(|_| buf.list_start()).collect();
        for h in handles.into_iter().rev() {
            buf.list_end(h);
        }
        let enc = buf.finish();

        let mut s = Stream::new(&enc);
        let mut result = Ok(0);
        for _ in 0..1100 {
            result = s.list();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(DecodeError::NestingTooDeep));
    }
}
