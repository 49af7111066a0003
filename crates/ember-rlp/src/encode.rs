//! RLP encoding.
//!
//! The encoder writes string data into one flat buffer and records list
//! headers on the side; [`EncoderBuffer::finish`] interleaves the two. This
//! two-part layout means list headers are sized after their payload is known,
//! without a second pass over the payload bytes.

use std::cell::RefCell;

/// A handle to an open list, returned by [`EncoderBuffer::list_start`] and
/// consumed by [`EncoderBuffer::list_end`].
#[derive(Debug, Clone, Copy)]
#[must_use = "an open list must be closed with list_end"]
pub struct ListHandle(usize);

#[derive(Debug, Clone, Copy)]
struct ListHead {
    /// Index of this header in the string data.
    offset: usize,
    /// Total size of the encoded payload, including nested list headers.
    /// While the list is open this temporarily holds the header-size ledger
    /// at the time the list was opened.
    size: usize,
}

impl ListHead {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_head(out, 0xC0, 0xF7, self.size as u64);
    }
}

/// An RLP output buffer.
///
/// Values are appended with the `write_*` methods; lists are bracketed by
/// [`list_start`](Self::list_start)/[`list_end`](Self::list_end). A buffer can
/// be reused across encodings via [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct EncoderBuffer {
    /// String data, containing everything except list headers.
    str: Vec<u8>,
    /// All list headers, in order of opening.
    lheads: Vec<ListHead>,
    /// Sum of the encoded sizes of all closed list headers.
    lhsize: usize,
}

impl EncoderBuffer {
    /// Creates an empty encoder buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the buffer for reuse, keeping its allocations.
    pub fn reset(&mut self) {
        self.str.clear();
        self.lheads.clear();
        self.lhsize = 0;
    }

    /// Returns the total size of the encoded output so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.str.len() + self.lhsize
    }

    /// Writes a byte string.
    pub fn write_bytes(&mut self, b: &[u8]) {
        if b.len() == 1 && b[0] <= 0x7f {
            // fits single byte, no string header
            self.str.push(b[0]);
        } else {
            self.write_string_header(b.len());
            self.str.extend_from_slice(b);
        }
    }

    /// Writes a UTF-8 string as a byte string.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Writes an unsigned integer in canonical form: big-endian, no leading
    /// zero bytes, zero as the empty string.
    pub fn write_uint(&mut self, i: u64) {
        if i == 0 {
            self.str.push(0x80);
        } else if i < 0x80 {
            // fits single byte, no string header
            self.str.push(i as u8);
        } else {
            let mut tmp = [0u8; 9];
            let n = put_int(&mut tmp[1..], i);
            tmp[0] = 0x80 + n as u8;
            self.str.extend_from_slice(&tmp[..n + 1]);
        }
    }

    /// Writes a boolean as `0x01`/`0x80`.
    pub fn write_bool(&mut self, b: bool) {
        self.str.push(if b { 0x01 } else { 0x80 });
    }

    /// Appends pre-encoded RLP verbatim.
    pub fn write_raw(&mut self, enc: &[u8]) {
        self.str.extend_from_slice(enc);
    }

    /// Writes the canonical empty string (`0x80`).
    pub fn write_empty_string(&mut self) {
        self.str.push(0x80);
    }

    /// Writes the canonical empty list (`0xC0`).
    pub fn write_empty_list(&mut self) {
        let lh = self.list_start();
        self.list_end(lh);
    }

    /// Opens a list. Everything written until the matching
    /// [`list_end`](Self::list_end) becomes the list payload.
    pub fn list_start(&mut self) -> ListHandle {
        self.lheads.push(ListHead {
            offset: self.str.len(),
            size: self.lhsize,
        });
        ListHandle(self.lheads.len() - 1)
    }

    /// Closes the list opened by `handle`, fixing up its header size.
    pub fn list_end(&mut self, handle: ListHandle) {
        let total = self.size();
        let lh = &mut self.lheads[handle.0];
        lh.size = total - lh.offset - lh.size;
        self.lhsize += head_size(lh.size as u64);
    }

    fn write_string_header(&mut self, size: usize) {
        if size < 56 {
            self.str.push(0x80 + size as u8);
        } else {
            let mut tmp = [0u8; 9];
            let n = put_int(&mut tmp[1..], size as u64);
            tmp[0] = 0xB7 + n as u8;
            self.str.extend_from_slice(&tmp[..n + 1]);
        }
    }

    /// Appends the finished encoding to `dst`.
    pub fn copy_to(&self, dst: &mut Vec<u8>) {
        dst.reserve(self.size());
        let mut strpos = 0;
        for head in &self.lheads {
            // string data preceding this header, then the header itself
            dst.extend_from_slice(&self.str[strpos..head.offset]);
            strpos = head.offset;
            head.encode_into(dst);
        }
        // string data after the last list header
        dst.extend_from_slice(&self.str[strpos..]);
    }

    /// Returns the finished encoding, leaving the buffer reusable.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.copy_to(&mut out);
        out
    }
}

/// Writes a string or list header to `out`. `small_tag` is the tag for
/// payloads up to 55 bytes, `large_tag` the base tag for the long form.
fn put_head(out: &mut Vec<u8>, small_tag: u8, large_tag: u8, size: u64) {
    if size < 56 {
        out.push(small_tag + size as u8);
    } else {
        let mut tmp = [0u8; 9];
        let n = put_int(&mut tmp[1..], size);
        tmp[0] = large_tag + n as u8;
        out.extend_from_slice(&tmp[..n + 1]);
    }
}

/// Writes `i` to the beginning of `b` in big-endian byte order, using the
/// least number of bytes needed to represent it. Returns the byte count.
fn put_int(b: &mut [u8], i: u64) -> usize {
    let n = int_size(i);
    for (j, slot) in b[..n].iter_mut().enumerate() {
        *slot = (i >> (8 * (n - 1 - j))) as u8;
    }
    n
}

/// The minimum number of bytes required to store `i`.
fn int_size(i: u64) -> usize {
    let mut size = 1;
    let mut i = i;
    loop {
        i >>= 8;
        if i == 0 {
            return size;
        }
        size += 1;
    }
}

/// The size of a string or list header for a payload of the given size.
pub(crate) fn head_size(size: u64) -> usize {
    if size < 56 {
        1
    } else {
        1 + int_size(size)
    }
}

/// A type that can be written as RLP.
pub trait Encodable {
    /// Appends the RLP encoding of `self` to the buffer.
    fn encode(&self, out: &mut EncoderBuffer);
}

/// Pre-encoded RLP, appended verbatim when encoded.
///
/// Used wherever a value is carried through in already-encoded form, such as
/// node references embedded inside their parent's encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawValue(pub Vec<u8>);

impl Encodable for RawValue {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_raw(&self.0);
    }
}

macro_rules! impl_encodable_uint {
    ($($t:ty),*) => {
        $(impl Encodable for $t {
            fn encode(&self, out: &mut EncoderBuffer) {
                out.write_uint(*self as u64);
            }
        })*
    };
}

impl_encodable_uint!(u8, u16, u32, u64, usize);

impl Encodable for bool {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bool(*self);
    }
}

impl Encodable for [u8] {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bytes(self);
    }
}

impl Encodable for Vec<u8> {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bytes(self);
    }
}

impl<const N: usize> Encodable for [u8; N] {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bytes(self);
    }
}

impl Encodable for str {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bytes(self.as_bytes());
    }
}

impl Encodable for String {
    fn encode(&self, out: &mut EncoderBuffer) {
        out.write_bytes(self.as_bytes());
    }
}

impl<T: Encodable + ?Sized> Encodable for &T {
    fn encode(&self, out: &mut EncoderBuffer) {
        (**self).encode(out);
    }
}

/// Encodes `items` as an RLP list.
///
/// Note that byte strings do not go through this: `[u8]` and friends encode
/// as strings directly.
pub fn encode_list<T: Encodable>(items: &[T], out: &mut EncoderBuffer) {
    let lh = out.list_start();
    for item in items {
        item.encode(out);
    }
    out.list_end(lh);
}

thread_local! {
    static ENCODER_POOL: RefCell<Vec<EncoderBuffer>> = const { RefCell::new(Vec::new()) };
}

/// Returns the RLP encoding of `val`.
///
/// Encoder buffers are recycled through a thread-local free list, so repeated
/// calls do not reallocate.
pub fn encode_to_bytes<T: Encodable + ?Sized>(val: &T) -> Vec<u8> {
    let mut buf = ENCODER_POOL
        .with(|pool| pool.borrow_mut().pop())
        .unwrap_or_default();
    buf.reset();
    val.encode(&mut buf);
    let out = buf.finish();
    ENCODER_POOL.with(|pool| pool.borrow_mut().push(buf));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: Encodable + ?Sized>(val: &T) -> Vec<u8> {
        encode_to_bytes(val)
    }

    #[test]
    fn test_encode_uint() {
        assert_eq!(encoded(&0u64), vec![0x80]);
        assert_eq!(encoded(&1u64), vec![0x01]);
        assert_eq!(encoded(&0x7fu64), vec![0x7f]);
        assert_eq!(encoded(&0x80u64), vec![0x81, 0x80]);
        assert_eq!(encoded(&1024u64), vec![0x82, 0x04, 0x00]);
        assert_eq!(
            encoded(&0xFFFFFFFFFFFFFFFFu64),
            vec![0x88, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_encode_bytes() {
        assert_eq!(encoded(&[0u8; 0][..]), vec![0x80]);
        assert_eq!(encoded(&[0x42u8][..]), vec![0x42]);
        assert_eq!(encoded(&[0x80u8][..]), vec![0x81, 0x80]);
        assert_eq!(encoded(&[1u8, 2, 3][..]), vec![0x83, 1, 2, 3]);
    }

    #[test]
    fn test_encode_long_string() {
        let data = vec![0xABu8; 60];
        let enc = encoded(&data[..]);
        assert_eq!(enc[0], 0xB8);
        assert_eq!(enc[1], 60);
        assert_eq!(&enc[2..], &data[..]);
    }

    #[test]
    fn test_encode_bool() {
        assert_eq!(encoded(&true), vec![0x01]);
        assert_eq!(encoded(&false), vec![0x80]);
    }

    #[test]
    fn test_encode_nested_list() {
        // [[], [[]], [[], [[]]]]
        let mut buf = EncoderBuffer::new();
        let outer = buf.list_start();
        buf.write_empty_list();
        let a = buf.list_start();
        buf.write_empty_list();
        buf.list_end(a);
        let b = buf.list_start();
        buf.write_empty_list();
        let c = buf.list_start();
        buf.write_empty_list();
        buf.list_end(c);
        buf.list_end(b);
        buf.list_end(outer);
        assert_eq!(
            buf.finish(),
            vec![0xC7, 0xC0, 0xC1, 0xC0, 0xC3, 0xC0, 0xC1, 0xC0]
        );
    }

    #[test]
    fn test_encode_long_list() {
        // 60 one-byte items needs a long list header
        let items: Vec<u8> = (0..60).map(|_| 0x01).collect();
        let mut buf = EncoderBuffer::new();
        let lh = buf.list_start();
        for item in &items {
            buf.write_uint(u64::from(*item));
        }
        buf.list_end(lh);
        let enc = buf.finish();
        assert_eq!(enc[0], 0xF8);
        assert_eq!(enc[1], 60);
        assert_eq!(enc.len(), 62);
    }

    #[test]
    fn test_encode_list_helper() {
        let mut buf = EncoderBuffer::new();
        encode_list(&["cat", "dog"], &mut buf);
        assert_eq!(
            buf.finish(),
            vec![0xC8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn test_raw_value() {
        let raw = RawValue(vec![0x83, b'd', b'o', b'g']);
        assert_eq!(encoded(&raw), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_buffer_reuse() {
        let mut buf = EncoderBuffer::new();
        buf.write_str("cat");
        assert_eq!(buf.finish(), vec![0x83, b'c', b'a', b't']);
        buf.reset();
        buf.write_str("dog");
        assert_eq!(buf.finish(), vec![0x83, b'd', b'o', b'g']);
    }
}
