//! Trie key encodings.
//!
//! Keys are dealt with in three distinct encodings:
//!
//! - KEYBYTES contains the actual key and nothing else. This is the input to
//!   most API functions.
//! - HEX contains one byte per nibble of the key plus an optional trailing
//!   terminator byte `0x10`, which flags whether the node at the key holds a
//!   value. Hex form is used for nodes loaded in memory because it is cheap
//!   to index.
//! - COMPACT ("hex prefix" in the yellow paper) packs two nibbles per byte
//!   behind a flag nibble. The high nibble of the first byte carries the
//!   flags: the lowest bit encodes the oddness of the length, the next bit
//!   whether the key terminates in a value. For odd-length keys the low
//!   nibble of the flag byte holds the first key nibble. Compact form is
//!   used for nodes stored on disk.

/// The terminator nibble marking a hex key as value-terminated.
pub(crate) const TERMINATOR: u8 = 16;

/// Converts a hex nibble key to compact form.
pub(crate) fn hex_to_compact(hex: &[u8]) -> Vec<u8> {
    let mut hex = hex;
    let mut terminator = 0u8;
    if has_term(hex) {
        terminator = 1;
        hex = &hex[..hex.len() - 1];
    }
    let mut buf = vec![0u8; hex.len() / 2 + 1];
    buf[0] = terminator << 5; // the flag byte
    if hex.len() & 1 == 1 {
        buf[0] |= 1 << 4; // odd flag
        buf[0] |= hex[0]; // first nibble is contained in the first byte
        hex = &hex[1..];
    }
    pack_nibbles(hex, &mut buf[1..]);
    buf
}

/// Converts a hex nibble key to compact form in place, overwriting the input
/// buffer. Returns the length of the compact representation. Byte-equivalent
/// to [`hex_to_compact`].
pub(crate) fn hex_to_compact_in_place(hex: &mut [u8]) -> usize {
    let mut hex_len = hex.len();
    let mut first_byte = 0u8;
    if hex_len > 0 && hex[hex_len - 1] == TERMINATOR {
        first_byte = 1 << 5;
        hex_len -= 1; // last part was the terminator, ignore that
    }
    let bin_len = hex_len / 2 + 1;
    let mut ni = 0; // index in hex
    let mut bi = 1; // index in bin (compact)
    if hex_len & 1 == 1 {
        first_byte |= 1 << 4; // odd flag
        first_byte |= hex[0]; // first nibble is contained in the first byte
        ni += 1;
    }
    while ni < hex_len {
        hex[bi] = hex[ni] << 4 | hex[ni + 1];
        bi += 1;
        ni += 2;
    }
    hex[0] = first_byte;
    bin_len
}

/// Converts a compact key back to hex nibble form.
pub(crate) fn compact_to_hex(compact: &[u8]) -> Vec<u8> {
    if compact.is_empty() {
        return Vec::new();
    }
    let mut base = key_bytes_to_hex(compact);
    // delete terminator flag
    if base[0] < 2 {
        base.truncate(base.len() - 1);
    }
    // apply odd flag
    let chop = 2 - (base[0] & 1) as usize;
    base.drain(..chop);
    base
}

/// Expands a key to hex nibble form, with the terminator appended.
pub(crate) fn key_bytes_to_hex(key: &[u8]) -> Vec<u8> {
    let mut nibbles = vec![0u8; key.len() * 2 + 1];
    for (i, b) in key.iter().enumerate() {
        nibbles[i * 2] = b / 16;
        nibbles[i * 2 + 1] = b % 16;
    }
    nibbles[key.len() * 2] = TERMINATOR;
    nibbles
}

/// Turns hex nibbles back into key bytes. Only usable for keys of even
/// length once the terminator is stripped.
pub(crate) fn hex_to_key_bytes(hex: &[u8]) -> Vec<u8> {
    let mut hex = hex;
    if has_term(hex) {
        hex = &hex[..hex.len() - 1];
    }
    assert!(hex.len() & 1 == 0, "can't convert hex key of odd length");
    let mut key = vec![0u8; hex.len() / 2];
    pack_nibbles(hex, &mut key);
    key
}

fn pack_nibbles(nibbles: &[u8], bytes: &mut [u8]) {
    for (bi, pair) in nibbles.chunks_exact(2).enumerate() {
        bytes[bi] = pair[0] << 4 | pair[1];
    }
}

/// Returns the length of the common prefix of `a` and `b`.
pub(crate) fn prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Returns whether a hex key carries the terminator flag.
pub(crate) fn has_term(s: &[u8]) -> bool {
    s.last() == Some(&TERMINATOR)
}
