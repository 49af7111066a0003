//! Trie node types and their wire representation.
//!
//! A node is one of:
//!
//! - [`Node::Short`]: a compressed nibble run. A short node whose key ends in
//!   the terminator is a leaf (its value child holds the payload); otherwise
//!   it is an extension pointing at a branch.
//! - [`Node::Full`]: a 17-way branch, one child per nibble plus a value slot
//!   at index 16 for a key ending exactly here.
//! - [`Node::Value`]: an opaque leaf payload.
//! - [`Node::Hash`]: a 32-byte reference standing in for a sub-trie that
//!   lives in the node store and has not been materialised.
//! - [`Node::Empty`]: an absent child.
//!
//! On the wire a short node is the list `[compact(key), val]` and a full
//! node a 17-element list. A child whose own encoding is under 32 bytes is
//! embedded verbatim in its parent; larger children appear as their 32-byte
//! hash. Two structural invariants hold everywhere: a short node never has a
//! short child (runs are merged), and a full node always has at least two
//! occupied slots (otherwise it collapses into a short node).

use std::sync::Arc;

use ember_rlp::{count_values, split, split_list, split_string, EncoderBuffer, Kind};

use crate::encoding::{compact_to_hex, has_term};
use crate::error::TrieError;
use crate::Hash256;

/// Cache metadata attached to short and full nodes.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeFlag {
    /// The cached hash of the node's encoding, if it has been computed.
    pub hash: Option<Hash256>,
    /// Whether the node has changes that have not been committed.
    pub dirty: bool,
}

impl NodeFlag {
    /// The flag value for a newly created or mutated node.
    pub(crate) fn dirty() -> Self {
        Self {
            hash: None,
            dirty: true,
        }
    }
}

/// A short node: a nibble run leading to a single child.
#[derive(Debug, Clone)]
pub(crate) struct ShortNode {
    /// The key segment, in hex form in memory and compact form once
    /// collapsed for hashing.
    pub key: Vec<u8>,
    pub val: Node,
    pub flags: NodeFlag,
}

/// A full node: one child per nibble, value at slot 16.
#[derive(Debug, Clone)]
pub(crate) struct FullNode {
    pub children: [Node; 17],
    pub flags: NodeFlag,
}

impl FullNode {
    /// Seventeen absent children.
    pub(crate) fn empty_children() -> [Node; 17] {
        std::array::from_fn(|_| Node::Empty)
    }
}

/// A trie node.
#[derive(Debug, Clone, Default)]
pub(crate) enum Node {
    Short(Arc<ShortNode>),
    Full(Arc<FullNode>),
    Value(Vec<u8>),
    Hash(Hash256),
    #[default]
    Empty,
}

impl Node {
    /// Returns the cached hash and dirty state. Value and hash nodes have
    /// no cache entry of their own.
    pub(crate) fn cache(&self) -> (Option<Hash256>, bool) {
        match self {
            Node::Short(n) => (n.flags.hash, n.flags.dirty),
            Node::Full(n) => (n.flags.hash, n.flags.dirty),
            _ => (None, true),
        }
    }

    /// Returns whether this is the absent node.
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Appends the RLP encoding of this node.
    ///
    /// Short node keys are written as-is: callers collapse keys to compact
    /// form before encoding.
    pub(crate) fn encode(&self, w: &mut EncoderBuffer) {
        match self {
            Node::Short(n) => {
                let lh = w.list_start();
                w.write_bytes(&n.key);
                n.val.encode(w);
                w.list_end(lh);
            }
            Node::Full(n) => {
                let lh = w.list_start();
                for child in &n.children {
                    child.encode(w);
                }
                w.list_end(lh);
            }
            Node::Value(v) => w.write_bytes(v),
            Node::Hash(h) => w.write_bytes(h),
            Node::Empty => w.write_empty_string(),
        }
    }
}

/// Returns the RLP encoding of `n`, using a fresh buffer.
pub(crate) fn node_to_bytes(n: &Node) -> Vec<u8> {
    let mut buf = EncoderBuffer::new();
    n.encode(&mut buf);
    buf.finish()
}

/// Decodes a node from its RLP encoding. `hash` is remembered as the node's
/// cached hash so re-hashing a loaded sub-trie is free.
pub(crate) fn decode_node(hash: Option<Hash256>, buf: &[u8]) -> Result<Node, TrieError> {
    if buf.is_empty() {
        return Err(TrieError::InvalidNode("empty input"));
    }
    let (elems, rest) = split_list(buf)?;
    if !rest.is_empty() {
        return Err(TrieError::Decode(
            ember_rlp::DecodeError::UnexpectedTrailingBytes,
        ));
    }
    match count_values(elems)? {
        2 => decode_short(hash, elems),
        17 => decode_full(hash, elems),
        _ => Err(TrieError::InvalidNode("invalid number of list elements")),
    }
}

fn decode_short(hash: Option<Hash256>, elems: &[u8]) -> Result<Node, TrieError> {
    let (kbuf, rest) = split_string(elems)?;
    let flags = NodeFlag { hash, dirty: false };
    let key = compact_to_hex(kbuf);
    if has_term(&key) {
        // value node
        let (val, _) = split_string(rest)?;
        return Ok(Node::Short(Arc::new(ShortNode {
            key,
            val: Node::Value(val.to_vec()),
            flags,
        })));
    }
    let (val, _) = decode_ref(rest)?;
    Ok(Node::Short(Arc::new(ShortNode { key, val, flags })))
}

fn decode_full(hash: Option<Hash256>, elems: &[u8]) -> Result<Node, TrieError> {
    let mut node = FullNode {
        children: FullNode::empty_children(),
        flags: NodeFlag { hash, dirty: false },
    };
    let mut elems = elems;
    for i in 0..16 {
        let (child, rest) = decode_ref(elems)?;
        node.children[i] = child;
        elems = rest;
    }
    let (val, _) = split_string(elems)?;
    if !val.is_empty() {
        node.children[16] = Node::Value(val.to_vec());
    }
    Ok(Node::Full(Arc::new(node)))
}

/// Decodes a child reference: the empty string is an absent child, a
/// 32-byte string is a hash reference, and a nested list is an embedded
/// node, which must be smaller than a hash to be valid.
fn decode_ref(buf: &[u8]) -> Result<(Node, &[u8]), TrieError> {
    let (kind, val, rest) = split(buf)?;
    match kind {
        Kind::List => {
            let size = buf.len() - rest.len();
            if size > 32 {
                return Err(TrieError::InvalidNode("oversized embedded node"));
            }
            let node = decode_node(None, &buf[..size])?;
            Ok((node, rest))
        }
        _ if val.is_empty() => Ok((Node::Empty, rest)),
        _ if val.len() == 32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(val);
            Ok((Node::Hash(hash), rest))
        }
        _ => Err(TrieError::InvalidNode(
            "invalid RLP string size, want 0 or 32",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::hex_to_compact;
    use crate::keccak256;

    fn encode_test_full_node(children: &[Vec<u8>], value: &[u8]) -> Vec<u8> {
        let mut buf = EncoderBuffer::new();
        let lh = buf.list_start();
        for child in children {
            buf.write_bytes(child);
        }
        buf.write_bytes(value);
        buf.list_end(lh);
        buf.finish()
    }

    #[test]
    fn test_decode_full_node() {
        let children: Vec<Vec<u8>> = (0..16).map(|i| vec![i as u8 + 1; 32]).collect();
        let enc = encode_test_full_node(&children, b"decodefullnode");
        let hash = keccak256(&enc);

        let node = decode_node(Some(hash), &enc).unwrap();
        let Node::Full(full) = node else {
            panic!("expected full node");
        };
        assert_eq!(full.flags.hash, Some(hash));
        for i in 0..16 {
            assert!(matches!(full.children[i], Node::Hash(_)));
        }
        assert!(matches!(&full.children[16], Node::Value(v) if v == b"decodefullnode"));
    }

    #[test]
    fn test_decode_full_node_wrong_size_child() {
        let mut children: Vec<Vec<u8>> = (0..16).map(|i| vec![i as u8 + 1; 32]).collect();
        children[0] = b"00".to_vec();
        let enc = encode_test_full_node(&children, b"wrongsizechild");
        assert!(matches!(
            decode_node(None, &enc),
            Err(TrieError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_decode_nested_node() {
        // slot 15 holds a small embedded full node instead of a hash
        let mut buf = EncoderBuffer::new();
        let outer = buf.list_start();
        for i in 0..15 {
            buf.write_bytes(&vec![i as u8 + 1; 32]);
        }
        let inner = buf.list_start();
        for _ in 0..16 {
            buf.write_empty_string();
        }
        buf.write_str("subnode");
        buf.list_end(inner);
        buf.write_str("fullnode");
        buf.list_end(outer);
        let enc = buf.finish();

        let node = decode_node(None, &enc).unwrap();
        let Node::Full(full) = node else {
            panic!("expected full node");
        };
        let Node::Full(nested) = &full.children[15] else {
            panic!("expected embedded full node");
        };
        assert!(matches!(&nested.children[16], Node::Value(v) if v == b"subnode"));
    }

    #[test]
    fn test_decode_oversized_nested_node() {
        // the embedded node in slot 15 exceeds the 32-byte embedding limit
        let mut buf = EncoderBuffer::new();
        let outer = buf.list_start();
        for i in 0..15 {
            buf.write_bytes(&vec![i as u8 + 1; 32]);
        }
        let inner = buf.list_start();
        for _ in 0..16 {
            buf.write_str("123456");
        }
        buf.write_str("subnode");
        buf.list_end(inner);
        buf.write_str("fullnode");
        buf.list_end(outer);
        let enc = buf.finish();

        assert!(matches!(
            decode_node(None, &enc),
            Err(TrieError::InvalidNode("oversized embedded node"))
        ));
    }

    #[test]
    fn test_decode_embedded_leaf() {
        // a branch whose first child is a small embedded leaf
        let leaf = Node::Short(Arc::new(ShortNode {
            key: hex_to_compact(&[5, 16]),
            val: Node::Value(b"v".to_vec()),
            flags: NodeFlag::dirty(),
        }));
        let leaf_enc = node_to_bytes(&leaf);
        assert!(leaf_enc.len() < 32);

        let mut buf = EncoderBuffer::new();
        let lh = buf.list_start();
        buf.write_raw(&leaf_enc);
        buf.write_bytes(&[0xAA; 32]);
        for _ in 0..15 {
            buf.write_empty_string();
        }
        buf.list_end(lh);
        let enc = buf.finish();

        let node = decode_node(None, &enc).unwrap();
        let Node::Full(full) = node else {
            panic!("expected full node");
        };
        let Node::Short(short) = &full.children[0] else {
            panic!("expected embedded short node");
        };
        assert_eq!(short.key, vec![5, 16]);
        assert!(matches!(&short.val, Node::Value(v) if v == b"v"));
        assert!(matches!(full.children[1], Node::Hash(_)));
        assert!(full.children[2].is_empty());
    }

    #[test]
    fn test_short_node_round_trip() {
        let node = Node::Short(Arc::new(ShortNode {
            key: hex_to_compact(&[1, 2, 3, 16]),
            val: Node::Value(b"hello".to_vec()),
            flags: NodeFlag::dirty(),
        }));
        let enc = node_to_bytes(&node);
        let decoded = decode_node(Some(keccak256(&enc)), &enc).unwrap();
        let Node::Short(short) = decoded else {
            panic!("expected short node");
        };
        assert_eq!(short.key, vec![1, 2, 3, 16]);
        assert!(matches!(&short.val, Node::Value(v) if v == b"hello"));
        assert!(!short.flags.dirty);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_node(None, &[]).is_err());
        assert!(decode_node(None, &[0x80]).is_err());
        // a 3-element list is no node shape
        let mut buf = EncoderBuffer::new();
        let lh = buf.list_start();
        buf.write_uint(1);
        buf.write_uint(2);
        buf.write_uint(3);
        buf.list_end(lh);
        assert!(matches!(
            decode_node(None, &buf.finish()),
            Err(TrieError::InvalidNode(_))
        ));
    }
}
