//! Merkle proof construction and verification.
//!
//! A proof for a key is the set of trie nodes on the path from the root to
//! that key, each in its hashed (stored) form, keyed by hash. Nodes whose
//! encoding is embedded in their parent do not appear separately. Given the
//! root hash and the proof set, a verifier re-walks the path without any
//! access to the trie and recovers the value, or establishes its absence.

use ember_db::{KeyValueReader, KeyValueWriter};

use crate::encoding::key_bytes_to_hex;
use crate::error::TrieError;
use crate::hasher::Hasher;
use crate::node::{decode_node, node_to_bytes, Node};
use crate::trie::Trie;
use crate::Hash256;

impl Trie {
    /// Constructs a proof for `key`: all nodes on the path to the value are
    /// written to `proof_db` as `hash -> encoding`. The value itself sits in
    /// the last node; if the key is absent, the proof instead ends at the
    /// node where the path diverges, proving exclusion.
    ///
    /// With `from_level` set, that many nodes at the top of the path are
    /// omitted from the proof.
    pub fn prove(
        &mut self,
        key: &[u8],
        from_level: usize,
        proof_db: &dyn KeyValueWriter,
    ) -> Result<(), TrieError> {
        // Collect all nodes on the path to the key.
        let hex = key_bytes_to_hex(key);
        let mut key = &hex[..];
        let mut nodes = Vec::new();
        let mut tn = self.root.clone();
        let mut prefix = Vec::new();
        while !key.is_empty() && !tn.is_empty() {
            match tn {
                Node::Short(ref sn) => {
                    if key.len() < sn.key.len() || sn.key != key[..sn.key.len()] {
                        // The trie doesn't contain the key.
                        tn = Node::Empty;
                    } else {
                        prefix.extend_from_slice(&sn.key);
                        key = &key[sn.key.len()..];
                        let next = sn.val.clone();
                        nodes.push(Node::Short(sn.clone()));
                        tn = next;
                    }
                }
                Node::Full(ref fnode) => {
                    let idx = key[0] as usize;
                    prefix.push(key[0]);
                    key = &key[1..];
                    let next = fnode.children[idx].clone();
                    nodes.push(Node::Full(fnode.clone()));
                    tn = next;
                }
                Node::Hash(hash) => {
                    tn = self.resolve_hash(&hash, &prefix)?;
                }
                Node::Value(_) | Node::Empty => break,
            }
        }
        // Collapse each collected node and write its stored form. Embedded
        // nodes appear inside their parents, never on their own, except for
        // the root, which is always written.
        let mut hasher = Hasher::acquire(false);
        let mut from_level = from_level;
        for (i, n) in nodes.iter().enumerate() {
            if from_level > 0 {
                from_level -= 1;
                continue;
            }
            let (collapsed, hashed) = hasher.proof_hash(n);
            let is_hashed = matches!(hashed, Node::Hash(_));
            if is_hashed || i == 0 {
                let enc = node_to_bytes(&collapsed);
                let hash = match hashed {
                    Node::Hash(h) => h,
                    _ => hasher.hash_data(&enc),
                };
                proof_db.put(&hash, &enc)?;
            }
        }
        hasher.release();
        Ok(())
    }
}

/// Checks a proof against a root hash. Returns the proven value, or `None`
/// if the proof shows the key is absent from the trie. Fails if the proof
/// set does not connect the root to the key.
pub fn verify_proof(
    root_hash: &Hash256,
    key: &[u8],
    proof_db: &dyn KeyValueReader,
) -> Result<Option<Vec<u8>>, TrieError> {
    let hex = key_bytes_to_hex(key);
    let mut key = &hex[..];
    let mut want_hash = *root_hash;
    loop {
        let Some(buf) = proof_db.get(&want_hash)? else {
            return Err(TrieError::MissingProofNode { hash: want_hash });
        };
        let node = decode_node(Some(want_hash), &buf)?;
        match walk_embedded(&node, key) {
            (_, None) => {
                // The path ends before the key: the trie does not contain
                // the key, which is exactly what this proof shows.
                return Ok(None);
            }
            (rest, Some(Node::Hash(hash))) => {
                key = rest;
                want_hash = hash;
            }
            (_, Some(Node::Value(value))) => return Ok(Some(value)),
            _ => return Err(TrieError::InvalidNode("unexpected node in proof")),
        }
    }
}

/// Follows `key` through `node` and any nodes embedded in it, stopping at
/// the first hash reference, the value, or the end of the path.
fn walk_embedded<'k>(node: &Node, key: &'k [u8]) -> (&'k [u8], Option<Node>) {
    let mut tn = node.clone();
    let mut key = key;
    loop {
        match tn {
            Node::Short(sn) => {
                if key.len() < sn.key.len() || sn.key != key[..sn.key.len()] {
                    return (key, None);
                }
                key = &key[sn.key.len()..];
                tn = sn.val.clone();
            }
            Node::Full(fnode) => {
                let Some((first, rest)) = key.split_first() else {
                    return (key, None);
                };
                key = rest;
                tn = fnode.children[*first as usize].clone();
            }
            Node::Hash(hash) => return (key, Some(Node::Hash(hash))),
            Node::Value(v) => return (key, Some(Node::Value(v))),
            Node::Empty => return (key, None),
        }
    }
}
