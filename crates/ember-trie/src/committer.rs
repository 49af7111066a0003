//! Persisting a hashed trie.
//!
//! The committer performs the second walk of the commit pipeline: after the
//! hasher has derived every node's hash, it collects each dirty node's
//! `(hash, encoding)` pair and hands the whole set to the node database as
//! one atomic batch. Clean sub-tries short-circuit to their hash reference,
//! which is what makes re-committing an unchanged trie free.

use std::sync::Arc;

use crate::db::NodeDatabase;
use crate::encoding::{hex_to_compact, hex_to_key_bytes, TERMINATOR};
use crate::error::TrieError;
use crate::node::{node_to_bytes, Node};
use crate::trie::LeafCallback;
use crate::Hash256;

/// Collects the dirty nodes of one commit.
pub(crate) struct Committer<'a> {
    nodes: Vec<(Hash256, Vec<u8>)>,
    on_leaf: Option<LeafCallback<'a>>,
}

impl<'a> Committer<'a> {
    pub(crate) fn new(on_leaf: Option<LeafCallback<'a>>) -> Self {
        Self {
            nodes: Vec::new(),
            on_leaf,
        }
    }

    /// Collapses `n` into its stored form, collecting every dirty node on
    /// the way. `path` is the nibble path of `n` from the root.
    pub(crate) fn commit(&mut self, path: &mut Vec<u8>, n: &Node) -> Result<Node, TrieError> {
        // A clean node with a known hash needs no work; replacing it with
        // the hash reference drops the resolved sub-trie after the commit.
        let (hash, dirty) = n.cache();
        if let (Some(hash), false) = (hash, dirty) {
            return Ok(Node::Hash(hash));
        }
        match n {
            Node::Short(sn) => {
                let mut collapsed = (**sn).clone();
                // An extension's branch child commits first; value and hash
                // children are carried as-is.
                if matches!(sn.val, Node::Full(_)) {
                    path.extend_from_slice(&sn.key);
                    collapsed.val = self.commit(path, &sn.val)?;
                    path.truncate(path.len() - sn.key.len());
                }
                collapsed.key = hex_to_compact(&sn.key);
                self.store(path, Some(&sn.key), Node::Short(Arc::new(collapsed)))
            }
            Node::Full(fnode) => {
                let mut collapsed = (**fnode).clone();
                for i in 0..16 {
                    match &fnode.children[i] {
                        Node::Empty | Node::Hash(_) => {}
                        child => {
                            path.push(i as u8);
                            collapsed.children[i] = self.commit(path, child)?;
                            path.pop();
                        }
                    }
                }
                self.store(path, None, Node::Full(Arc::new(collapsed)))
            }
            Node::Hash(_) => Ok(n.clone()),
            _ => Err(TrieError::InvalidNode("unexpected node in commit")),
        }
    }

    /// Stores a collapsed node if it has a hash of its own; nodes too small
    /// to be hashed stay embedded in their parent. `short_key` is the hex
    /// key of a short node, used to derive the leaf path.
    fn store(
        &mut self,
        path: &[u8],
        short_key: Option<&[u8]>,
        n: Node,
    ) -> Result<Node, TrieError> {
        let (hash, _) = n.cache();
        let Some(hash) = hash else {
            return Ok(n);
        };
        let enc = node_to_bytes(&n);
        self.nodes.push((hash, enc));

        // Report any value stored within this node to the leaf callback.
        match (&n, short_key) {
            (Node::Short(sn), Some(key)) => {
                if let Node::Value(value) = &sn.val {
                    let hexpath = [path, key].concat();
                    self.fire_leaf(&hexpath, value, hash)?;
                }
            }
            (Node::Full(fnode), _) => {
                if let Node::Value(value) = &fnode.children[16] {
                    let hexpath = [path, &[TERMINATOR]].concat();
                    self.fire_leaf(&hexpath, value, hash)?;
                }
            }
            _ => {}
        }
        Ok(Node::Hash(hash))
    }

    fn fire_leaf(
        &mut self,
        hexpath: &[u8],
        value: &[u8],
        parent: Hash256,
    ) -> Result<(), TrieError> {
        if let Some(cb) = self.on_leaf.as_mut() {
            let segments = path_segments(hexpath);
            cb(&segments, hexpath, value, parent)?;
        }
        Ok(())
    }

    /// Writes the collected nodes to the store and returns how many there
    /// were.
    pub(crate) fn finish(self, db: &NodeDatabase) -> Result<usize, TrieError> {
        let count = self.nodes.len();
        if count > 0 {
            db.insert_batch(&self.nodes)?;
        }
        Ok(count)
    }
}

/// Splits a composite hex path into its raw key segments: one for a plain
/// trie, two for a path reaching through an account into its storage trie.
fn path_segments(hexpath: &[u8]) -> Vec<Vec<u8>> {
    if hexpath.len() <= 65 {
        vec![hex_to_key_bytes(hexpath)]
    } else {
        vec![
            hex_to_key_bytes(&hexpath[..64]),
            hex_to_key_bytes(&hexpath[64..]),
        ]
    }
}
