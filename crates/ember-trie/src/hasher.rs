//! Node hashing.
//!
//! The hasher folds a live node graph into its content-addressed form:
//! every node whose encoding reaches 32 bytes collapses into its Keccak-256
//! hash, smaller nodes stay embedded in their parent. Hashing returns both
//! the collapsed node (for the parent's encoding) and a cached copy of the
//! original with the computed hash remembered, so the next fold is free.
//!
//! Hasher instances carry preallocated scratch space and are recycled
//! through a global pool.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use sha3::{Digest, Keccak256};

use ember_rlp::EncoderBuffer;

use crate::encoding::hex_to_compact;
use crate::node::{FullNode, Node, ShortNode};
use crate::Hash256;

/// Number of mutations after which full-node children are hashed on the
/// rayon pool instead of sequentially.
pub(crate) const PARALLEL_THRESHOLD: usize = 100;

/// Scratch capacity large enough for a collapsed full node's encoding.
const ENC_SCRATCH: usize = 550;

static HASHER_POOL: Mutex<Vec<Hasher>> = Mutex::new(Vec::new());

/// Scratch state for one hashing pass.
pub(crate) struct Hasher {
    sha: Keccak256,
    tmp: Vec<u8>,
    encbuf: EncoderBuffer,
    parallel: bool,
}

impl Hasher {
    /// Fetches a hasher from the pool, or creates one.
    pub(crate) fn acquire(parallel: bool) -> Self {
        let mut h = HASHER_POOL.lock().pop().unwrap_or_else(|| Hasher {
            sha: Keccak256::new(),
            tmp: Vec::with_capacity(ENC_SCRATCH),
            encbuf: EncoderBuffer::new(),
            parallel: false,
        });
        h.parallel = parallel;
        h
    }

    /// Returns a hasher to the pool.
    pub(crate) fn release(self) {
        HASHER_POOL.lock().push(self);
    }

    /// Collapses `n` into its hash node, also returning a copy of the
    /// original with the computed hash cached so the original can keep
    /// serving reads.
    ///
    /// `force` makes the root yield a hash even when its encoding stays
    /// under 32 bytes, so the root hash is well-defined for tiny tries.
    pub(crate) fn hash(&mut self, n: &Node, force: bool) -> (Node, Node) {
        // Return the cached hash if it's available.
        if let (Some(hash), _) = n.cache() {
            return (Node::Hash(hash), n.clone());
        }
        match n {
            Node::Short(sn) => {
                let (collapsed, mut cached) = self.hash_short_children(sn);
                let hashed = self.to_hash(Node::Short(Arc::new(collapsed)), force);
                let c = Arc::make_mut(&mut cached);
                c.flags.hash = match &hashed {
                    Node::Hash(h) => Some(*h),
                    _ => None,
                };
                (hashed, Node::Short(cached))
            }
            Node::Full(fnode) => {
                let (collapsed, mut cached) = self.hash_full_children(fnode);
                let hashed = self.to_hash(Node::Full(Arc::new(collapsed)), force);
                let c = Arc::make_mut(&mut cached);
                c.flags.hash = match &hashed {
                    Node::Hash(h) => Some(*h),
                    _ => None,
                };
                (hashed, Node::Full(cached))
            }
            // Value and hash nodes don't have children, so they're left as is.
            _ => (n.clone(), n.clone()),
        }
    }

    /// Collapses a short node: the key moves to compact form and the child
    /// is folded. The returned collapsed node is only valid for encoding.
    fn hash_short_children(&mut self, n: &Arc<ShortNode>) -> (ShortNode, Arc<ShortNode>) {
        let mut collapsed = (**n).clone();
        let mut cached = (**n).clone();
        collapsed.key = hex_to_compact(&n.key);
        if matches!(n.val, Node::Short(_) | Node::Full(_)) {
            let (h, c) = self.hash(&n.val, false);
            collapsed.val = h;
            cached.val = c;
        }
        (collapsed, Arc::new(cached))
    }

    /// Collapses a full node's sixteen children. Past the parallel
    /// threshold each child sub-trie is folded by its own pooled hasher on
    /// the rayon pool; results land in fixed slots, so the outcome is
    /// deterministic either way.
    fn hash_full_children(&mut self, n: &Arc<FullNode>) -> (FullNode, Arc<FullNode>) {
        let mut collapsed = (**n).clone();
        let mut cached = (**n).clone();

        if self.parallel {
            let results: Vec<Option<(Node, Node)>> = n.children[..16]
                .par_iter()
                .map(|child| {
                    if child.is_empty() {
                        return None;
                    }
                    let mut hasher = Hasher::acquire(false);
                    let pair = hasher.hash(child, false);
                    hasher.release();
                    Some(pair)
                })
                .collect();
            for (i, pair) in results.into_iter().enumerate() {
                if let Some((h, c)) = pair {
                    collapsed.children[i] = h;
                    cached.children[i] = c;
                }
            }
        } else {
            for i in 0..16 {
                if !n.children[i].is_empty() {
                    let (h, c) = self.hash(&n.children[i], false);
                    collapsed.children[i] = h;
                    cached.children[i] = c;
                }
            }
        }
        (collapsed, Arc::new(cached))
    }

    /// Encodes a collapsed node and hashes it, unless the encoding stays
    /// under 32 bytes and hashing is not forced, in which case the node is
    /// returned as-is for embedding in its parent.
    fn to_hash(&mut self, n: Node, force: bool) -> Node {
        self.encbuf.reset();
        n.encode(&mut self.encbuf);
        self.tmp.clear();
        self.encbuf.copy_to(&mut self.tmp);

        if self.tmp.len() < 32 && !force {
            return n; // nodes smaller than 32 bytes are stored inside their parent
        }
        self.sha.update(&self.tmp);
        let hash: Hash256 = self.sha.finalize_reset().into();
        Node::Hash(hash)
    }

    /// Returns the collapsed form of `n` (for encoding into a proof) along
    /// with its hashed form. Value and hash nodes are returned unchanged.
    pub(crate) fn proof_hash(&mut self, original: &Node) -> (Node, Node) {
        match original {
            Node::Short(sn) => {
                let (collapsed, _) = self.hash_short_children(sn);
                let collapsed = Node::Short(Arc::new(collapsed));
                let hashed = self.to_hash(collapsed.clone(), false);
                (collapsed, hashed)
            }
            Node::Full(fnode) => {
                let (collapsed, _) = self.hash_full_children(fnode);
                let collapsed = Node::Full(Arc::new(collapsed));
                let hashed = self.to_hash(collapsed.clone(), false);
                (collapsed, hashed)
            }
            _ => (original.clone(), original.clone()),
        }
    }

    /// Hashes raw bytes with this hasher's Keccak state.
    pub(crate) fn hash_data(&mut self, data: &[u8]) -> Hash256 {
        self.sha.update(data);
        self.sha.finalize_reset().into()
    }
}
