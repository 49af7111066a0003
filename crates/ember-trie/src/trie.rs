//! The Merkle Patricia Trie.

use std::sync::Arc;

use tracing::warn;

use ember_db::DatabaseError;

use crate::committer::Committer;
use crate::db::NodeDatabase;
use crate::encoding::{compact_to_hex, key_bytes_to_hex, prefix_len};
use crate::error::TrieError;
use crate::hasher::{Hasher, PARALLEL_THRESHOLD};
use crate::node::{decode_node, FullNode, Node, NodeFlag, ShortNode};
use crate::tracer::Tracer;
use crate::{Hash256, EMPTY_ROOT};

/// Callback invoked once per value node written during [`Trie::commit`].
///
/// Receives the raw key path split into its layer segments, the composite
/// hex path, the value bytes, and the hash of the node containing the value.
/// A returned error aborts the commit. Used to crawl into nested tries, such
/// as the storage trie referenced by an account value.
pub type LeafCallback<'a> =
    &'a mut dyn FnMut(&[Vec<u8>], &[u8], &[u8], Hash256) -> Result<(), TrieError>;

/// A Merkle Patricia Trie.
///
/// Reads and writes go through the in-memory node graph, loading
/// hash-referenced sub-tries from the node store on demand. A trie handle is
/// not safe for concurrent mutation.
#[derive(Debug)]
pub struct Trie {
    db: Arc<NodeDatabase>,
    pub(crate) root: Node,
    /// Namespace tag for this trie within a layered state, e.g. the account
    /// whose storage it holds.
    owner: Hash256,
    /// Mutations since the last hashing operation; past a threshold the
    /// hasher fans child hashing out in parallel.
    unhashed: usize,
    /// Optional state-diff tracer, reset on every commit.
    tracer: Option<Tracer>,
}

impl Trie {
    /// Opens the trie with root `root` under the given owner.
    ///
    /// A zero or [`EMPTY_ROOT`] root yields an empty trie. Any other root is
    /// resolved from the store immediately; if absent, a
    /// [`TrieError::MissingNode`] is returned.
    pub fn new(owner: Hash256, root: Hash256, db: Arc<NodeDatabase>) -> Result<Self, TrieError> {
        let mut trie = Self {
            db,
            root: Node::Empty,
            owner,
            unhashed: 0,
            tracer: None,
        };
        if root != [0u8; 32] && root != EMPTY_ROOT {
            trie.root = trie.resolve_hash(&root, &[])?;
        }
        Ok(trie)
    }

    /// Creates an empty trie with a zero owner.
    #[must_use]
    pub fn new_empty(db: Arc<NodeDatabase>) -> Self {
        Self {
            db,
            root: Node::Empty,
            owner: [0u8; 32],
            unhashed: 0,
            tracer: None,
        }
    }

    /// Turns on state-diff tracing for this handle.
    pub fn enable_tracer(&mut self) {
        self.tracer = Some(Tracer::new());
    }

    /// Returns the tracer, if enabled.
    #[must_use]
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Returns the associated trie owner.
    #[must_use]
    pub fn owner(&self) -> Hash256 {
        self.owner
    }

    /// Returns a copy of the trie sharing the same store.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            db: self.db.clone(),
            root: self.root.clone(),
            owner: self.owner,
            unhashed: self.unhashed,
            tracer: self.tracer.clone(),
        }
    }

    /// Drops the referenced root node and clears all internal state.
    pub fn reset(&mut self) {
        self.root = Node::Empty;
        self.owner = [0u8; 32];
        self.unhashed = 0;
        if let Some(t) = self.tracer.as_mut() {
            t.reset();
        }
    }

    /// Returns the value for `key`, logging and swallowing store errors.
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "unhandled trie error in get");
                None
            }
        }
    }

    /// Returns the value for `key`, or `None` if the key is not present.
    ///
    /// Sub-tries resolved from the store along the way are written back into
    /// the in-memory graph so later reads stay cheap.
    pub fn try_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let hex = key_bytes_to_hex(key);
        let root = self.root.clone();
        let (value, newroot, did_resolve) = self.get_at(&root, &hex, 0)?;
        if did_resolve {
            self.root = newroot;
        }
        Ok(value)
    }

    fn get_at(
        &self,
        orig: &Node,
        key: &[u8],
        pos: usize,
    ) -> Result<(Option<Vec<u8>>, Node, bool), TrieError> {
        match orig {
            Node::Empty => Ok((None, Node::Empty, false)),
            Node::Value(v) => Ok((Some(v.clone()), orig.clone(), false)),
            Node::Short(n) => {
                if key.len() - pos < n.key.len() || n.key != key[pos..pos + n.key.len()] {
                    // key not found in trie
                    return Ok((None, orig.clone(), false));
                }
                let (value, newnode, did_resolve) =
                    self.get_at(&n.val, key, pos + n.key.len())?;
                if did_resolve {
                    let mut n = n.clone();
                    Arc::make_mut(&mut n).val = newnode;
                    return Ok((value, Node::Short(n), true));
                }
                Ok((value, orig.clone(), false))
            }
            Node::Full(n) => {
                let idx = key[pos] as usize;
                let (value, newnode, did_resolve) =
                    self.get_at(&n.children[idx], key, pos + 1)?;
                if did_resolve {
                    let mut n = n.clone();
                    Arc::make_mut(&mut n).children[idx] = newnode;
                    return Ok((value, Node::Full(n), true));
                }
                Ok((value, orig.clone(), false))
            }
            Node::Hash(hash) => {
                let child = self.resolve_hash(hash, &key[..pos])?;
                let (value, newnode, _) = self.get_at(&child, key, pos)?;
                Ok((value, newnode, true))
            }
        }
    }

    /// Retrieves a node blob by its compact-encoded path, together with the
    /// number of hash nodes resolved to reach it. The path addresses nodes,
    /// not values; a path that runs off the trie yields `None`.
    pub fn try_get_node(&mut self, path: &[u8]) -> Result<(Option<Vec<u8>>, usize), TrieError> {
        let hex = compact_to_hex(path);
        let root = self.root.clone();
        let (item, newroot, resolved) = self.get_node_at(&root, &hex, 0)?;
        if resolved > 0 {
            self.root = newroot;
        }
        Ok((item, resolved))
    }

    fn get_node_at(
        &self,
        orig: &Node,
        path: &[u8],
        pos: usize,
    ) -> Result<(Option<Vec<u8>>, Node, usize), TrieError> {
        // If we reached the requested path, return the current node.
        if pos >= path.len() {
            // The node in memory may be expanded; pull its blob from the
            // store by the cached hash rather than re-encoding it.
            let hash = match orig {
                Node::Empty => return Ok((None, Node::Empty, 0)),
                Node::Hash(hash) => *hash,
                n => match n.cache() {
                    (Some(hash), _) => hash,
                    (None, _) => return Err(TrieError::InvalidNode("non-consensus node")),
                },
            };
            let blob = self.db.node(&hash).map_err(|err| match err {
                DatabaseError::NotFound => TrieError::MissingNode {
                    owner: self.owner,
                    hash,
                    path: path[..pos].to_vec(),
                },
                other => TrieError::Database(other),
            })?;
            return Ok((Some(blob), orig.clone(), 1));
        }
        match orig {
            Node::Empty | Node::Value(_) => Ok((None, Node::Empty, 0)),
            Node::Short(n) => {
                if path.len() - pos < n.key.len() || n.key != path[pos..pos + n.key.len()] {
                    // path branches off from the short node
                    return Ok((None, orig.clone(), 0));
                }
                let (item, newnode, resolved) =
                    self.get_node_at(&n.val, path, pos + n.key.len())?;
                if resolved > 0 {
                    let mut n = n.clone();
                    Arc::make_mut(&mut n).val = newnode;
                    return Ok((item, Node::Short(n), resolved));
                }
                Ok((item, orig.clone(), 0))
            }
            Node::Full(n) => {
                let idx = path[pos] as usize;
                let (item, newnode, resolved) = self.get_node_at(&n.children[idx], path, pos + 1)?;
                if resolved > 0 {
                    let mut n = n.clone();
                    Arc::make_mut(&mut n).children[idx] = newnode;
                    return Ok((item, Node::Full(n), resolved));
                }
                Ok((item, orig.clone(), 0))
            }
            Node::Hash(hash) => {
                let child = self.resolve_hash(hash, &path[..pos])?;
                let (item, newnode, resolved) = self.get_node_at(&child, path, pos)?;
                Ok((item, newnode, resolved + 1))
            }
        }
    }

    /// Associates `key` with `value`, logging and swallowing store errors.
    pub fn update(&mut self, key: &[u8], value: &[u8]) {
        if let Err(err) = self.try_update(key, value) {
            warn!(error = %err, "unhandled trie error in update");
        }
    }

    /// Associates `key` with `value` in the trie. Subsequent `get` calls
    /// return `value`. An empty value deletes any existing entry.
    pub fn try_update(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        self.unhashed += 1;
        let hex = key_bytes_to_hex(key);
        if value.is_empty() {
            let (_, n) = self.delete_at(self.root.clone(), &[], &hex)?;
            self.root = n;
        } else {
            let (_, n) =
                self.insert_at(self.root.clone(), &[], &hex, Node::Value(value.to_vec()))?;
            self.root = n;
        }
        Ok(())
    }

    /// Removes any existing value for `key`, logging and swallowing store
    /// errors.
    pub fn delete(&mut self, key: &[u8]) {
        if let Err(err) = self.try_delete(key) {
            warn!(error = %err, "unhandled trie error in delete");
        }
    }

    /// Removes any existing value for `key`. Deleting an absent key is not
    /// an error.
    pub fn try_delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        self.unhashed += 1;
        let hex = key_bytes_to_hex(key);
        let (_, n) = self.delete_at(self.root.clone(), &[], &hex)?;
        self.root = n;
        Ok(())
    }

    /// Inserts `value` at `key` below `n`. `prefix` is the path consumed so
    /// far. Returns whether the sub-trie changed and its new root.
    fn insert_at(
        &mut self,
        n: Node,
        prefix: &[u8],
        key: &[u8],
        value: Node,
    ) -> Result<(bool, Node), TrieError> {
        if key.is_empty() {
            if let (Node::Value(old), Node::Value(new)) = (&n, &value) {
                return Ok((old != new, value));
            }
            return Ok((true, value));
        }
        match n {
            Node::Short(sn) => {
                let matchlen = prefix_len(key, &sn.key);
                // If the whole key matches, keep this short node as is and
                // only update the value.
                if matchlen == sn.key.len() {
                    let child_prefix = [prefix, &key[..matchlen]].concat();
                    let (dirty, nn) =
                        self.insert_at(sn.val.clone(), &child_prefix, &key[matchlen..], value)?;
                    if !dirty {
                        return Ok((false, Node::Short(sn)));
                    }
                    return Ok((
                        true,
                        Node::Short(Arc::new(ShortNode {
                            key: sn.key.clone(),
                            val: nn,
                            flags: NodeFlag::dirty(),
                        })),
                    ));
                }
                // Otherwise branch out at the index where they differ.
                let mut branch = FullNode {
                    children: FullNode::empty_children(),
                    flags: NodeFlag::dirty(),
                };
                let old_prefix = [prefix, &sn.key[..matchlen + 1]].concat();
                let (_, old_child) = self.insert_at(
                    Node::Empty,
                    &old_prefix,
                    &sn.key[matchlen + 1..],
                    sn.val.clone(),
                )?;
                branch.children[sn.key[matchlen] as usize] = old_child;

                let new_prefix = [prefix, &key[..matchlen + 1]].concat();
                let (_, new_child) =
                    self.insert_at(Node::Empty, &new_prefix, &key[matchlen + 1..], value)?;
                branch.children[key[matchlen] as usize] = new_child;

                let branch = Node::Full(Arc::new(branch));
                // Replace this short node with the branch if it occurs at
                // index 0.
                if matchlen == 0 {
                    return Ok((true, branch));
                }
                // Track the newly inserted branch node by its path from the
                // root.
                self.tracer_on_insert(&[prefix, &key[..matchlen]].concat());
                // Replace it with a short node leading up to the branch.
                Ok((
                    true,
                    Node::Short(Arc::new(ShortNode {
                        key: key[..matchlen].to_vec(),
                        val: branch,
                        flags: NodeFlag::dirty(),
                    })),
                ))
            }
            Node::Full(fnode) => {
                let idx = key[0] as usize;
                let child_prefix = [prefix, &key[..1]].concat();
                let (dirty, nn) = self.insert_at(
                    fnode.children[idx].clone(),
                    &child_prefix,
                    &key[1..],
                    value,
                )?;
                if !dirty {
                    return Ok((false, Node::Full(fnode)));
                }
                let mut fnode = fnode;
                let node = Arc::make_mut(&mut fnode);
                node.flags = NodeFlag::dirty();
                node.children[idx] = nn;
                Ok((true, Node::Full(fnode)))
            }
            Node::Empty => {
                // New short node; the value node is not tracked since it is
                // always embedded in its parent.
                self.tracer_on_insert(prefix);
                Ok((
                    true,
                    Node::Short(Arc::new(ShortNode {
                        key: key.to_vec(),
                        val: value,
                        flags: NodeFlag::dirty(),
                    })),
                ))
            }
            Node::Hash(hash) => {
                // This sub-trie is not loaded yet. Load the node and insert
                // into it, leaving all child nodes on the path in memory.
                let rn = self.resolve_hash(&hash, prefix)?;
                let (dirty, nn) = self.insert_at(rn.clone(), prefix, key, value)?;
                if !dirty {
                    return Ok((false, rn));
                }
                Ok((true, nn))
            }
            Node::Value(_) => Err(TrieError::InvalidNode("value node with remaining key")),
        }
    }

    /// Deletes `key` below `n`, simplifying nodes on the way up so the trie
    /// stays in minimal form.
    fn delete_at(
        &mut self,
        n: Node,
        prefix: &[u8],
        key: &[u8],
    ) -> Result<(bool, Node), TrieError> {
        match n {
            Node::Short(sn) => {
                let matchlen = prefix_len(key, &sn.key);
                if matchlen < sn.key.len() {
                    return Ok((false, Node::Short(sn))); // don't replace n on mismatch
                }
                if matchlen == key.len() {
                    // The matched short node is deleted entirely; its value
                    // node is always embedded and needs no tracking.
                    self.tracer_on_delete(prefix);
                    return Ok((true, Node::Empty));
                }
                // The key is longer than n.key. Remove the remaining suffix
                // from the sub-trie. The child can never be empty here since
                // it must contain at least two other values with keys longer
                // than n.key.
                let child_prefix = [prefix, &key[..sn.key.len()]].concat();
                let (dirty, child) =
                    self.delete_at(sn.val.clone(), &child_prefix, &key[sn.key.len()..])?;
                if !dirty {
                    return Ok((false, Node::Short(sn)));
                }
                match child {
                    Node::Short(csn) => {
                        // The child short node merges into its parent,
                        // concatenating the keys. This avoids creating a
                        // short node inside a short node.
                        self.tracer_on_delete(&[prefix, &sn.key[..]].concat());
                        let mut key = sn.key.clone();
                        key.extend_from_slice(&csn.key);
                        Ok((
                            true,
                            Node::Short(Arc::new(ShortNode {
                                key,
                                val: csn.val.clone(),
                                flags: NodeFlag::dirty(),
                            })),
                        ))
                    }
                    other => Ok((
                        true,
                        Node::Short(Arc::new(ShortNode {
                            key: sn.key.clone(),
                            val: other,
                            flags: NodeFlag::dirty(),
                        })),
                    )),
                }
            }
            Node::Full(fnode) => {
                let idx = key[0] as usize;
                let child_prefix = [prefix, &key[..1]].concat();
                let (dirty, nn) =
                    self.delete_at(fnode.children[idx].clone(), &child_prefix, &key[1..])?;
                if !dirty {
                    return Ok((false, Node::Full(fnode)));
                }
                let mut fnode = fnode;
                {
                    let node = Arc::make_mut(&mut fnode);
                    node.flags = NodeFlag::dirty();
                    node.children[idx] = nn;
                }
                // Because n is a full node, it must have contained at least
                // two children before the delete. If the new child is
                // non-empty, n still has at least two and cannot be reduced.
                if !fnode.children[idx].is_empty() {
                    return Ok((true, Node::Full(fnode)));
                }
                // Find the single remaining entry, if any: pos holds its
                // index, or -2 if at least two entries remain.
                let mut pos: i32 = -1;
                for (i, child) in fnode.children.iter().enumerate() {
                    if !child.is_empty() {
                        if pos == -1 {
                            pos = i as i32;
                        } else {
                            pos = -2;
                            break;
                        }
                    }
                }
                if pos >= 0 {
                    let pos = pos as usize;
                    if pos != 16 {
                        // If the remaining entry is a short node, it
                        // replaces n with the missing nibble tacked onto the
                        // front of its key. The entry might not be loaded
                        // yet, so resolve it just for this check.
                        let cnode = self.resolve(fnode.children[pos].clone(), prefix)?;
                        if let Node::Short(csn) = cnode {
                            // Replace the whole full node with the short
                            // node; the original is now embedded in the
                            // parent.
                            self.tracer_on_delete(&[prefix, &[pos as u8][..]].concat());
                            let mut key = vec![pos as u8];
                            key.extend_from_slice(&csn.key);
                            return Ok((
                                true,
                                Node::Short(Arc::new(ShortNode {
                                    key,
                                    val: csn.val.clone(),
                                    flags: NodeFlag::dirty(),
                                })),
                            ));
                        }
                    }
                    // Otherwise, n is replaced by a one-nibble short node
                    // containing the child.
                    return Ok((
                        true,
                        Node::Short(Arc::new(ShortNode {
                            key: vec![pos as u8],
                            val: fnode.children[pos].clone(),
                            flags: NodeFlag::dirty(),
                        })),
                    ));
                }
                // n still contains at least two values and cannot be reduced.
                Ok((true, Node::Full(fnode)))
            }
            Node::Value(_) => Ok((true, Node::Empty)),
            Node::Empty => Ok((false, Node::Empty)),
            Node::Hash(hash) => {
                // This sub-trie is not loaded yet. Load the node and delete
                // from it, leaving the path to the value in memory.
                let rn = self.resolve_hash(&hash, prefix)?;
                let (dirty, nn) = self.delete_at(rn.clone(), prefix, key)?;
                if !dirty {
                    return Ok((false, rn));
                }
                Ok((true, nn))
            }
        }
    }

    pub(crate) fn resolve(&self, n: Node, prefix: &[u8]) -> Result<Node, TrieError> {
        if let Node::Hash(hash) = n {
            return self.resolve_hash(&hash, prefix);
        }
        Ok(n)
    }

    pub(crate) fn resolve_hash(&self, hash: &Hash256, prefix: &[u8]) -> Result<Node, TrieError> {
        match self.db.node(hash) {
            Ok(blob) => decode_node(Some(*hash), &blob),
            Err(DatabaseError::NotFound) => Err(TrieError::MissingNode {
                owner: self.owner,
                hash: *hash,
                path: prefix.to_vec(),
            }),
            Err(err) => Err(TrieError::Database(err)),
        }
    }

    /// Returns the root hash of the trie. Computed nodes keep their hashes
    /// cached, so repeated calls are cheap. Does not write to the store.
    pub fn hash(&mut self) -> Hash256 {
        let (hashed, cached) = self.hash_root();
        self.root = cached;
        match hashed {
            Node::Hash(h) => h,
            // the root fold is forced, it always yields a hash
            _ => unreachable!("forced root hash did not collapse"),
        }
    }

    fn hash_root(&mut self) -> (Node, Node) {
        if self.root.is_empty() {
            return (Node::Hash(EMPTY_ROOT), Node::Empty);
        }
        // Below the threshold one thread handles the whole fold.
        let mut hasher = Hasher::acquire(self.unhashed >= PARALLEL_THRESHOLD);
        let (hashed, cached) = hasher.hash(&self.root, true);
        hasher.release();
        self.unhashed = 0;
        (hashed, cached)
    }

    /// Writes all dirty nodes to the trie's node store, invoking `on_leaf`
    /// for every stored value. Returns the root hash and the number of
    /// nodes written. Committing an unchanged trie writes nothing.
    ///
    /// After a successful commit the handle holds only the root hash;
    /// sub-tries are reloaded from the store on demand. If the commit fails
    /// mid-walk the in-memory trie is left mutated but nothing is persisted,
    /// and the handle should be discarded.
    pub fn commit(
        &mut self,
        on_leaf: Option<LeafCallback<'_>>,
    ) -> Result<(Hash256, usize), TrieError> {
        let result = self.commit_inner(on_leaf);
        if let Some(t) = self.tracer.as_mut() {
            t.reset();
        }
        result
    }

    fn commit_inner(
        &mut self,
        on_leaf: Option<LeafCallback<'_>>,
    ) -> Result<(Hash256, usize), TrieError> {
        if self.root.is_empty() {
            return Ok((EMPTY_ROOT, 0));
        }
        // Derive the hashes of all dirty nodes first; the commit walk below
        // assumes every node carries its hash.
        let root_hash = self.hash();

        // Quick check whether there is anything to commit at all: a trie
        // only read from, never written, stays clean.
        let (hashed, dirty) = self.root.cache();
        if hashed.is_some() && !dirty {
            self.root = Node::Hash(root_hash);
            return Ok((root_hash, 0));
        }
        let mut committer = Committer::new(on_leaf);
        let new_root = committer.commit(&mut Vec::new(), &self.root)?;
        let written = committer.finish(&self.db)?;
        self.root = new_root;
        Ok((root_hash, written))
    }

    fn tracer_on_insert(&mut self, path: &[u8]) {
        if let Some(t) = self.tracer.as_mut() {
            t.on_insert(path);
        }
    }

    fn tracer_on_delete(&mut self, path: &[u8]) {
        if let Some(t) = self.tracer.as_mut() {
            t.on_delete(path);
        }
    }
}
