//! Merkle Patricia Trie implementation for Ember.
//!
//! The trie is the canonical state representation of the ledger: an
//! authenticated, persistent, radix-16 key-value map in which every node is
//! identified by the Keccak-256 hash of its RLP encoding. Two tries holding
//! the same entries have the same root hash regardless of how they were
//! built, and a root hash plus a handful of nodes proves the presence or
//! absence of any key.
//!
//! A [`Trie`] is created over a [`NodeDatabase`] and mutated through
//! [`Trie::try_update`]/[`Trie::try_delete`]. [`Trie::hash`] folds the live
//! node graph into its content-addressed form; [`Trie::commit`] additionally
//! persists every dirty node and leaves the handle holding only the root
//! hash. Sub-tries not touched since the trie was opened stay in the store
//! and are loaded on demand.
//!
//! A single trie handle is not safe for concurrent mutation; all mutating
//! operations take `&mut self`.

mod committer;
mod db;
mod encoding;
mod error;
mod hasher;
mod node;
mod proof;
mod tracer;
mod trie;

pub use db::NodeDatabase;
pub use error::TrieError;
pub use proof::verify_proof;
pub use tracer::Tracer;
pub use trie::{LeafCallback, Trie};

use sha3::{Digest, Keccak256};

/// A 32-byte Keccak-256 hash.
pub type Hash256 = [u8; 32];

/// Hashes `data` with Keccak-256.
#[must_use]
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The root hash of an empty trie: the Keccak-256 of the empty RLP string.
pub const EMPTY_ROOT: Hash256 = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256() {
        let hash = keccak256(b"hello");
        assert_eq!(hash.len(), 32);
        assert_ne!(hash, keccak256(b"world"));
    }

    #[test]
    fn test_empty_root() {
        // the empty RLP string is 0x80
        assert_eq!(keccak256(&[0x80]), EMPTY_ROOT);
    }
}
