//! Trie error types.

use thiserror::Error;

use crate::Hash256;

/// Errors that can occur during trie operations.
///
/// Codec failures, schema violations, store failures and absent nodes are
/// kept distinct; all of them propagate to the caller unchanged, the trie
/// never retries I/O itself.
#[derive(Debug, Error)]
pub enum TrieError {
    /// A hash-referenced node required for the operation was not present in
    /// the store. Carries the trie owner, the missing hash and the nibble
    /// path at which it was needed.
    #[error(
        "missing trie node {} (owner {}) (path {})",
        hex::encode(.hash),
        hex::encode(.owner),
        hex::encode(.path)
    )]
    MissingNode {
        owner: Hash256,
        hash: Hash256,
        path: Vec<u8>,
    },

    /// A node blob failed to decode as RLP.
    #[error("decoding node: {0}")]
    Decode(#[from] ember_rlp::DecodeError),

    /// A node blob decoded as RLP but does not have the shape of any node
    /// variant.
    #[error("invalid node: {0}")]
    InvalidNode(&'static str),

    /// The underlying store failed.
    #[error(transparent)]
    Database(#[from] ember_db::DatabaseError),

    /// A proof node referenced during verification is not in the proof set.
    #[error("proof node {} missing", hex::encode(.hash))]
    MissingProofNode { hash: Hash256 },

    /// The leaf callback aborted the commit.
    #[error("leaf callback: {0}")]
    LeafCallback(String),
}
