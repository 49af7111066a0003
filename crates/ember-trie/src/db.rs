//! Content-addressed node storage.
//!
//! [`NodeDatabase`] sits between the trie and the raw key-value backend: it
//! reads RLP-encoded node bodies by their Keccak-256 hash and layers an LRU
//! cache of clean nodes over the disk store. The empty-root sentinel is
//! never persisted or looked up.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use ember_db::{Database, DatabaseError};

use crate::Hash256;

/// Default number of clean node encodings kept in memory.
const CLEAN_CACHE_ENTRIES: usize = 64 * 1024;

/// A node store backed by a [`Database`], with an in-memory clean cache.
pub struct NodeDatabase {
    disk: Arc<dyn Database>,
    cleans: Mutex<LruCache<Hash256, Vec<u8>>>,
}

impl std::fmt::Debug for NodeDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDatabase").finish_non_exhaustive()
    }
}

impl NodeDatabase {
    /// Creates a node database over `disk` with the default cache size.
    #[must_use]
    pub fn new(disk: Arc<dyn Database>) -> Self {
        Self::with_cache_capacity(disk, CLEAN_CACHE_ENTRIES)
    }

    /// Creates a node database with room for `capacity` cached nodes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_cache_capacity(disk: Arc<dyn Database>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        Self {
            disk,
            cleans: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Reads the encoded node with the given hash.
    ///
    /// An absent node is reported as [`DatabaseError::NotFound`], distinct
    /// from backend failure.
    pub fn node(&self, hash: &Hash256) -> Result<Vec<u8>, DatabaseError> {
        if let Some(enc) = self.cleans.lock().get(hash) {
            return Ok(enc.clone());
        }
        match self.disk.get(hash)? {
            Some(enc) => {
                self.cleans.lock().put(*hash, enc.clone());
                Ok(enc)
            }
            None => Err(DatabaseError::NotFound),
        }
    }

    /// Returns whether the store holds a node with the given hash.
    pub fn contains(&self, hash: &Hash256) -> Result<bool, DatabaseError> {
        if self.cleans.lock().contains(hash) {
            return Ok(true);
        }
        self.disk.has(hash)
    }

    /// Writes a set of freshly committed nodes in one atomic batch and
    /// admits them to the clean cache.
    pub(crate) fn insert_batch(
        &self,
        nodes: &[(Hash256, Vec<u8>)],
    ) -> Result<(), DatabaseError> {
        let mut batch = self.disk.new_batch();
        for (hash, enc) in nodes {
            batch.put(hash, enc)?;
        }
        batch.write()?;

        let mut cleans = self.cleans.lock();
        for (hash, enc) in nodes {
            cleans.put(*hash, enc.clone());
        }
        Ok(())
    }

    /// Returns the underlying disk database.
    #[must_use]
    pub fn disk(&self) -> &Arc<dyn Database> {
        &self.disk
    }
}
