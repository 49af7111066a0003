//! Ember database abstraction layer.
//!
//! This crate defines the key-value store boundary the state core is written
//! against. The trie reads and writes opaque byte blobs keyed by 32-byte
//! hashes; everything it needs from a backend is captured by a handful of
//! narrow traits that compose into [`Database`].
//!
//! # Example
//!
//! ```
//! use ember_db::{KeyValueReader, KeyValueWriter, MemDb};
//!
//! let db = MemDb::new();
//! db.put(b"key", b"value").unwrap();
//! assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

mod error;
mod memdb;

pub use error::{DatabaseError, Result};
pub use memdb::{MemBatch, MemDb};

/// A key-value reader.
pub trait KeyValueReader: Send + Sync {
    /// Returns whether the key exists in the database.
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// Gets the value for the given key.
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// A key-value writer.
pub trait KeyValueWriter: Send + Sync {
    /// Sets the value for the given key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

/// A key-value deleter.
pub trait KeyValueDeleter: Send + Sync {
    /// Deletes the value for the given key.
    fn delete(&self, key: &[u8]) -> Result<()>;
}

/// Batch creation interface.
pub trait Batcher: Send + Sync {
    /// Creates a new batch for atomic writes.
    fn new_batch(&self) -> Box<dyn Batch>;
}

/// A batch of write operations applied atomically by [`Batch::write`].
pub trait Batch: KeyValueWriter + KeyValueDeleter + Send + Sync {
    /// Returns the size of the batch in bytes.
    fn size(&self) -> usize;

    /// Writes the batch to the database.
    fn write(&mut self) -> Result<()>;

    /// Resets the batch for reuse.
    fn reset(&mut self);
}

/// The full database interface.
pub trait Database:
    KeyValueReader + KeyValueWriter + KeyValueDeleter + Batcher
{
    /// Closes the database.
    fn close(&self) -> Result<()>;

    /// Returns whether the database is closed.
    fn is_closed(&self) -> bool;
}
