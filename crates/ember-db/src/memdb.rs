//! In-memory database implementation.
//!
//! A simple key-value store backed by a `BTreeMap`, useful for tests,
//! ephemeral tries and as a proof container.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    Batch, Batcher, Database, DatabaseError, KeyValueDeleter, KeyValueReader, KeyValueWriter,
    Result,
};

/// An in-memory key-value database.
///
/// Thread-safe via `RwLock`. All values are cloned on read and write.
#[derive(Debug, Default)]
pub struct MemDb {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl MemDb {
    /// Creates a new empty in-memory database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns whether the database holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DatabaseError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KeyValueReader for MemDb {
    fn has(&self, key: &[u8]) -> Result<bool> {
        self.check_closed()?;
        Ok(self.data.read().contains_key(key))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.data.read().get(key).cloned())
    }
}

impl KeyValueWriter for MemDb {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

impl KeyValueDeleter for MemDb {
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.data.write().remove(key);
        Ok(())
    }
}

impl Batcher for MemDb {
    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(MemBatch::new(self.data.clone(), self.closed.clone()))
    }
}

impl Database for MemDb {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A batch of operations for [`MemDb`], applied atomically on
/// [`Batch::write`].
#[derive(Debug)]
pub struct MemBatch {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    ops: RwLock<Vec<BatchOp>>,
    size: RwLock<usize>,
    written: AtomicBool,
}

impl MemBatch {
    fn new(data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>, closed: Arc<AtomicBool>) -> Self {
        Self {
            data,
            closed,
            ops: RwLock::new(Vec::new()),
            size: RwLock::new(0),
            written: AtomicBool::new(false),
        }
    }
}

impl KeyValueWriter for MemBatch {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ops.write().push(BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        *self.size.write() += key.len() + value.len();
        Ok(())
    }
}

impl KeyValueDeleter for MemBatch {
    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ops.write().push(BatchOp::Delete { key: key.to_vec() });
        *self.size.write() += key.len();
        Ok(())
    }
}

impl Batch for MemBatch {
    fn size(&self) -> usize {
        *self.size.read()
    }

    fn write(&mut self) -> Result<()> {
        if self.written.load(Ordering::Acquire) {
            return Err(DatabaseError::BatchAlreadyWritten);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed);
        }

        let ops = self.ops.read();
        let mut data = self.data.write();
        for op in ops.iter() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        self.written.store(true, Ordering::Release);
        Ok(())
    }

    fn reset(&mut self) {
        self.ops.write().clear();
        *self.size.write() = 0;
        self.written.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let db = MemDb::new();

        db.put(b"key1", b"value1").unwrap();
        db.put(b"key2", b"value2").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get(b"key3").unwrap(), None);
        assert_eq!(db.len(), 2);

        db.delete(b"key1").unwrap();
        assert!(!db.has(b"key1").unwrap());
        db.delete(b"nonexistent").unwrap();
    }

    #[test]
    fn test_close() {
        let db = MemDb::new();
        db.put(b"key", b"value").unwrap();

        db.close().unwrap();
        assert!(db.is_closed());

        assert!(matches!(db.get(b"key"), Err(DatabaseError::Closed)));
        assert!(matches!(db.put(b"key", b"v"), Err(DatabaseError::Closed)));
    }

    #[test]
    fn test_batch_atomicity() {
        let db = MemDb::new();

        let mut batch = db.new_batch();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        assert!(batch.size() > 0);

        // nothing lands until write
        assert!(!db.has(b"a").unwrap());
        batch.write().unwrap();
        assert!(db.has(b"a").unwrap());
        assert!(db.has(b"b").unwrap());

        // double write is refused
        assert!(matches!(
            batch.write(),
            Err(DatabaseError::BatchAlreadyWritten)
        ));

        batch.reset();
        batch.write().unwrap();
    }
}
