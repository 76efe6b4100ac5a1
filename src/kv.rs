//! Opaque byte-keyed persistent store abstraction
//!
//! The engine only ever sees an ordered byte-key get/put/delete surface; the
//! on-disk format behind it is somebody else's problem. `MemoryKv` is the
//! in-process implementation used by tests and embedders that do not need
//! durability.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Well-known key holding the 32-byte latest committed root hash.
pub const ROOT_KEY: &[u8] = b"stateRoot";

/// Failure reported by the underlying store.
///
/// Commit/flush paths translate this into `VmError::PersistentStore`, which is
/// fatal for the enclosing operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct KvError(pub String);

/// Result type for store operations.
pub type KvResult<T> = std::result::Result<T, KvError>;

/// Ordered byte-key get/put/delete over durable storage.
pub trait KeyValueStore {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Remove `key` if present.
    fn delete(&mut self, key: &[u8]) -> KvResult<()>;
}

/// In-memory ordered store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Cloneable handle over one shared `MemoryKv`.
///
/// Lets a caller keep a handle to the store after handing it to the engine,
/// e.g. to reopen state at a committed root.
#[derive(Debug, Clone, Default)]
pub struct SharedKv {
    inner: Arc<Mutex<MemoryKv>>,
}

impl SharedKv {
    /// Create an empty shared store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for SharedKv {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.inner
            .lock()
            .map_err(|e| KvError(e.to_string()))?
            .get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.inner
            .lock()
            .map_err(|e| KvError(e.to_string()))?
            .put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.inner
            .lock()
            .map_err(|e| KvError(e.to_string()))?
            .delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mut kv = MemoryKv::new();
        assert_eq!(kv.get(b"a").unwrap(), None);

        kv.put(b"a", b"1").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));

        kv.put(b"a", b"2").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"2".to_vec()));

        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_root_key_roundtrip() {
        let mut kv = MemoryKv::new();
        let root = [0xab; 32];
        kv.put(ROOT_KEY, &root).unwrap();
        assert_eq!(kv.get(ROOT_KEY).unwrap(), Some(root.to_vec()));
    }

    #[test]
    fn test_shared_handles_see_each_other() {
        let mut a = SharedKv::new();
        let b = a.clone();
        a.put(b"k", b"v").unwrap();
        assert_eq!(b.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
