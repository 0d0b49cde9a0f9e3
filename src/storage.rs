//! In-memory key-value storage.
//!
//! A plain mapping from byte-string keys to byte-string values with point
//! lookups, insert-or-overwrite and delete. The store is owned by the event
//! loop and only ever touched from its thread, so it carries no locking.

use std::collections::HashMap;
use tracing::{info, trace};

/// Result of a storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    /// New key inserted
    Stored,
    /// Existing key overwritten
    Replaced,
    /// Key removed
    Deleted,
    /// Key was not present
    NotFound,
}

/// Snapshot of storage usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub item_count: usize,
    /// Sum of key and value lengths
    pub bytes_used: usize,
}

/// Single-owner in-memory store
#[derive(Debug, Default)]
pub struct Storage {
    data: HashMap<Vec<u8>, Vec<u8>>,
    bytes_used: usize,
}

impl Storage {
    /// Create an empty store
    pub fn new() -> Self {
        info!("Initializing storage");
        Self::default()
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Insert a key, overwriting any previous value
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> StorageResult {
        self.bytes_used += key.len() + value.len();

        let result = match self.data.insert(key.to_vec(), value.to_vec()) {
            Some(old) => {
                self.bytes_used -= key.len() + old.len();
                StorageResult::Replaced
            }
            None => StorageResult::Stored,
        };

        trace!(
            key_len = key.len(),
            value_len = value.len(),
            bytes_used = self.bytes_used,
            "Stored item"
        );
        result
    }

    /// Remove a key if present
    pub fn delete(&mut self, key: &[u8]) -> StorageResult {
        match self.data.remove(key) {
            Some(old) => {
                self.bytes_used -= key.len() + old.len();
                trace!(key_len = key.len(), "Deleted item");
                StorageResult::Deleted
            }
            None => StorageResult::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            item_count: self.data.len(),
            bytes_used: self.bytes_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut storage = Storage::new();
        assert_eq!(storage.set(b"key", b"value"), StorageResult::Stored);
        assert_eq!(storage.get(b"key"), Some(&b"value"[..]));
        assert_eq!(storage.get(b"missing"), None);
    }

    #[test]
    fn test_overwrite() {
        let mut storage = Storage::new();
        storage.set(b"key", b"first");
        assert_eq!(storage.set(b"key", b"second value"), StorageResult::Replaced);
        assert_eq!(storage.get(b"key"), Some(&b"second value"[..]));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.stats().bytes_used, 3 + 12);
    }

    #[test]
    fn test_delete() {
        let mut storage = Storage::new();
        storage.set(b"key", b"value");
        assert_eq!(storage.delete(b"key"), StorageResult::Deleted);
        assert_eq!(storage.delete(b"key"), StorageResult::NotFound);
        assert!(storage.get(b"key").is_none());
        assert!(storage.is_empty());
        assert_eq!(storage.stats().bytes_used, 0);
    }

    #[test]
    fn test_binary_keys() {
        let mut storage = Storage::new();
        storage.set(&[0, 159, 146, 150], &[0xff, 0x00]);
        assert_eq!(storage.get(&[0, 159, 146, 150]), Some(&[0xff, 0x00][..]));
        assert_eq!(
            storage.stats(),
            StorageStats {
                item_count: 1,
                bytes_used: 6
            }
        );
    }
}
