use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{ContentHash, StorageBackend};
use crate::error::Result;

/// Process-local backend.
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<ContentHash, Arc<[u8]>>>,
}

impl MemoryBackend {
    /// Number of distinct records held.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(hash.clone())
            .or_insert_with(|| Arc::from(bytes));
        Ok(())
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(hash).map(|bytes| bytes.to_vec()))
    }

    fn contains(&self, hash: &ContentHash) -> Result<bool> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.contains_key(hash))
    }
}
