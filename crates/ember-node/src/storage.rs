use ember_consensus::{HeaderStorage, StorageError};
use ember_primitives::block::BlockHeader;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory header store, enough to bootstrap a node and serve tests.
/// Persistent chain storage lives outside this bundle.
#[derive(Debug, Default)]
pub struct MemoryHeaderStorage {
    headers: RwLock<BTreeMap<u64, BlockHeader>>,
}

impl MemoryHeaderStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_genesis(genesis: BlockHeader) -> Self {
        let storage = Self::new();
        storage.insert(genesis);
        storage
    }

    pub fn insert(&self, header: BlockHeader) {
        self.headers
            .write()
            .expect("header lock poisoned")
            .insert(header.height, header);
    }

    pub fn latest_height(&self) -> Option<u64> {
        self.headers
            .read()
            .expect("header lock poisoned")
            .keys()
            .next_back()
            .copied()
    }
}

impl HeaderStorage for MemoryHeaderStorage {
    fn header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, StorageError> {
        let headers = self
            .headers
            .read()
            .map_err(|_| StorageError::Unavailable("header lock poisoned".to_string()))?;
        Ok(headers.get(&height).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chainspec::genesis_header;

    #[test]
    fn test_lookup_and_latest() {
        let storage = MemoryHeaderStorage::with_genesis(genesis_header(1_700_000_000));
        assert!(storage.header_by_height(0).unwrap().is_some());
        assert!(storage.header_by_height(1).unwrap().is_none());
        assert_eq!(storage.latest_height(), Some(0));

        let mut next = genesis_header(1_700_000_010);
        next.height = 1;
        storage.insert(next);
        assert_eq!(storage.latest_height(), Some(1));
    }

    #[test]
    fn test_empty_storage() {
        let storage = MemoryHeaderStorage::new();
        assert!(storage.header_by_height(0).unwrap().is_none());
        assert_eq!(storage.latest_height(), None);
    }
}
