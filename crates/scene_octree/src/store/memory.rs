//! In-process store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{KvStore, Partition};
use crate::error::StoreError;

/// Store backed by per-partition maps behind a `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
  partitions: RwLock<HashMap<Partition, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of entries in `partition`.
  pub fn len(&self, partition: Partition) -> Result<usize, StoreError> {
    let partitions = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
    Ok(partitions.get(&partition).map_or(0, BTreeMap::len))
  }
}

impl KvStore for MemoryStore {
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let partitions = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
    Ok(partitions.get(&partition).and_then(|p| p.get(key)).cloned())
  }

  fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
    let mut partitions = self.partitions.write().map_err(|_| StoreError::LockPoisoned)?;
    partitions.entry(partition).or_default().insert(key.to_string(), value);
    Ok(())
  }

  fn put_batch(&self, partition: Partition, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError> {
    // One write lock for the whole batch
    let mut partitions = self.partitions.write().map_err(|_| StoreError::LockPoisoned)?;
    partitions.entry(partition).or_default().extend(entries);
    Ok(())
  }

  fn keys(&self, partition: Partition) -> Result<Vec<String>, StoreError> {
    let partitions = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
    Ok(partitions.get(&partition).map(|p| p.keys().cloned().collect()).unwrap_or_default())
  }

  fn delete(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
    let mut partitions = self.partitions.write().map_err(|_| StoreError::LockPoisoned)?;
    Ok(partitions.get_mut(&partition).and_then(|p| p.remove(key)).is_some())
  }
}
