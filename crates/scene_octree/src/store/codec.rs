//! JSON encoding of stored values.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KvStore, Partition};
use crate::error::StoreError;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
  Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
  Ok(serde_json::from_slice(bytes)?)
}

/// Read and decode `key`, `None` if absent.
pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, partition: Partition, key: &str) -> Result<Option<T>, StoreError> {
  store.get(partition, key)?.map(|bytes| decode(&bytes)).transpose()
}

/// Encode and write `value` under `key`.
pub fn put_json<T: Serialize + ?Sized>(
  store: &dyn KvStore,
  partition: Partition,
  key: &str,
  value: &T,
) -> Result<(), StoreError> {
  store.put(partition, key, encode(value)?)
}
