//! Persistence: a partitioned key-value store.
//!
//! # Partitions
//!
//! | Partition       | Key                | Value                     |
//! |-----------------|--------------------|---------------------------|
//! | `Items`         | item id            | [`StoredItem`]            |
//! | `Tree`          | [`TREE_KEY`]       | [`SpatialTree`]           |
//! | `Placements`    | [`PLACEMENTS_KEY`] | `Vec<Placement>`          |
//! | `BatchedMeshes` | node id            | [`BatchedMesh`]           |
//!
//! Values are JSON (see [`codec`]).
//!
//! [`StoredItem`]: crate::types::StoredItem
//! [`SpatialTree`]: crate::octree::SpatialTree
//! [`BatchedMesh`]: crate::batch::BatchedMesh

pub mod codec;
pub mod file;
pub mod memory;

use std::fmt;

use crate::error::StoreError;
use crate::types::{ItemId, NodeId};

pub use codec::{decode, encode, get_json, put_json};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Key of the single tree entry.
pub const TREE_KEY: &str = "tree";
/// Key of the single placements entry.
pub const PLACEMENTS_KEY: &str = "placements";

/// Named partition of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
  Items,
  Tree,
  Placements,
  BatchedMeshes,
}

impl Partition {
  pub const ALL: [Partition; 4] = [
    Partition::Items,
    Partition::Tree,
    Partition::Placements,
    Partition::BatchedMeshes,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Partition::Items => "items",
      Partition::Tree => "tree",
      Partition::Placements => "placements",
      Partition::BatchedMeshes => "batched_meshes",
    }
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Key of an item in [`Partition::Items`].
pub fn item_key(id: ItemId) -> String {
  id.0.to_string()
}

/// Key of a node's mesh in [`Partition::BatchedMeshes`].
pub fn node_key(id: NodeId) -> String {
  id.0.to_string()
}

/// Inverse of [`node_key`].
pub fn parse_node_key(key: &str) -> Option<NodeId> {
  key.parse().ok().map(NodeId)
}

/// Partitioned key-value store.
///
/// Implementations are shared between the ingestion thread and the
/// streamer's loader tasks.
pub trait KvStore: Send + Sync {
  /// Value under `key`, or `None` if absent.
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

  /// Write every entry or none of them. A repeated key keeps its last value.
  fn put_batch(&self, partition: Partition, entries: Vec<(String, Vec<u8>)>) -> Result<(), StoreError>;

  /// All keys of a partition, sorted.
  fn keys(&self, partition: Partition) -> Result<Vec<String>, StoreError>;

  /// Remove `key`. Returns whether it existed.
  fn delete(&self, partition: Partition, key: &str) -> Result<bool, StoreError>;
}
