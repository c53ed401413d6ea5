//! Capped LRU cache of evicted meshes.
//!
//! Re-entering a band is served from here before going back to the store.

use std::collections::HashMap;
use std::sync::Arc;

use crate::batch::BatchedMesh;
use crate::types::NodeId;

/// Default number of cached meshes.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

pub struct MeshCache {
  entries: HashMap<NodeId, Arc<BatchedMesh>>,
  /// Front = least recently used.
  order: Vec<NodeId>,
  capacity: usize,
}

impl MeshCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: HashMap::with_capacity(capacity),
      order: Vec::with_capacity(capacity),
      capacity,
    }
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, node: NodeId) -> bool {
    self.entries.contains_key(&node)
  }

  fn touch(&mut self, node: NodeId) {
    if let Some(pos) = self.order.iter().position(|&n| n == node) {
      self.order.remove(pos);
      self.order.push(node);
    }
  }

  /// Look up `node`, marking it most recently used.
  pub fn get(&mut self, node: NodeId) -> Option<Arc<BatchedMesh>> {
    let mesh = self.entries.get(&node).cloned()?;
    self.touch(node);
    Some(mesh)
  }

  /// Remove and return `node`.
  pub fn take(&mut self, node: NodeId) -> Option<Arc<BatchedMesh>> {
    let mesh = self.entries.remove(&node)?;
    if let Some(pos) = self.order.iter().position(|&n| n == node) {
      self.order.remove(pos);
    }
    Some(mesh)
  }

  /// Insert `mesh`, returning the node evicted to make room.
  ///
  /// A zero-capacity cache stores nothing.
  pub fn insert(&mut self, node: NodeId, mesh: Arc<BatchedMesh>) -> Option<NodeId> {
    if self.capacity == 0 {
      return None;
    }
    if self.entries.insert(node, mesh).is_some() {
      self.touch(node);
      return None;
    }

    self.order.push(node);
    if self.entries.len() > self.capacity {
      let oldest = self.order.remove(0);
      self.entries.remove(&oldest);
      return Some(oldest);
    }
    None
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.order.clear();
  }
}

impl Default for MeshCache {
  fn default() -> Self {
    Self::new(DEFAULT_CACHE_CAPACITY)
  }
}
