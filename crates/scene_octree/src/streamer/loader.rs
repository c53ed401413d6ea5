//! Background mesh reads.
//!
//! Each request runs on rayon's pool and answers over a shared channel.
//! The in-flight set guarantees a node is never fetched twice at once.
//! There is no cancellation: a result for a node nobody wants any more is
//! still delivered and the streamer decides what to do with it.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{self as channel, Receiver, Sender};

use crate::batch::BatchedMesh;
use crate::error::StoreError;
use crate::store::{get_json, node_key, KvStore, Partition};
use crate::types::NodeId;

/// Finished read of one node's mesh.
#[derive(Debug)]
pub struct LoadResult {
  pub node: NodeId,
  /// `Ok(None)` when the node has no persisted mesh.
  pub outcome: Result<Option<BatchedMesh>, StoreError>,
}

pub struct MeshLoader {
  store: Arc<dyn KvStore>,
  sender: Sender<LoadResult>,
  receiver: Receiver<LoadResult>,
  in_flight: HashSet<NodeId>,
}

impl MeshLoader {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    let (sender, receiver) = channel::unbounded();
    Self {
      store,
      sender,
      receiver,
      in_flight: HashSet::new(),
    }
  }

  #[inline]
  pub fn store(&self) -> &Arc<dyn KvStore> {
    &self.store
  }

  #[inline]
  pub fn is_loading(&self, node: NodeId) -> bool {
    self.in_flight.contains(&node)
  }

  #[inline]
  pub fn in_flight(&self) -> usize {
    self.in_flight.len()
  }

  /// Start reading `node`. Returns `false` if it is already in flight.
  pub fn request(&mut self, node: NodeId) -> bool {
    if !self.in_flight.insert(node) {
      return false;
    }

    let store = Arc::clone(&self.store);
    let sender = self.sender.clone();
    rayon::spawn(move || {
      let outcome = get_json::<BatchedMesh>(store.as_ref(), Partition::BatchedMeshes, &node_key(node));
      // Loader dropped = streamer gone
      let _ = sender.send(LoadResult { node, outcome });
    });
    true
  }

  /// Collect every finished read (non-blocking).
  pub fn poll(&mut self) -> Vec<LoadResult> {
    let results: Vec<LoadResult> = self.receiver.try_iter().collect();
    for result in &results {
      self.in_flight.remove(&result.node);
    }
    results
  }
}
