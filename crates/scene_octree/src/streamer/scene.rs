//! Scene runtime interface the streamer drives.

use std::collections::HashMap;

use crate::batch::BatchedMesh;
use crate::types::NodeId;

/// Opaque handle to a mesh instantiated in the scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

/// Rendering scene the streamer writes to.
///
/// Called only from the thread that ticks the streamer.
pub trait SceneRuntime {
  /// Create a scene object for `mesh`. New objects start hidden.
  fn instantiate(&mut self, mesh: &BatchedMesh) -> SceneHandle;

  fn set_visible(&mut self, handle: SceneHandle, visible: bool);

  fn dispose(&mut self, handle: SceneHandle);
}

/// Scene object tracked by [`HeadlessScene`].
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessObject {
  pub node: NodeId,
  pub visible: bool,
  pub vertex_count: usize,
}

/// Scene runtime with no renderer, for tools and tests.
#[derive(Default)]
pub struct HeadlessScene {
  objects: HashMap<SceneHandle, HeadlessObject>,
  next_handle: u64,
  disposed: usize,
}

impl HeadlessScene {
  pub fn new() -> Self {
    Self::default()
  }

  /// Live scene objects.
  pub fn len(&self) -> usize {
    self.objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  pub fn get(&self, handle: SceneHandle) -> Option<&HeadlessObject> {
    self.objects.get(&handle)
  }

  /// Nodes whose objects are visible, sorted.
  pub fn visible_nodes(&self) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = self.objects.values().filter(|o| o.visible).map(|o| o.node).collect();
    nodes.sort();
    nodes
  }

  /// Number of objects disposed so far.
  pub fn disposed(&self) -> usize {
    self.disposed
  }
}

impl SceneRuntime for HeadlessScene {
  fn instantiate(&mut self, mesh: &BatchedMesh) -> SceneHandle {
    self.next_handle += 1;
    let handle = SceneHandle(self.next_handle);
    self.objects.insert(
      handle,
      HeadlessObject {
        node: mesh.node_id,
        visible: false,
        vertex_count: mesh.vertex_count(),
      },
    );
    handle
  }

  fn set_visible(&mut self, handle: SceneHandle, visible: bool) {
    if let Some(object) = self.objects.get_mut(&handle) {
      object.visible = visible;
    }
  }

  fn dispose(&mut self, handle: SceneHandle) {
    if self.objects.remove(&handle).is_some() {
      self.disposed += 1;
    }
  }
}
