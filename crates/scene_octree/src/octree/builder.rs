//! Construction of the complete octree from item centers.
//!
//! Every node above `max_depth` is subdivided into all eight octants whether
//! or not it holds items, so the result always has
//! [`complete_node_count`](super::complete_node_count) nodes and node ids are
//! stable for a given depth.

use glam::Vec3;

use super::{Aabb3, SpatialNode, SpatialTree};
use crate::types::{ContentItem, ItemId, NodeId};

/// Mutable state threaded through one build.
///
/// Owns the id counter and the node arena so concurrent builds never share
/// bookkeeping.
struct BuildContext {
  next_id: u32,
  nodes: Vec<SpatialNode>,
  max_depth: u8,
}

impl BuildContext {
  fn new(max_depth: u8) -> Self {
    Self {
      next_id: NodeId::ROOT.0,
      nodes: Vec::with_capacity(super::complete_node_count(max_depth)),
      max_depth,
    }
  }

  fn alloc(&mut self, depth: u8, bounds: Aabb3, parent: Option<NodeId>) -> NodeId {
    let id = NodeId(self.next_id);
    self.next_id += 1;
    self.nodes.push(SpatialNode::new(id, depth, bounds, parent));
    id
  }

  fn build_node(
    &mut self,
    bounds: Aabb3,
    depth: u8,
    parent: Option<NodeId>,
    items: Vec<(ItemId, Vec3)>,
  ) -> NodeId {
    let id = self.alloc(depth, bounds, parent);
    self.nodes[id.index()].item_ids = items.iter().map(|(item, _)| *item).collect();

    if depth < self.max_depth {
      let mut octants: [Vec<(ItemId, Vec3)>; 8] = Default::default();
      for (item, center) in items {
        octants[bounds.octant_of(center) as usize].push((item, center));
      }

      for (octant, bucket) in octants.into_iter().enumerate() {
        let child = self.build_node(bounds.octant_bounds(octant as u8), depth + 1, Some(id), bucket);
        self.nodes[id.index()].children.push(child);
      }
    }

    id
  }
}

/// Build a complete octree of `max_depth` over `bounds`.
///
/// Each item is assigned by the center of its world bounding box. Items whose
/// center lies outside `bounds` are not assigned to any node. Degenerate
/// bounds (a single point) produce a tree where every node is empty.
pub fn build(bounds: Aabb3, items: &[ContentItem], max_depth: u8) -> SpatialTree {
  let _span = tracing::info_span!("octree::build", items = items.len(), max_depth).entered();

  let root_items: Vec<(ItemId, Vec3)> = if bounds.is_degenerate() {
    Vec::new()
  } else {
    items
      .iter()
      .map(|item| (item.id, item.center()))
      .filter(|(_, center)| bounds.contains_point(*center))
      .collect()
  };

  let outside = if bounds.is_degenerate() { 0 } else { items.len() - root_items.len() };
  if outside > 0 {
    tracing::warn!(outside, "items with centers outside the tree bounds were not assigned");
  }

  let mut ctx = BuildContext::new(max_depth);
  ctx.build_node(bounds, 0, None, root_items);

  tracing::debug!(nodes = ctx.nodes.len(), "octree built");
  SpatialTree::from_nodes(ctx.nodes, max_depth)
}

/// Union of all valid item boxes, or `None` if there are none.
pub fn bounds_of(items: &[ContentItem]) -> Option<Aabb3> {
  items
    .iter()
    .filter(|item| item.has_valid_bounds())
    .map(|item| item.world_bounds)
    .reduce(|acc, b| acc.union(&b))
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
