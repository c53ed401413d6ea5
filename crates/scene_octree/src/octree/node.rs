//! SpatialNode - one cell of the fixed-depth octree.
//!
//! Nodes live in an arena owned by [`SpatialTree`](super::SpatialTree); links
//! between them are ids, so the parent back-reference never owns anything.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::Aabb3;
use crate::types::{ItemId, NodeId};

/// Octree cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialNode {
  /// Pre-order id, root = 1.
  pub id: NodeId,
  /// 0 at the root, `max_depth` at the leaves.
  pub depth: u8,
  pub bounds: Aabb3,
  /// `None` only for the root.
  pub parent: Option<NodeId>,
  /// Exactly 0 or 8 children, indexed by octant.
  ///
  /// Octant: 0-7 where bits represent +X, +Y, +Z offsets:
  /// - bit 0: X offset (0 or 1)
  /// - bit 1: Y offset (0 or 1)
  /// - bit 2: Z offset (0 or 1)
  pub children: SmallVec<[NodeId; 8]>,
  /// Items whose world-box center lies in this cell.
  pub item_ids: BTreeSet<ItemId>,
}

impl SpatialNode {
  pub fn new(id: NodeId, depth: u8, bounds: Aabb3, parent: Option<NodeId>) -> Self {
    Self {
      id,
      depth,
      bounds,
      parent,
      children: SmallVec::new(),
      item_ids: BTreeSet::new(),
    }
  }

  #[inline]
  pub fn is_leaf(&self) -> bool {
    self.children.is_empty()
  }

  #[inline]
  pub fn is_root(&self) -> bool {
    self.parent.is_none()
  }

  #[inline]
  pub fn center(&self) -> Vec3 {
    self.bounds.center()
  }

  /// Child covering `octant`, if this node was subdivided.
  pub fn child(&self, octant: u8) -> Option<NodeId> {
    self.children.get(octant as usize).copied()
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
